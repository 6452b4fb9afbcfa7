//! Name-keyed directory of configured limiters.

use dashmap::DashMap;
use std::sync::Arc;

use super::backend::Limiter;

/// Maps route names to limiter instances.
///
/// Instances are immutable and handed out as `Arc`s, so a replacement never
/// disturbs checks already running against the previous instance, and
/// readers always observe one complete instance or the other.
#[derive(Default)]
pub struct LimiterRegistry {
    limiters: DashMap<String, Arc<dyn Limiter>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the limiter for `name`, returning the previous one.
    pub fn set(&self, name: &str, limiter: Arc<dyn Limiter>) -> Option<Arc<dyn Limiter>> {
        self.limiters.insert(name.to_string(), limiter)
    }

    /// Look up the limiter for `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Limiter>> {
        self.limiters.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Replace the limiter for `name` with one derived from the current
    /// instance.
    ///
    /// The entry stays locked while `f` runs, so a concurrent `set` cannot
    /// be lost between reading the current instance and replacing it.
    /// Returns `Ok(false)` if no limiter is registered under `name`.
    pub fn update<F, E>(&self, name: &str, f: F) -> Result<bool, E>
    where
        F: FnOnce(&Arc<dyn Limiter>) -> Result<Arc<dyn Limiter>, E>,
    {
        match self.limiters.get_mut(name) {
            Some(mut entry) => {
                let replacement = f(entry.value())?;
                *entry.value_mut() = replacement;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .limiters
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// A point-in-time copy of every registered limiter.
    pub fn entries(&self) -> Vec<(String, Arc<dyn Limiter>)> {
        self.limiters
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::rules::{FixedWindowConfig, LimiterConfig};
    use crate::ratelimit::types::Decision;
    use crate::storage::Ttl;
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    /// Admits or denies everything, tagging decisions with `remaining`.
    struct StaticLimiter {
        name: String,
        allowed: bool,
        remaining: u64,
    }

    impl Limiter for StaticLimiter {
        fn name(&self) -> &str {
            &self.name
        }

        fn config(&self) -> LimiterConfig {
            LimiterConfig::FixedWindow(FixedWindowConfig {
                limit: self.remaining.max(1),
                window: Duration::from_secs(1),
                ttl: Ttl::Default,
            })
        }

        fn check(&self, _client: &str, now: DateTime<Utc>) -> Decision {
            Decision {
                allowed: self.allowed,
                remaining: self.remaining,
                reset_at: now,
            }
        }
    }

    fn limiter(name: &str, allowed: bool, remaining: u64) -> Arc<dyn Limiter> {
        Arc::new(StaticLimiter {
            name: name.to_string(),
            allowed,
            remaining,
        })
    }

    #[test]
    fn test_set_and_get() {
        let registry = LimiterRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("/check").is_none());

        assert!(registry.set("/check", limiter("/check", true, 1)).is_none());
        assert_eq!(registry.len(), 1);

        let found = registry.get("/check").unwrap();
        assert_eq!(found.name(), "/check");
    }

    #[test]
    fn test_replace_keeps_old_instance_usable() {
        let registry = LimiterRegistry::new();
        registry.set("/check", limiter("/check", true, 1));

        let old = registry.get("/check").unwrap();
        let previous = registry.set("/check", limiter("/check", false, 2));
        assert!(previous.is_some());

        let now = Utc::now();
        assert!(old.check("a", now).allowed);
        assert!(!registry.get("/check").unwrap().check("a", now).allowed);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_existing_only() {
        let registry = LimiterRegistry::new();

        let missing: Result<bool, ()> = registry.update("/none", |_| Ok(limiter("/none", true, 0)));
        assert_eq!(missing, Ok(false));
        assert!(registry.get("/none").is_none());

        registry.set("/check", limiter("/check", true, 1));
        let updated: Result<bool, ()> = registry.update("/check", |current| {
            assert_eq!(current.name(), "/check");
            Ok(limiter("/check", true, 9))
        });
        assert_eq!(updated, Ok(true));
        assert_eq!(registry.get("/check").unwrap().check("a", Utc::now()).remaining, 9);

        let failed: Result<bool, &str> = registry.update("/check", |_| Err("rejected"));
        assert_eq!(failed, Err("rejected"));
        assert_eq!(registry.get("/check").unwrap().check("a", Utc::now()).remaining, 9);
    }

    #[test]
    fn test_names_sorted() {
        let registry = LimiterRegistry::new();
        registry.set("/b", limiter("/b", true, 0));
        registry.set("/a", limiter("/a", true, 0));
        registry.set("/c", limiter("/c", true, 0));

        assert_eq!(registry.names(), vec!["/a", "/b", "/c"]);
        assert_eq!(registry.entries().len(), 3);
    }

    #[test]
    fn test_readers_see_whole_instances_during_swaps() {
        let registry = LimiterRegistry::new();
        registry.set("/check", limiter("/check", true, 1));

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..1000 {
                    let remaining = if i % 2 == 0 { 2 } else { 1 };
                    registry.set("/check", limiter("/check", remaining == 1, remaining));
                }
            });

            for _ in 0..4 {
                scope.spawn(|| {
                    let now = Utc::now();
                    for _ in 0..1000 {
                        let decision = registry.get("/check").unwrap().check("a", now);
                        // Instances pair allowed with remaining == 1.
                        assert_eq!(decision.allowed, decision.remaining == 1);
                    }
                });
            }
        });
    }
}
