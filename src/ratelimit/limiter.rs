//! Admission control entry point.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::backend::Limiter;
use super::fixed_window::FixedWindow;
use super::registry::LimiterRegistry;
use super::rules::{LimiterConfig, LimiterParams, LimiterSpec};
use super::token_bucket::TokenBucket;
use super::types::{Decision, LimiterState, StateStore};
use crate::error::Result;
use crate::storage::{Entry, StoreConfig};

/// Diagnostic dump of stored state: route -> client -> entry.
pub type Snapshot = BTreeMap<String, BTreeMap<String, Entry<LimiterState>>>;

/// The admission control engine.
///
/// Owns the shared state store and the registry of per-route limiters.
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    /// Per-client limiter state, shared by every limiter
    store: Arc<StateStore>,
    /// Configured limiters indexed by route
    registry: LimiterRegistry,
}

impl RateLimiter {
    /// Create a new rate limiter with an empty registry.
    pub fn new(store_config: StoreConfig) -> Self {
        Self {
            store: Arc::new(StateStore::new(store_config)),
            registry: LimiterRegistry::new(),
        }
    }

    /// Check one request from `client` against the limiter for `route`.
    ///
    /// Returns `None` if no limiter is configured for the route; callers
    /// are expected to admit such requests.
    pub fn check(&self, route: &str, client: &str, now: DateTime<Utc>) -> Option<Decision> {
        let Some(limiter) = self.registry.get(route) else {
            trace!(route = route, "No limiter configured");
            return None;
        };

        let decision = limiter.check(client, now);
        if !decision.allowed {
            debug!(
                route = route,
                client = client,
                reset_at = %decision.reset_at,
                "Rate limit exceeded"
            );
        }
        Some(decision)
    }

    /// Create or replace the limiter for `route` from an algorithm kind and
    /// raw parameters.
    pub fn configure(
        &self,
        route: &str,
        kind: &str,
        params: &LimiterParams,
    ) -> Result<Arc<dyn Limiter>> {
        let config = LimiterConfig::from_params(kind, params).inspect_err(|e| {
            warn!(route = route, kind = kind, error = %e, "Rejected limiter configuration");
        })?;
        self.configure_with(route, config)
    }

    /// Create or replace a limiter from a named definition.
    pub fn configure_spec(&self, spec: &LimiterSpec) -> Result<Arc<dyn Limiter>> {
        self.configure(&spec.name, &spec.kind, &spec.params)
    }

    /// Create or replace the limiter for `route` from a validated config.
    pub fn configure_with(&self, route: &str, config: LimiterConfig) -> Result<Arc<dyn Limiter>> {
        let limiter = self.build(route, config)?;
        let previous = self.registry.set(route, Arc::clone(&limiter));

        info!(
            route = route,
            algorithm = %limiter.algorithm(),
            replaced = previous.is_some(),
            "Configured limiter"
        );
        Ok(limiter)
    }

    /// Change the limit and window of an existing limiter, keeping its
    /// algorithm.
    ///
    /// The limiter is replaced by a new instance rather than modified in
    /// place. Returns `Ok(false)` if no limiter is configured for `route`.
    pub fn update_limits(&self, route: &str, limit: u64, window: Duration) -> Result<bool> {
        let updated = self.registry.update(route, |current| {
            let config = current.config().with_limits(limit, window)?;
            self.build(route, config)
        })?;

        if updated {
            info!(route = route, limit = limit, window = ?window, "Updated limiter limits");
        }
        Ok(updated)
    }

    /// Look up the limiter configured for `route`.
    pub fn lookup(&self, route: &str) -> Option<Arc<dyn Limiter>> {
        self.registry.get(route)
    }

    /// Names of all configured routes, sorted.
    pub fn routes(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Copy every live client state, grouped by route.
    ///
    /// Shards are copied one at a time, so the dump is not a consistent cut.
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for (key, entry) in self.store.snapshot() {
            snapshot
                .entry(key.route.to_string())
                .or_default()
                .insert(key.client, entry);
        }
        snapshot
    }

    /// Stop background reclamation of expired state.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.store.close();
    }

    /// The state store shared by all limiters.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    fn build(&self, route: &str, config: LimiterConfig) -> Result<Arc<dyn Limiter>> {
        let store = Arc::clone(&self.store);
        let limiter: Arc<dyn Limiter> = match config {
            LimiterConfig::TokenBucket(config) => Arc::new(TokenBucket::new(route, config, store)?),
            LimiterConfig::FixedWindow(config) => Arc::new(FixedWindow::new(route, config, store)?),
        };
        Ok(limiter)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RatekeeperError;
    use crate::ratelimit::rules::{Algorithm, FixedWindowConfig};
    use crate::storage::Ttl;
    use chrono::TimeDelta;

    fn bucket_params() -> LimiterParams {
        LimiterParams {
            capacity: 5,
            refill_rate: 1,
            refill_every: 2,
            ttl: 30,
            ..Default::default()
        }
    }

    fn window_params(limit: u64, window: u64) -> LimiterParams {
        LimiterParams {
            limit,
            window,
            ttl: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_unconfigured_route_returns_none() {
        let limiter = RateLimiter::default();
        assert!(limiter.lookup("/unmapped").is_none());
        assert!(limiter.check("/unmapped", "a", Utc::now()).is_none());
    }

    #[test]
    fn test_check_token_bucket_route() {
        let limiter = RateLimiter::default();
        limiter.configure("/check", "token-bucket", &bucket_params()).unwrap();
        let now = Utc::now();

        let remaining: Vec<u64> = (0..5)
            .map(|_| limiter.check("/check", "a", now).unwrap().remaining)
            .collect();
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let denied = limiter.check("/check", "a", now).unwrap();
        assert!(!denied.allowed);
    }

    #[test]
    fn test_configure_errors() {
        let limiter = RateLimiter::default();

        let err = limiter.configure("/x", "leaky-bucket", &bucket_params()).err().unwrap();
        assert!(matches!(err, RatekeeperError::UnsupportedAlgorithm(_)));

        let err = limiter.configure("/x", "fixed-window", &window_params(0, 10)).err().unwrap();
        assert!(matches!(err, RatekeeperError::InvalidConfig(_)));

        assert!(limiter.lookup("/x").is_none());
    }

    #[test]
    fn test_routes_do_not_share_client_state() {
        let limiter = RateLimiter::default();
        limiter.configure("/a", "fixed-window", &window_params(1, 60)).unwrap();
        limiter.configure("/b", "fixed-window", &window_params(1, 60)).unwrap();
        let now = Utc::now();

        assert!(limiter.check("/a", "client", now).unwrap().allowed);
        assert!(limiter.check("/b", "client", now).unwrap().allowed);
        assert!(!limiter.check("/a", "client", now).unwrap().allowed);
    }

    #[test]
    fn test_replacement_takes_effect_immediately() {
        let limiter = RateLimiter::default();
        limiter.configure("/api", "fixed-window", &window_params(1, 60)).unwrap();
        let now = Utc::now();

        let old = limiter.lookup("/api").unwrap();
        assert!(limiter.check("/api", "a", now).unwrap().allowed);
        assert!(!limiter.check("/api", "a", now).unwrap().allowed);

        limiter.configure("/api", "fixed-window", &window_params(3, 60)).unwrap();
        let decision = limiter.check("/api", "a", now).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);

        // A handle to the old instance keeps its own configuration.
        assert!(!old.check("a", now).allowed);
    }

    #[test]
    fn test_switching_algorithm_starts_fresh_state() {
        let limiter = RateLimiter::default();
        limiter.configure("/api", "fixed-window", &window_params(1, 60)).unwrap();
        let now = Utc::now();
        limiter.check("/api", "a", now);

        limiter.configure("/api", "token-bucket", &bucket_params()).unwrap();
        assert_eq!(limiter.lookup("/api").unwrap().algorithm(), Algorithm::TokenBucket);

        let decision = limiter.check("/api", "a", now).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn test_update_limits() {
        let limiter = RateLimiter::default();
        assert!(!limiter.update_limits("/api", 5, Duration::from_secs(10)).unwrap());

        limiter.configure("/api", "fixed-window", &window_params(1, 60)).unwrap();
        assert!(limiter.update_limits("/api", 5, Duration::from_secs(10)).unwrap());

        assert_eq!(
            limiter.lookup("/api").unwrap().config(),
            LimiterConfig::FixedWindow(FixedWindowConfig {
                limit: 5,
                window: Duration::from_secs(10),
                ttl: Ttl::After(Duration::from_secs(60)),
            })
        );

        let err = limiter.update_limits("/api", 0, Duration::from_secs(10)).err().unwrap();
        assert!(matches!(err, RatekeeperError::InvalidConfig(_)));
    }

    #[test]
    fn test_snapshot_groups_by_route() {
        let limiter = RateLimiter::default();
        limiter.configure("/a", "token-bucket", &bucket_params()).unwrap();
        limiter.configure("/b", "fixed-window", &window_params(3, 10)).unwrap();
        let now = Utc::now();

        limiter.check("/a", "alice", now);
        limiter.check("/a", "bob", now);
        limiter.check("/b", "alice", now);

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["/a"].len(), 2);
        assert!(matches!(
            snapshot["/a"]["alice"].value,
            LimiterState::Bucket(state) if state.tokens == 4
        ));
        assert!(matches!(
            snapshot["/b"]["alice"].value,
            LimiterState::Window(state) if state.count == 1
        ));
        assert_eq!(
            snapshot["/a"]["alice"].expires_at,
            Some(now + TimeDelta::seconds(30))
        );
    }

    #[test]
    fn test_concurrent_checks_admit_exactly_capacity() {
        let limiter = RateLimiter::default();
        let params = LimiterParams {
            capacity: 20,
            refill_rate: 1,
            refill_every: 3600,
            ttl: 60,
            ..Default::default()
        };
        limiter.configure("/hot", "token-bucket", &params).unwrap();
        let now = Utc::now();

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..10)
                            .filter(|_| limiter.check("/hot", "shared", now).unwrap().allowed)
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 20);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let limiter = RateLimiter::default();
        limiter.shutdown();
        limiter.shutdown();
    }
}
