//! Decisions, per-key limiter state and state keys.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::storage::ExpiringStore;

/// The store shared by every limiter instance.
pub type StateStore = ExpiringStore<StateKey, LimiterState>;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Quota left after this check
    pub remaining: u64,
    /// When the quota next replenishes
    pub reset_at: DateTime<Utc>,
}

/// Token bucket state for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketState {
    /// Tokens currently available, never above the bucket capacity
    pub tokens: u64,
    /// Start of the current, partially elapsed refill interval
    pub last_refill: DateTime<Utc>,
}

/// Fixed window state for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowState {
    /// When the current window opened
    pub window_start: DateTime<Utc>,
    /// Requests admitted in the current window
    pub count: u64,
}

/// Per-key state stored on behalf of a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimiterState {
    /// Held by token bucket limiters
    Bucket(BucketState),
    /// Held by fixed window limiters
    Window(WindowState),
}

/// A key that identifies one client's state under one route.
///
/// Routes share a single store, so the route is part of the key to keep
/// their client states apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    /// The route whose limiter owns the state
    pub route: Arc<str>,
    /// The client identifier
    pub client: String,
}

impl StateKey {
    /// Create a new state key.
    pub fn new(route: &Arc<str>, client: &str) -> Self {
        Self {
            route: Arc::clone(route),
            client: client.to_string(),
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.route, self.client)
    }
}

/// Time elapsed from `earlier` to `now`, clamped to zero if the clock
/// moved backwards.
pub(crate) fn elapsed_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - earlier).to_std().unwrap_or(Duration::ZERO)
}

/// `at + by`, saturating at the latest representable timestamp.
pub(crate) fn offset(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_key_display() {
        let route: Arc<str> = Arc::from("/check");
        let key = StateKey::new(&route, "client_a");
        assert_eq!(key.to_string(), "/check|client_a");
    }

    #[test]
    fn test_state_keys_differ_by_route() {
        let first: Arc<str> = Arc::from("/a");
        let second: Arc<str> = Arc::from("/b");

        assert_eq!(StateKey::new(&first, "c"), StateKey::new(&first, "c"));
        assert_ne!(StateKey::new(&first, "c"), StateKey::new(&second, "c"));
    }

    #[test]
    fn test_elapsed_clamps_backwards_clock() {
        let now = Utc::now();
        let later = now + TimeDelta::seconds(3);

        assert_eq!(elapsed_between(now, later), Duration::from_secs(3));
        assert_eq!(elapsed_between(later, now), Duration::ZERO);
    }

    #[test]
    fn test_offset_saturates() {
        let now = Utc::now();
        assert_eq!(offset(now, Duration::from_secs(2)), now + TimeDelta::seconds(2));
        assert_eq!(offset(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_state_serializes_with_kind_tag() {
        let now = Utc::now();
        let state = LimiterState::Window(WindowState {
            window_start: now,
            count: 2,
        });

        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json["kind"], "window");
        assert_eq!(json["count"], 2);
    }
}
