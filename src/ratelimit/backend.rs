//! The capability shared by every limiting algorithm.

use chrono::{DateTime, Utc};

use super::rules::{Algorithm, LimiterConfig};
use super::types::Decision;

/// A configured limiter attached to one route.
///
/// Implementations hold an immutable configuration plus a handle to the
/// shared state store. Reconfiguring a route replaces the whole instance.
pub trait Limiter: Send + Sync {
    /// The route this limiter is attached to.
    fn name(&self) -> &str;

    /// A copy of the configuration this limiter was built from.
    fn config(&self) -> LimiterConfig;

    /// Decide whether one request from `client` is admitted at `now`,
    /// updating the client's state as a single atomic step.
    fn check(&self, client: &str, now: DateTime<Utc>) -> Decision;

    /// The algorithm kind behind this limiter.
    fn algorithm(&self) -> Algorithm {
        self.config().algorithm()
    }
}
