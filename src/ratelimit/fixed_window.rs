//! Fixed window limiting.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::trace;

use super::backend::Limiter;
use super::rules::{FixedWindowConfig, LimiterConfig};
use super::types::{
    elapsed_between, offset, Decision, LimiterState, StateKey, StateStore, WindowState,
};
use crate::error::Result;

/// A fixed window limiter.
///
/// Admits up to `limit` requests per client in each window. A window opens
/// with the first request after the previous one elapsed and is hard reset,
/// so bursts of up to twice the limit are possible across a boundary.
pub struct FixedWindow {
    route: Arc<str>,
    config: FixedWindowConfig,
    store: Arc<StateStore>,
}

impl FixedWindow {
    /// Create a fixed window limiter for `route`.
    pub fn new(route: &str, config: FixedWindowConfig, store: Arc<StateStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            route: Arc::from(route),
            config,
            store,
        })
    }
}

/// Roll the window over if it elapsed and try to count one more request.
fn count_request(
    config: &FixedWindowConfig,
    mut state: WindowState,
    now: DateTime<Utc>,
) -> (WindowState, bool) {
    if elapsed_between(state.window_start, now) >= config.window {
        state = WindowState {
            window_start: now,
            count: 0,
        };
    }
    state.count = state.count.min(config.limit);

    let allowed = state.count < config.limit;
    if allowed {
        state.count += 1;
    }
    (state, allowed)
}

impl Limiter for FixedWindow {
    fn name(&self) -> &str {
        &self.route
    }

    fn config(&self) -> LimiterConfig {
        LimiterConfig::FixedWindow(self.config.clone())
    }

    fn check(&self, client: &str, now: DateTime<Utc>) -> Decision {
        let config = &self.config;
        let key = StateKey::new(&self.route, client);

        let decision = self.store.mutate(key, config.ttl, now, |previous| {
            let state = match previous {
                Some(LimiterState::Window(state)) => *state,
                _ => WindowState {
                    window_start: now,
                    count: 0,
                },
            };

            let (state, allowed) = count_request(config, state, now);
            let decision = Decision {
                allowed,
                remaining: config.limit - state.count,
                reset_at: offset(state.window_start, config.window),
            };
            (LimiterState::Window(state), decision)
        });

        trace!(
            route = %self.route,
            client = client,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Fixed window check"
        );
        decision
    }
}
