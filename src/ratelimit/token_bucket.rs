//! Token bucket limiting.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tracing::trace;

use super::backend::Limiter;
use super::rules::{LimiterConfig, TokenBucketConfig};
use super::types::{
    elapsed_between, offset, BucketState, Decision, LimiterState, StateKey, StateStore,
};
use crate::error::Result;

/// A token bucket limiter.
///
/// Every client starts with a full bucket of `capacity` tokens. Each
/// elapsed refill interval adds `refill_rate` tokens up to capacity, and
/// every admitted request consumes one token.
pub struct TokenBucket {
    route: Arc<str>,
    config: TokenBucketConfig,
    store: Arc<StateStore>,
}

impl TokenBucket {
    /// Create a token bucket limiter for `route`.
    pub fn new(route: &str, config: TokenBucketConfig, store: Arc<StateStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            route: Arc::from(route),
            config,
            store,
        })
    }
}

/// Apply any due refills to `state` and try to take one token.
fn take_token(
    config: &TokenBucketConfig,
    mut state: BucketState,
    now: DateTime<Utc>,
) -> (BucketState, bool) {
    // A lowered capacity applies to buckets filled under the old one.
    state.tokens = state.tokens.min(config.capacity);

    let elapsed = elapsed_between(state.last_refill, now).as_nanos();
    let interval = config.refill_interval.as_nanos();
    if elapsed >= interval {
        let refills = elapsed / interval;
        let added = refills.saturating_mul(u128::from(config.refill_rate));
        let tokens = u128::from(state.tokens).saturating_add(added);
        state.tokens = tokens.min(u128::from(config.capacity)) as u64;

        // Carry the unfinished part of the current interval forward.
        let remainder = elapsed % interval;
        state.last_refill = i64::try_from(remainder)
            .ok()
            .and_then(|nanos| now.checked_sub_signed(TimeDelta::nanoseconds(nanos)))
            .unwrap_or(now);
    }

    let allowed = state.tokens > 0;
    if allowed {
        state.tokens -= 1;
    }
    (state, allowed)
}

impl Limiter for TokenBucket {
    fn name(&self) -> &str {
        &self.route
    }

    fn config(&self) -> LimiterConfig {
        LimiterConfig::TokenBucket(self.config.clone())
    }

    fn check(&self, client: &str, now: DateTime<Utc>) -> Decision {
        let config = &self.config;
        let key = StateKey::new(&self.route, client);

        let decision = self.store.mutate(key, config.ttl, now, |previous| {
            let state = match previous {
                Some(LimiterState::Bucket(state)) => *state,
                _ => BucketState {
                    tokens: config.capacity,
                    last_refill: now,
                },
            };

            let (state, allowed) = take_token(config, state, now);
            let decision = Decision {
                allowed,
                remaining: state.tokens,
                reset_at: offset(state.last_refill, config.refill_interval),
            };
            (LimiterState::Bucket(state), decision)
        });

        trace!(
            route = %self.route,
            client = client,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Token bucket check"
        );
        decision
    }
}
