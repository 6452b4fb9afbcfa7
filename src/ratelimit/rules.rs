//! Limiter definitions and their validation.
//!
//! Definitions arrive loosely typed from configuration files or the admin
//! API as an algorithm kind plus a flat set of parameters. They are turned
//! into a validated [`LimiterConfig`] before any limiter is built, so a
//! running limiter never holds a zero or negative capacity, limit or interval.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RatekeeperError, Result};
use crate::storage::Ttl;

/// The supported limiting algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    TokenBucket,
    FixedWindow,
}

impl Algorithm {
    /// The name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token-bucket",
            Algorithm::FixedWindow => "fixed-window",
        }
    }
}

impl FromStr for Algorithm {
    type Err = RatekeeperError;

    fn from_str(kind: &str) -> Result<Self> {
        match kind {
            "token-bucket" => Ok(Algorithm::TokenBucket),
            "fixed-window" => Ok(Algorithm::FixedWindow),
            other => Err(RatekeeperError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw limiter parameters. Durations are in whole seconds.
///
/// Token buckets read `capacity`, `refill_rate` and `refill_every`;
/// fixed windows read `limit` and `window`. `ttl` follows [`Ttl::from_secs`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterParams {
    pub capacity: u64,
    pub refill_rate: u64,
    pub refill_every: u64,
    pub limit: u64,
    pub window: u64,
    pub ttl: i64,
}

/// A named limiter definition, as found in config files and admin requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterSpec {
    /// Route the limiter is attached to
    pub name: String,
    /// Algorithm kind, e.g. `token-bucket`
    #[serde(rename = "type")]
    pub kind: String,
    /// Algorithm parameters
    #[serde(flatten)]
    pub params: LimiterParams,
}

/// Validated token bucket settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucketConfig {
    /// Maximum tokens the bucket holds
    pub capacity: u64,
    /// Tokens added per elapsed interval
    pub refill_rate: u64,
    /// Length of one refill interval
    pub refill_interval: Duration,
    /// Lifetime of idle bucket state
    pub ttl: Ttl,
}

impl TokenBucketConfig {
    /// Reject zero sizes and intervals too long to offset a timestamp.
    pub fn validate(&self) -> Result<()> {
        positive("capacity", self.capacity)?;
        positive("refill_rate", self.refill_rate)?;
        interval("refill_interval", self.refill_interval)
    }
}

/// Validated fixed window settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWindowConfig {
    /// Requests admitted per window
    pub limit: u64,
    /// Length of one window
    pub window: Duration,
    /// Lifetime of idle window state
    pub ttl: Ttl,
}

impl FixedWindowConfig {
    /// Reject a zero limit or window, or a window too long to offset a timestamp.
    pub fn validate(&self) -> Result<()> {
        positive("limit", self.limit)?;
        interval("window", self.window)
    }
}

/// An immutable, validated limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterConfig {
    TokenBucket(TokenBucketConfig),
    FixedWindow(FixedWindowConfig),
}

impl LimiterConfig {
    /// Build a configuration from an algorithm kind and raw parameters.
    pub fn from_params(kind: &str, params: &LimiterParams) -> Result<Self> {
        let config = match kind.parse::<Algorithm>()? {
            Algorithm::TokenBucket => LimiterConfig::TokenBucket(TokenBucketConfig {
                capacity: params.capacity,
                refill_rate: params.refill_rate,
                refill_interval: Duration::from_secs(params.refill_every),
                ttl: Ttl::from_secs(params.ttl),
            }),
            Algorithm::FixedWindow => LimiterConfig::FixedWindow(FixedWindowConfig {
                limit: params.limit,
                window: Duration::from_secs(params.window),
                ttl: Ttl::from_secs(params.ttl),
            }),
        };
        config.validate()?;
        Ok(config)
    }

    /// The algorithm this configuration drives.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            LimiterConfig::TokenBucket(_) => Algorithm::TokenBucket,
            LimiterConfig::FixedWindow(_) => Algorithm::FixedWindow,
        }
    }

    /// Validate whichever algorithm configuration this holds.
    pub fn validate(&self) -> Result<()> {
        match self {
            LimiterConfig::TokenBucket(config) => config.validate(),
            LimiterConfig::FixedWindow(config) => config.validate(),
        }
    }

    /// Derive a configuration with a new limit and window, keeping the
    /// algorithm and TTL.
    ///
    /// A token bucket takes `limit` as its capacity and `window` as its
    /// refill interval, refilling `limit / window_secs` tokens per interval.
    pub fn with_limits(&self, limit: u64, window: Duration) -> Result<Self> {
        let config = match self {
            LimiterConfig::TokenBucket(current) => {
                let window_secs = window.as_secs();
                if window_secs == 0 {
                    return Err(RatekeeperError::InvalidConfig(
                        "window must be at least one second".to_string(),
                    ));
                }
                LimiterConfig::TokenBucket(TokenBucketConfig {
                    capacity: limit,
                    refill_rate: limit / window_secs,
                    refill_interval: window,
                    ttl: current.ttl,
                })
            }
            LimiterConfig::FixedWindow(current) => LimiterConfig::FixedWindow(FixedWindowConfig {
                limit,
                window,
                ttl: current.ttl,
            }),
        };
        config.validate()?;
        Ok(config)
    }
}

fn positive(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(RatekeeperError::InvalidConfig(format!(
            "{} must be positive",
            field
        )));
    }
    Ok(())
}

fn interval(field: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(RatekeeperError::InvalidConfig(format!(
            "{} must be positive",
            field
        )));
    }
    if TimeDelta::from_std(value).is_err() {
        return Err(RatekeeperError::InvalidConfig(format!(
            "{} is too large",
            field
        )));
    }
    Ok(())
}
