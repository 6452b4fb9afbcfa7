//! Stored entries and time-to-live handling.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::time::Duration;

/// How long a written entry should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The entry never expires.
    Never,
    /// Fall back to the store's configured default TTL.
    Default,
    /// The entry expires this long after it was written.
    After(Duration),
}

impl Ttl {
    /// Interpret a signed number of seconds.
    ///
    /// Negative values never expire, zero defers to the store default and
    /// positive values expire after that many seconds.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            s if s < 0 => Ttl::Never,
            0 => Ttl::Default,
            s => Ttl::After(Duration::from_secs(s.unsigned_abs())),
        }
    }

    /// Resolve this TTL into an absolute expiry timestamp.
    ///
    /// `default` is the store's own TTL, where `None` means "never".
    /// Durations too large to add to `now` are treated as never expiring.
    pub(crate) fn expires_at(
        self,
        now: DateTime<Utc>,
        default: Option<Duration>,
    ) -> Option<DateTime<Utc>> {
        let ttl = match self {
            Ttl::Never => return None,
            Ttl::Default => default?,
            Ttl::After(ttl) => ttl,
        };
        if ttl.is_zero() {
            return None;
        }
        TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
    }
}

/// A stored value together with its optional expiration time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry<V> {
    /// The stored value
    pub value: V,
    /// When the entry expires; `None` means it never does
    pub expires_at: Option<DateTime<Utc>>,
}

impl<V> Entry<V> {
    /// Whether the entry has expired as of `now`.
    ///
    /// An entry is still live at exactly its expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }
}
