//! Expiring key-value storage shared by every limiter.

mod entry;
mod store;

pub use entry::{Entry, Ttl};
pub use store::{ExpiringStore, StoreConfig, DEFAULT_SHARD_COUNT, DEFAULT_SWEEP_INTERVAL};
