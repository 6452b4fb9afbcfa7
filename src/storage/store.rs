//! Sharded, concurrently accessed key-value store with per-entry expiration.
//!
//! Keys are spread over a fixed number of independently locked shards.
//! Expired entries are reclaimed lazily when read and eagerly by a
//! background sweep task owned by the store.

use ahash::RandomState;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::entry::{Entry, Ttl};

/// Shard count used when none (or zero) is configured.
pub const DEFAULT_SHARD_COUNT: usize = 16;
/// Sweep interval used when a zero interval is configured.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Construction parameters for an [`ExpiringStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of shards; fixed for the lifetime of the store
    pub shard_count: usize,
    /// TTL applied to writes that ask for the default; `None` means never expire
    pub default_ttl: Option<Duration>,
    /// How often the background sweep runs
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            default_ttl: Some(Duration::from_secs(10)),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// One independently lockable partition of the keyspace.
struct Shard<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash, V> Shard<K, V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Remove every entry expired as of `now`, returning how many went.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

fn purge_all<K: Eq + Hash, V>(shards: &[Shard<K, V>], now: DateTime<Utc>) -> usize {
    shards.iter().map(|shard| shard.purge_expired(now)).sum()
}

/// A sharded map from `K` to `V` where every entry may carry an expiry.
///
/// All access goes through the owning shard's lock, including the
/// background sweep, so a key being swept never races a concurrent write.
pub struct ExpiringStore<K, V> {
    shards: Arc<[Shard<K, V>]>,
    hasher: RandomState,
    default_ttl: Option<Duration>,
    /// Stop signal for the sweep task; taken exactly once on close
    sweeper: Mutex<Option<oneshot::Sender<()>>>,
}

impl<K, V> ExpiringStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a new store and start its background sweep.
    ///
    /// The sweep runs on the current Tokio runtime. Outside a runtime the
    /// store still works, but expired entries are only reclaimed on access
    /// or by explicit calls to [`ExpiringStore::sweep`].
    pub fn new(config: StoreConfig) -> Self {
        let shard_count = if config.shard_count == 0 {
            DEFAULT_SHARD_COUNT
        } else {
            config.shard_count
        };
        let sweep_interval = if config.sweep_interval.is_zero() {
            DEFAULT_SWEEP_INTERVAL
        } else {
            config.sweep_interval
        };

        let shards: Arc<[Shard<K, V>]> = (0..shard_count).map(|_| Shard::new()).collect();

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let (stop_tx, stop_rx) = oneshot::channel();
                runtime.spawn(sweep_loop(Arc::clone(&shards), sweep_interval, stop_rx));
                Some(stop_tx)
            }
            Err(_) => {
                warn!("No Tokio runtime available, expired entries are reclaimed on access only");
                None
            }
        };

        debug!(
            shards = shard_count,
            default_ttl = ?config.default_ttl,
            sweep_interval = ?sweep_interval,
            "Created expiring store"
        );

        Self {
            shards,
            hasher: RandomState::new(),
            default_ttl: config.default_ttl,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Number of shards the keyspace is split into.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard owning `key`.
    ///
    /// Stable for the lifetime of the store.
    pub fn shard_index<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        (BuildHasher::hash_one(&self.hasher, key) % self.shards.len() as u64) as usize
    }

    fn shard<Q>(&self, key: &Q) -> &Shard<K, V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        &self.shards[self.shard_index(key)]
    }

    /// Read the value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_at(key, Utc::now())
    }

    /// Read the value stored under `key` as of `now`.
    ///
    /// An expired entry is reported as absent and removed.
    pub fn get_at<Q>(&self, key: &Q, now: DateTime<Utc>) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let shard = self.shard(key);
        {
            let entries = shard.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // The entry may have been rewritten between the two locks.
        let mut entries = shard.entries.write();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            trace!("Evicted expired entry on read");
        }
        None
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: K, value: V, ttl: Ttl) {
        self.set_at(key, value, ttl, Utc::now());
    }

    /// Store `value` under `key` with its expiry computed from `now`.
    pub fn set_at(&self, key: K, value: V, ttl: Ttl, now: DateTime<Utc>) {
        let expires_at = ttl.expires_at(now, self.default_ttl);
        let shard = self.shard(&key);
        shard.entries.write().insert(key, Entry { value, expires_at });
    }

    /// Atomically derive a new value for `key` from its current one.
    ///
    /// `f` receives the live value (or `None` if absent or expired) and
    /// returns the value to store plus an output handed back to the caller.
    /// The owning shard stays exclusively locked for the whole
    /// read-decide-write cycle, so concurrent mutations of the same key
    /// are serialized. `f` must not call back into the store.
    pub fn mutate<F, R>(&self, key: K, ttl: Ttl, now: DateTime<Utc>, f: F) -> R
    where
        F: FnOnce(Option<&V>) -> (V, R),
    {
        let expires_at = ttl.expires_at(now, self.default_ttl);
        let shard = self.shard(&key);
        let mut entries = shard.entries.write();

        let current = entries
            .get(&key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| &entry.value);
        let (value, output) = f(current);

        entries.insert(key, Entry { value, expires_at });
        output
    }

    /// Remove `key`, returning whether an entry was present.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shard(key).entries.write().remove(key).is_some()
    }

    /// Number of stored entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.entries.read().len()).sum()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one reclamation pass over every shard.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Run one reclamation pass using `now` as the current time.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        purge_all(&self.shards, now)
    }

    /// Stop the background sweep.
    ///
    /// Safe to call any number of times; only the first call has an effect.
    pub fn close(&self) {
        if let Some(stop) = self.sweeper.lock().take() {
            // The task may already be gone if the runtime shut down first.
            let _ = stop.send(());
            info!("Stopped expiring store sweeper");
        }
    }
}

impl<K, V> ExpiringStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Copy every live entry across all shards.
    ///
    /// Each shard is copied under its own lock, so the result is not a
    /// consistent cut across shards.
    pub fn snapshot(&self) -> HashMap<K, Entry<V>> {
        self.snapshot_at(Utc::now())
    }

    /// Copy every entry still live as of `now`.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> HashMap<K, Entry<V>> {
        let mut out = HashMap::new();
        for shard in self.shards.iter() {
            let entries = shard.entries.read();
            out.extend(
                entries
                    .iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .map(|(key, entry)| (key.clone(), entry.clone())),
            );
        }
        out
    }
}

impl<K, V> Drop for ExpiringStore<K, V> {
    fn drop(&mut self) {
        if let Some(stop) = self.sweeper.get_mut().take() {
            let _ = stop.send(());
        }
    }
}

/// Periodically purge expired entries until told to stop.
async fn sweep_loop<K, V>(
    shards: Arc<[Shard<K, V>]>,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reclaimed = purge_all(&shards, Utc::now());
                if reclaimed > 0 {
                    debug!(reclaimed = reclaimed, "Swept expired entries");
                }
            }
            _ = &mut stop => {
                debug!("Sweeper received stop signal");
                break;
            }
        }
    }
}
