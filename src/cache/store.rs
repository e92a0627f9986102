//! Capacity-bounded store of timestamped cache entries.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::time::Instant;

use crate::fingerprint::Fingerprint;

/// Maximum number of entries held by a [`CacheStore`].
pub const DEFAULT_MAX_ENTRIES: u64 = 5_000;

/// A stored value with its insertion time and time-to-live.
///
/// Entries are never mutated; storing under the same fingerprint again
/// replaces the entry.
#[derive(Debug)]
pub struct Entry<V> {
    value: Arc<V>,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> Clone for Entry<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            inserted_at: self.inserted_at,
            ttl: self.ttl,
        }
    }
}

impl<V> Entry<V> {
    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Time elapsed since insertion.
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.inserted_at)
    }

    /// An entry is fresh until strictly more than `ttl` has elapsed.
    pub fn is_fresh(&self) -> bool {
        self.age() <= self.ttl
    }
}

/// Thread-safe fingerprint → entry store.
///
/// Backed by moka, which shards its internal locks, so concurrent `get`
/// and `set` need no external synchronization. Capacity is
/// [`DEFAULT_MAX_ENTRIES`]; once full, moka evicts by its approximate LRU
/// policy and an evicted key simply reads as not found.
///
/// `get` returns logically expired entries too. Callers decide freshness
/// with [`Entry::is_fresh`].
pub struct CacheStore<V> {
    entries: Cache<Fingerprint, Entry<V>>,
}

impl<V> CacheStore<V>
where
    V: Send + Sync + 'static,
{
    /// Create an empty store with the default capacity.
    pub fn new() -> Self {
        Self {
            entries: Cache::new(DEFAULT_MAX_ENTRIES),
        }
    }

    /// Look up an entry, fresh or not.
    pub async fn get(&self, key: &Fingerprint) -> Option<Entry<V>> {
        self.entries.get(key).await
    }

    /// Insert (or replace) the entry for `key`.
    pub async fn set(&self, key: Fingerprint, value: V, ttl: Duration) {
        let entry = Entry {
            value: Arc::new(value),
            inserted_at: Instant::now(),
            ttl,
        };
        self.entries.insert(key, entry).await;
    }

    /// Approximate number of entries currently held.
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict all entries.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

impl<V> Default for CacheStore<V>
where
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
