//! Short-lived response cache for a [`Pipeline`].
//!
//! [`add_caching`] attaches a [`CacheGate`] and a [`CacheHandler`] to a
//! pipeline and returns the [`ResponseCache`] they share. Calls with the
//! same fingerprint (service, operation and canonical params) within the
//! TTL are answered from the cache without touching the transport, and
//! their [`CallContext`] reports [`is_cache_hit`].
//!
//! Caching is best-effort: a response that cannot be captured is passed
//! through untouched and not stored. Non-2xx responses are never stored.
//!
//! There is no single-flight: identical calls that miss concurrently all
//! reach the transport.

pub mod interceptor;
pub mod snapshot;
pub mod store;

pub use interceptor::{CacheGate, CacheHandler};
pub use snapshot::ResponseSnapshot;
pub use store::{CacheStore, DEFAULT_MAX_ENTRIES, Entry};

use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::{CallContext, Pipeline};

/// TTL applied to every cached response unless configured otherwise.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Store of captured responses keyed by call fingerprint.
pub type ResponseCache = CacheStore<ResponseSnapshot>;

/// Configuration for the response cache.
///
/// ```rust
/// # use muninn::cache::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new().ttl(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live for every cached entry. Default: 10 seconds.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL }
    }
}

impl CacheConfig {
    /// Create a new config with the default TTL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Attach response caching with the default configuration.
///
/// Call once while building the pipeline. The returned cache is the only
/// instance the hooks use.
pub fn add_caching(pipeline: &mut Pipeline) -> Arc<ResponseCache> {
    add_caching_with(pipeline, &CacheConfig::default())
}

/// Attach response caching with an explicit configuration.
pub fn add_caching_with(pipeline: &mut Pipeline, config: &CacheConfig) -> Arc<ResponseCache> {
    let cache = Arc::new(ResponseCache::new());
    pipeline.push_send_gate(Arc::new(CacheGate::new(Arc::clone(&cache))));
    pipeline.push_front_validator(Arc::new(CacheHandler::new(Arc::clone(&cache), config.ttl)));
    cache
}

/// Whether the call behind `ctx` was served from a response cache.
///
/// False for calls on pipelines without caching.
pub fn is_cache_hit(ctx: &CallContext) -> bool {
    ctx.is_cache_hit()
}
