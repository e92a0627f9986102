//! Telemetry metric name constants.
//!
//! Centralised metric names for muninn. Consumers install their own
//! `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `service` — service the call was addressed to
//! - `operation` — operation invoked on that service
//! - `status` — outcome: "ok" or "error"

/// Total calls executed through a pipeline.
///
/// Labels: `service`, `operation`, `status` ("ok" | "error").
pub const CALLS_TOTAL: &str = "muninn_calls_total";

/// Calls answered from the response cache.
///
/// Labels: `service`, `operation`.
pub const CACHE_HITS_TOTAL: &str = "muninn_cache_hits_total";

/// Calls that found no fresh cache entry.
///
/// Labels: `service`, `operation`.
pub const CACHE_MISSES_TOTAL: &str = "muninn_cache_misses_total";

/// Responses captured and written to the cache.
///
/// Labels: `service`, `operation`.
pub const CACHE_STORES_TOTAL: &str = "muninn_cache_stores_total";

/// Responses whose body could not be captured (nothing stored).
///
/// Labels: `service`, `operation`.
pub const SNAPSHOT_FAILURES_TOTAL: &str = "muninn_snapshot_failures_total";
