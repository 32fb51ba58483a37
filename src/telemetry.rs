//! Telemetry metric name constants.
//!
//! Centralised metric names for tollgate operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! These counters describe the client's own behaviour and complement the
//! per-client [`Statistics`](crate::client::Statistics) snapshot, which is
//! always available without a recorder.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `tollgate_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `aggregator` — which cache was involved: "check", "quota", "report"

/// Total cache hits served without a transport call.
///
/// Labels: `aggregator`.
pub const CACHE_HITS_TOTAL: &str = "tollgate_cache_hits_total";

/// Total cache misses that forced a transport dispatch.
///
/// Labels: `aggregator`.
pub const CACHE_MISSES_TOTAL: &str = "tollgate_cache_misses_total";

/// Total requests handed to a flush callback after a cache eviction.
///
/// Labels: `aggregator`.
pub const FLUSHED_REQUESTS_TOTAL: &str = "tollgate_flushed_requests_total";
