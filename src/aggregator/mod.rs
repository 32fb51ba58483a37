//! The three request aggregators and their configuration.
//!
//! Each aggregator interposes a signature-keyed cache between the caller
//! and the transport:
//!
//! - [`CheckAggregator`] — positive-response cache for authorization
//!   checks, refreshed ahead of use by the flush driver.
//! - [`QuotaAggregator`] — cache of quota grants that accumulates
//!   consumed tokens between in-place refreshes.
//! - [`ReportAggregator`] — write-batching buffer that merges
//!   same-signature telemetry until eviction turns it into one outbound
//!   report.
//!
//! Aggregators never talk to a transport themselves. Evictions produce
//! outbound requests that are handed to the registered flush callback
//! after the cache lock has been released; the
//! [`ControlClient`](crate::client::ControlClient) installs callbacks
//! that forward to its transports.

mod check;
mod quota;
mod report;

use std::time::Duration;

pub use check::CheckAggregator;
pub use quota::QuotaAggregator;
pub use report::{ReportAggregator, ReportOutcome};

/// A flush callback: receives each outbound request an aggregator emits.
///
/// Callbacks must be fast and non-blocking; they run on whichever thread
/// performed the cache mutation. They may call back into the emitting
/// aggregator (evictions are delivered only after the cache lock is
/// released).
pub type FlushCallback<R> = Box<dyn Fn(R) + Send + Sync>;

/// Options controlling check aggregation behaviour.
///
/// ```rust
/// # use tollgate::aggregator::CheckAggregationOptions;
/// # use std::time::Duration;
/// let options = CheckAggregationOptions::new()
///     .num_entries(1000)
///     .flush_interval(Duration::from_millis(500))
///     .expiration(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct CheckAggregationOptions {
    /// Maximum number of cache entries. 0 disables the cache entirely.
    /// Default: 10,000.
    pub num_entries: usize,
    /// Maximum age of a cache entry before the flush driver evicts it,
    /// dispatching any pending aggregated operation. Default: 500ms.
    pub flush_interval: Duration,
    /// Maximum age of a cached response before a hit treats it as stale.
    /// Clamped at construction so it is never below `flush_interval`.
    /// Default: 1s.
    pub expiration: Duration,
}

impl Default for CheckAggregationOptions {
    fn default() -> Self {
        Self {
            num_entries: 10_000,
            flush_interval: Duration::from_millis(500),
            expiration: Duration::from_millis(1000),
        }
    }
}

impl CheckAggregationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache capacity. 0 disables the cache.
    pub fn num_entries(mut self, n: usize) -> Self {
        self.num_entries = n;
        self
    }

    /// Set the flush interval.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the response expiration.
    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// The expiration actually applied: a response must stay valid at
    /// least as long as the flush interval.
    pub(crate) fn effective_expiration(&self) -> Duration {
        self.expiration.max(self.flush_interval)
    }
}

/// Options controlling quota aggregation behaviour.
#[derive(Debug, Clone)]
pub struct QuotaAggregationOptions {
    /// Maximum number of cache entries. 0 disables the cache entirely.
    /// Default: 10,000.
    pub num_entries: usize,
    /// How long a grant serves from cache before the flush driver
    /// refreshes it in place. Default: 1s.
    pub refresh_interval: Duration,
}

impl Default for QuotaAggregationOptions {
    fn default() -> Self {
        Self {
            num_entries: 10_000,
            refresh_interval: Duration::from_millis(1000),
        }
    }
}

impl QuotaAggregationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache capacity. 0 disables the cache.
    pub fn num_entries(mut self, n: usize) -> Self {
        self.num_entries = n;
        self
    }

    /// Set the refresh interval.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }
}

/// Options controlling report aggregation behaviour.
#[derive(Debug, Clone)]
pub struct ReportAggregationOptions {
    /// Maximum number of cache entries. 0 disables the cache entirely,
    /// sending every report straight through. Default: 10,000.
    pub num_entries: usize,
    /// Maximum age of an in-progress batch before the flush driver sends
    /// it out. Default: 1s.
    pub flush_interval: Duration,
}

impl Default for ReportAggregationOptions {
    fn default() -> Self {
        Self {
            num_entries: 10_000,
            flush_interval: Duration::from_millis(1000),
        }
    }
}

impl ReportAggregationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache capacity. 0 disables the cache.
    pub fn num_entries(mut self, n: usize) -> Self {
        self.num_entries = n;
        self
    }

    /// Set the flush interval.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}
