//! Operations and metric samples: the telemetry unit shared by check and
//! report traffic.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::distribution::Distribution;
use super::money::Money;
use super::timestamp::Timestamp;

/// How successive samples of a metric relate over time.
///
/// Controls the merge rule applied when two samples of the same metric
/// share a signature. Metrics absent from the configured
/// [`MetricKindMap`] default to [`MetricKind::Delta`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    /// Additive over time: merged samples sum their values.
    #[default]
    Delta,
    /// Monotone counter: the sample with the later end time wins.
    Cumulative,
    /// Point-in-time reading: the sample with the later end time wins.
    Gauge,
}

/// Maps a metric name to its kind.
pub type MetricKindMap = HashMap<String, MetricKind>;

/// The payload of one metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValueData {
    Int64(i64),
    Double(f64),
    Money(Money),
    Distribution(Distribution),
}

/// One metric sample: labels, a time window, and a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Sample labels. Visited in key-sorted order when fingerprinted, so
    /// the stored order never splits cache entries.
    pub labels: HashMap<String, String>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub value: MetricValueData,
}

impl MetricValue {
    /// A labelless int64 sample over the given window. Covers the common
    /// case in quota and request-count metrics.
    pub fn int64(value: i64, start: Option<Timestamp>, end: Option<Timestamp>) -> Self {
        Self {
            labels: HashMap::new(),
            start_time: start,
            end_time: end,
            value: MetricValueData::Int64(value),
        }
    }
}

/// All samples reported for one metric name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValueSet {
    pub metric_name: String,
    pub metric_values: Vec<MetricValue>,
}

/// Whether an operation may be buffered before reaching the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Importance {
    /// May be aggregated and delivered later.
    #[default]
    Low,
    /// Must reach the control plane without buffering.
    High,
}

/// Quota behaviour requested alongside a check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaMode {
    /// Allocate against the limit, failing when exhausted.
    #[default]
    Normal,
    /// Allocate what is available, up to the requested amount.
    BestEffort,
    /// Verify availability without allocating.
    CheckOnly,
}

/// Quota settings carried on a check operation.
///
/// Fingerprinted through its canonical JSON encoding, so two operations
/// differing only here occupy distinct cache entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaProperties {
    pub quota_mode: QuotaMode,
}

/// A single log entry attached to an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Destination log name.
    pub name: String,
    pub timestamp: Option<Timestamp>,
    /// Severity label, e.g. "INFO". Free-form.
    pub severity: String,
    pub text_payload: String,
}

/// A unit of telemetry describing one gateway request (or a merged batch
/// of identically fingerprinted requests).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: String,
    pub operation_name: String,
    pub consumer_id: String,
    pub labels: HashMap<String, String>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub importance: Importance,
    pub quota_properties: Option<QuotaProperties>,
    pub log_entries: Vec<LogEntry>,
    pub metric_value_sets: Vec<MetricValueSet>,
}

/// A quota allocation unit: like an operation, but its samples are
/// int64 deltas interpreted additively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaOperation {
    pub operation_id: String,
    pub method_name: String,
    pub consumer_id: String,
    pub labels: HashMap<String, String>,
    pub quota_metrics: Vec<MetricValueSet>,
    pub quota_mode: QuotaMode,
}
