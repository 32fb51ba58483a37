//! Wire-model types carried between the gateway and the control plane.
//!
//! The client treats these as opaque payloads: it fingerprints selected
//! fields (see [`crate::signature`]) and merges metric samples, but never
//! re-serializes a request beyond what those two things read.

pub mod check;
pub mod distribution;
pub mod money;
pub mod operation;
pub mod quota;
pub mod report;
pub mod timestamp;

pub use check::{CheckError, CheckErrorCode, CheckRequest, CheckResponse};
pub use distribution::{BucketOptions, Distribution};
pub use money::Money;
pub use operation::{
    Importance, LogEntry, MetricKind, MetricKindMap, MetricValue, MetricValueData, MetricValueSet,
    Operation, QuotaMode, QuotaOperation, QuotaProperties,
};
pub use quota::{AllocateQuotaRequest, AllocateQuotaResponse, QuotaError, QuotaErrorCode};
pub use report::{ReportRequest, ReportResponse};
pub use timestamp::Timestamp;

pub(crate) use timestamp::{merge_end_time, merge_start_time};
