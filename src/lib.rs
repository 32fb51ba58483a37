//! Tollgate - client-side aggregation for control-plane traffic
//!
//! An API gateway that consults a remote quota/billing/telemetry control
//! plane pays up to three extra round trips per user request: a
//! pre-flight authorization `Check`, a quota `Allocate`, and a
//! post-flight `Report`. Tollgate absorbs that traffic into a small set
//! of background calls:
//!
//! - identical requests are deduplicated into shared cached outcomes,
//! - delta-style telemetry is merged across time windows,
//! - quota grants are refreshed in place without blocking user requests,
//! - buffered data is evicted and dispatched on a periodic timer.
//!
//! The cache is a best-effort predictor, not the source of truth; the
//! control plane reconciles exact accounting from the aggregated traffic
//! it receives.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use tollgate::{
//!     CheckRequest, CheckResponse, CheckTransport, ControlClient, Operation, Result,
//! };
//!
//! struct HttpTransport;
//!
//! #[async_trait]
//! impl CheckTransport for HttpTransport {
//!     async fn check(&self, request: CheckRequest) -> Result<CheckResponse> {
//!         // Speak HTTP/gRPC to the control plane here.
//!         Ok(CheckResponse {
//!             operation_id: request.operation.operation_id,
//!             ..Default::default()
//!         })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = ControlClient::builder("library.googleapis.com")
//!         .service_config_id("2016-09-19r0")
//!         .check_transport(HttpTransport)
//!         .build()?;
//!
//!     let request = CheckRequest {
//!         service_name: "library.googleapis.com".into(),
//!         service_config_id: "2016-09-19r0".into(),
//!         operation: Operation {
//!             operation_id: "request-1".into(),
//!             operation_name: "google.example.library.v1.ListShelves".into(),
//!             consumer_id: "project:my-project".into(),
//!             ..Default::default()
//!         },
//!     };
//!
//!     let response = client.check(&request).await?;
//!     if response.is_rejected() {
//!         println!("denied: {:?}", response.check_errors);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! Every cache is guarded by a single mutex and no operation suspends
//! while holding it; transport calls never happen under a cache lock.
//! Eviction-triggered dispatches are buffered per call and delivered to
//! the flush callbacks only after the lock is released, so a callback may
//! safely call back into the aggregator that emitted it.

pub mod aggregator;
pub mod client;
pub mod error;
pub mod signature;
pub mod telemetry;
pub mod types;

mod aggregate;
mod cache;

// Re-export main types at crate root
pub use client::{ControlClient, ControlClientBuilder, Statistics};
pub use client::{CheckTransport, PeriodicTimer, QuotaTransport, ReportTransport, TimerHandle};
pub use error::{QuotaRejectKind, Result, TollgateError};

// Re-export aggregation options and aggregators
pub use aggregator::{
    CheckAggregationOptions, CheckAggregator, QuotaAggregationOptions, QuotaAggregator,
    ReportAggregationOptions, ReportAggregator, ReportOutcome,
};

// Re-export signature helpers
pub use signature::{
    allocate_quota_request_signature, check_request_signature, report_metric_value_signature,
    report_operation_signature, Signature,
};

// Re-export all wire-model types
pub use types::{
    AllocateQuotaRequest, AllocateQuotaResponse, BucketOptions, CheckError, CheckErrorCode,
    CheckRequest, CheckResponse, Distribution, Importance, LogEntry, MetricKind, MetricKindMap,
    MetricValue, MetricValueData, MetricValueSet, Money, Operation, QuotaError, QuotaErrorCode,
    QuotaMode, QuotaOperation, QuotaProperties, ReportRequest, ReportResponse, Timestamp,
};
