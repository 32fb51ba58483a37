//! Transport seams to the control plane.
//!
//! The client never speaks a wire protocol itself. Consumers implement
//! these traits over whatever HTTP or RPC stack reaches their control
//! plane; the client calls them on cache misses and when the flush
//! driver dispatches buffered requests.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AllocateQuotaRequest, AllocateQuotaResponse, CheckRequest, CheckResponse, ReportRequest,
    ReportResponse,
};

/// Sends check requests to the control plane.
#[async_trait]
pub trait CheckTransport: Send + Sync {
    /// Perform one check round trip. Errors are surfaced to the caller
    /// and never cached.
    async fn check(&self, request: CheckRequest) -> Result<CheckResponse>;
}

/// Sends quota allocation requests to the control plane.
#[async_trait]
pub trait QuotaTransport: Send + Sync {
    /// Perform one allocation round trip. A response carrying
    /// `allocate_errors` is still `Ok`: rejection is data, not a
    /// transport failure.
    async fn allocate_quota(&self, request: AllocateQuotaRequest)
        -> Result<AllocateQuotaResponse>;
}

/// Sends report requests to the control plane.
#[async_trait]
pub trait ReportTransport: Send + Sync {
    /// Deliver one report batch.
    async fn report(&self, request: ReportRequest) -> Result<ReportResponse>;
}
