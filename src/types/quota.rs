//! Quota allocation request and response carriers.

use serde::{Deserialize, Serialize};

use super::operation::{MetricValueSet, QuotaOperation};

/// Why a quota allocation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaErrorCode {
    Unspecified,
    ResourceExhausted,
    ProjectSuspended,
    ServiceNotEnabled,
    BillingNotActive,
    ProjectDeleted,
    ProjectInvalid,
    IpAddressBlocked,
    RefererBlocked,
    ClientAppBlocked,
    ApiKeyInvalid,
    ApiKeyExpired,
    ProjectStatusUnavailable,
    ServiceStatusUnavailable,
    BillingStatusUnavailable,
}

/// One reason a quota allocation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaError {
    pub code: QuotaErrorCode,
    /// What the error applies to, e.g. "user:integration_test_user".
    pub subject: String,
    pub description: String,
}

/// Request to allocate quota for a single operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocateQuotaRequest {
    pub service_name: String,
    pub service_config_id: String,
    pub allocate_operation: Option<QuotaOperation>,
}

/// The control plane's answer to an allocation.
///
/// A response with a non-empty `allocate_errors` list is still cached:
/// subsequent hits return the rejection without a round trip until the
/// next refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocateQuotaResponse {
    /// Echoes the operation id of the allocating request.
    pub operation_id: String,
    pub service_config_id: String,
    pub allocate_errors: Vec<QuotaError>,
    /// Per-metric accounting of what this allocation consumed.
    pub quota_metrics: Vec<MetricValueSet>,
}

impl AllocateQuotaResponse {
    /// Whether this response rejects the allocation.
    pub fn is_rejected(&self) -> bool {
        !self.allocate_errors.is_empty()
    }
}
