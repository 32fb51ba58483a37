//! Check request and response carriers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::operation::Operation;

/// Why a check was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckErrorCode {
    NotFound,
    PermissionDenied,
    ResourceExhausted,
    ServiceNotActivated,
    BillingDisabled,
    ProjectDeleted,
    ProjectInvalid,
    IpAddressBlocked,
    RefererBlocked,
    ClientAppBlocked,
    ApiKeyInvalid,
    ApiKeyExpired,
}

/// One reason a check did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckError {
    pub code: CheckErrorCode,
    /// What the error applies to, e.g. "project:my-project".
    pub subject: String,
    pub detail: String,
}

/// Pre-flight authorization and quota check for a single operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub service_name: String,
    pub service_config_id: String,
    pub operation: Operation,
}

/// The control plane's verdict on a check.
///
/// An empty `check_errors` list means the request may proceed. A
/// non-empty list is cached as authoritative for the entry's lifetime,
/// so known-bad credentials do not hammer the control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResponse {
    /// Echoes the operation id of the checked request.
    pub operation_id: String,
    pub service_config_id: String,
    pub check_errors: Vec<CheckError>,
    /// Units actually charged per quota metric when the control plane
    /// performed inline quota work during the check.
    pub quota_consumed: BTreeMap<String, i64>,
}

impl CheckResponse {
    /// Whether this response denies the request.
    pub fn is_rejected(&self) -> bool {
        !self.check_errors.is_empty()
    }
}
