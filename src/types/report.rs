//! Report request and response carriers.

use serde::{Deserialize, Serialize};

use super::operation::Operation;

/// Post-flight telemetry for one or more operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub service_name: String,
    pub service_config_id: String,
    pub operations: Vec<Operation>,
}

impl ReportRequest {
    /// A request carrying a single operation, as produced when a cache
    /// eviction turns a merged batch into an outbound report.
    pub fn for_operation(
        service_name: impl Into<String>,
        service_config_id: impl Into<String>,
        operation: Operation,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_config_id: service_config_id.into(),
            operations: vec![operation],
        }
    }
}

/// The control plane's acknowledgement of a report.
///
/// Partial processing failures are reported out-of-band by the control
/// plane; the client treats any acknowledged report as delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResponse {
    pub service_config_id: String,
}
