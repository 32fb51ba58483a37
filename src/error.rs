//! Tollgate error types

use crate::types::AllocateQuotaResponse;

/// How a quota rejection surfaces to the caller.
///
/// The control plane reports rejections inside an otherwise successful
/// `AllocateQuota` response. The client translates the first error code
/// into one of these kinds; see [`TollgateError::QuotaRejected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaRejectKind {
    /// The consumer is not allowed to proceed (out of quota, blocked,
    /// suspended, billing or service disabled).
    PermissionDenied,
    /// The request identifies a project or credential that does not exist
    /// or is no longer valid.
    InvalidArgument,
    /// An error code the client does not recognize.
    Internal,
}

impl std::fmt::Display for QuotaRejectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaRejectKind::PermissionDenied => write!(f, "permission denied"),
            QuotaRejectKind::InvalidArgument => write!(f, "invalid argument"),
            QuotaRejectKind::Internal => write!(f, "internal"),
        }
    }
}

/// Tollgate error types
#[derive(Debug, thiserror::Error)]
pub enum TollgateError {
    // Validation errors, produced locally before anything is cached or sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The quota allocation was rejected by the control plane.
    ///
    /// The rejecting response is cached, so repeated calls for the same
    /// request signature return this error without a round trip. The full
    /// cached response rides along for callers that need the error list.
    #[error("{kind}: {message}")]
    QuotaRejected {
        kind: QuotaRejectKind,
        message: String,
        response: Box<AllocateQuotaResponse>,
    },

    // Transport errors are surfaced verbatim; the cache is not updated.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TollgateError {
    /// Returns the reject kind if this is a cached quota rejection.
    pub fn quota_reject_kind(&self) -> Option<QuotaRejectKind> {
        match self {
            TollgateError::QuotaRejected { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Result type alias for tollgate operations
pub type Result<T> = std::result::Result<T, TollgateError>;
