//! Merge engines for identically fingerprinted operations.
//!
//! [`OperationAggregator`] folds report operations together under
//! per-metric-kind rules; [`QuotaOperationAggregator`] does the simpler
//! int64-delta-only fold for quota operations. Both keep merged samples
//! keyed by metric-value signature and rebuild the flat sample lists on
//! export.

mod operation;
mod quota_operation;

pub(crate) use operation::OperationAggregator;
pub(crate) use quota_operation::QuotaOperationAggregator;
