//! Per-client call counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal atomic counters, shared with flush callbacks.
#[derive(Debug, Default)]
pub(crate) struct ClientStats {
    pub(crate) total_called_checks: AtomicU64,
    pub(crate) send_checks_by_flush: AtomicU64,
    pub(crate) send_checks_in_flight: AtomicU64,
    pub(crate) total_called_quotas: AtomicU64,
    pub(crate) send_quotas_by_flush: AtomicU64,
    pub(crate) send_quotas_in_flight: AtomicU64,
    pub(crate) total_called_reports: AtomicU64,
    pub(crate) send_reports_by_flush: AtomicU64,
    pub(crate) send_reports_in_flight: AtomicU64,
    pub(crate) send_report_operations: AtomicU64,
}

impl ClientStats {
    pub(crate) fn snapshot(&self) -> Statistics {
        Statistics {
            total_called_checks: self.total_called_checks.load(Ordering::Relaxed),
            send_checks_by_flush: self.send_checks_by_flush.load(Ordering::Relaxed),
            send_checks_in_flight: self.send_checks_in_flight.load(Ordering::Relaxed),
            total_called_quotas: self.total_called_quotas.load(Ordering::Relaxed),
            send_quotas_by_flush: self.send_quotas_by_flush.load(Ordering::Relaxed),
            send_quotas_in_flight: self.send_quotas_in_flight.load(Ordering::Relaxed),
            total_called_reports: self.total_called_reports.load(Ordering::Relaxed),
            send_reports_by_flush: self.send_reports_by_flush.load(Ordering::Relaxed),
            send_reports_in_flight: self.send_reports_in_flight.load(Ordering::Relaxed),
            send_report_operations: self.send_report_operations.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of a client's call counters.
///
/// `*_in_flight` counts transport dispatches made inline on a cache
/// miss or bypass; `*_by_flush` counts dispatches made by the flush
/// driver on behalf of evicted cache entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub total_called_checks: u64,
    pub send_checks_by_flush: u64,
    pub send_checks_in_flight: u64,
    pub total_called_quotas: u64,
    pub send_quotas_by_flush: u64,
    pub send_quotas_in_flight: u64,
    pub total_called_reports: u64,
    pub send_reports_by_flush: u64,
    pub send_reports_in_flight: u64,
    /// Total operations carried by dispatched report requests.
    pub send_report_operations: u64,
}
