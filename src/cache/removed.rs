//! Deferred delivery of eviction-produced requests.
//!
//! Cache evictions happen under the cache lock, but the flush callback
//! they trigger may legitimately call back into the same aggregator
//! (a refresh completion calls `cache_response`, for example). Invoking
//! it under the lock would deadlock. Every mutating cache call therefore
//! writes evictee requests into a caller-owned [`RemovedItems`] buffer,
//! and the aggregator hands the buffer to its [`CallbackSlot`] only after
//! the cache lock has been released.

use std::sync::Mutex;

/// A flush callback: receives each outbound request produced by cache
/// evictions.
pub(crate) type FlushCallback<R> = Box<dyn Fn(R) + Send + Sync>;

/// Per-call buffer of outbound requests produced while the cache lock
/// was held.
pub(crate) struct RemovedItems<R> {
    pub(crate) items: Vec<R>,
}

impl<R> RemovedItems<R> {
    pub(crate) fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub(crate) fn push(&mut self, item: R) {
        self.items.push(item);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Holds an aggregator's flush callback behind its own mutex, so the
/// callback can be disarmed while transport completions are still in
/// flight.
pub(crate) struct CallbackSlot<R> {
    callback: Mutex<Option<FlushCallback<R>>>,
    /// `aggregator` label on the flushed-requests counter.
    metric_label: &'static str,
}

impl<R> CallbackSlot<R> {
    pub(crate) fn new(metric_label: &'static str) -> Self {
        Self {
            callback: Mutex::new(None),
            metric_label,
        }
    }

    /// Install or disarm the callback. Disarming (`None`) makes later
    /// evictions drop their requests silently, which is the shutdown
    /// contract.
    pub(crate) fn set(&self, callback: Option<FlushCallback<R>>) {
        *self.callback.lock().expect("callback lock poisoned") = callback;
    }

    /// Deliver every buffered request to the callback.
    ///
    /// Must only be called once the cache lock has been released.
    pub(crate) fn dispatch(&self, removed: RemovedItems<R>) {
        if removed.is_empty() {
            return;
        }
        let guard = self.callback.lock().expect("callback lock poisoned");
        let Some(callback) = guard.as_ref() else {
            return;
        };
        for item in removed.items {
            metrics::counter!(
                crate::telemetry::FLUSHED_REQUESTS_TOTAL,
                "aggregator" => self.metric_label
            )
            .increment(1);
            callback(item);
        }
    }
}
