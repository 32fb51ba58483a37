//! Write-batching buffer for telemetry reports.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use super::{FlushCallback, ReportAggregationOptions};
use crate::aggregate::OperationAggregator;
use crate::cache::removed::{CallbackSlot, RemovedItems};
use crate::cache::{AgedLruCache, Eviction};
use crate::error::{Result, TollgateError};
use crate::signature::report_operation_signature;
use crate::telemetry;
use crate::types::{Importance, MetricKindMap, ReportRequest};

/// What happened to a report handed to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Every operation was merged into the cache; the caller is done.
    Buffered,
    /// The request must go straight to the transport: it carries a
    /// high-importance operation, or the cache is disabled.
    Bypass,
}

/// Caches and batches report requests. Thread safe.
pub struct ReportAggregator {
    service_name: String,
    flush_interval: Duration,
    metric_kinds: Arc<MetricKindMap>,
    cache: Option<Mutex<AgedLruCache<OperationAggregator, ReportRequest>>>,
    callback: CallbackSlot<ReportRequest>,
}

impl ReportAggregator {
    pub fn new(
        service_name: impl Into<String>,
        service_config_id: impl Into<String>,
        options: ReportAggregationOptions,
        metric_kinds: Arc<MetricKindMap>,
    ) -> Self {
        let service_name = service_name.into();
        let service_config_id = service_config_id.into();

        let cache = NonZeroUsize::new(options.num_entries).map(|capacity| {
            let evict_service = service_name.clone();
            let evict_config = service_config_id.clone();
            let mut cache: AgedLruCache<OperationAggregator, ReportRequest> = AgedLruCache::new(
                capacity,
                Box::new(move |_, aggregator: OperationAggregator| {
                    Eviction::Emit(ReportRequest::for_operation(
                        evict_service.clone(),
                        evict_config.clone(),
                        aggregator.into_operation(),
                    ))
                }),
            );
            cache.set_age_based_eviction(options.flush_interval);
            Mutex::new(cache)
        });

        Self {
            service_name,
            flush_interval: options.flush_interval,
            metric_kinds,
            cache,
            callback: CallbackSlot::new("report"),
        }
    }

    /// Install or disarm the flush callback that receives evicted batches
    /// as outbound report requests.
    pub fn set_flush_callback(&self, callback: Option<FlushCallback<ReportRequest>>) {
        self.callback.set(callback);
    }

    /// Buffer a report.
    ///
    /// A request carrying any high-importance operation is not cached at
    /// all: the whole request comes back as [`ReportOutcome::Bypass`] for
    /// the caller to dispatch verbatim. Otherwise each operation merges
    /// into (or creates) the batch for its signature.
    pub fn report(&self, request: &ReportRequest) -> Result<ReportOutcome> {
        if request.service_name != self.service_name {
            return Err(TollgateError::InvalidArgument(format!(
                "invalid service name: {} expecting: {}",
                request.service_name, self.service_name
            )));
        }

        let has_high_importance = request
            .operations
            .iter()
            .any(|operation| operation.importance != Importance::Low);
        let cache = match &self.cache {
            Some(cache) if !has_high_importance => cache,
            _ => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "aggregator" => "report")
                    .increment(1);
                return Ok(ReportOutcome::Bypass);
            }
        };

        let mut removed = RemovedItems::new();
        {
            let mut cache = cache.lock().expect("cache lock poisoned");
            for operation in &request.operations {
                let signature = report_operation_signature(operation);
                let merged = match cache.lookup(&signature) {
                    Some(aggregator) => {
                        aggregator.merge(operation);
                        true
                    }
                    None => false,
                };
                if merged {
                    metrics::counter!(telemetry::CACHE_HITS_TOTAL, "aggregator" => "report")
                        .increment(1);
                } else {
                    metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "aggregator" => "report")
                        .increment(1);
                    cache.insert(
                        signature,
                        OperationAggregator::new(operation.clone(), self.metric_kinds.clone()),
                        &mut removed,
                    );
                }
            }
        }
        self.callback.dispatch(removed);

        Ok(ReportOutcome::Buffered)
    }

    /// Send out batches older than the flush interval. Driven by the
    /// periodic timer.
    pub fn flush(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        let mut removed = RemovedItems::new();
        cache
            .lock()
            .expect("cache lock poisoned")
            .remove_expired_entries(&mut removed);
        self.callback.dispatch(removed);
    }

    /// Send out every buffered batch. Called at shutdown.
    pub fn flush_all(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        debug!("removing all entries of the report aggregator");
        let mut removed = RemovedItems::new();
        cache
            .lock()
            .expect("cache lock poisoned")
            .remove_all(&mut removed);
        self.callback.dispatch(removed);
    }

    /// How long from now the next flush is due, or `None` when the cache
    /// is disabled.
    pub fn next_flush_interval(&self) -> Option<Duration> {
        self.cache.as_ref().map(|_| self.flush_interval)
    }

    /// Number of entries currently cached.
    pub fn entry_count(&self) -> usize {
        self.cache
            .as_ref()
            .map(|cache| cache.lock().expect("cache lock poisoned").len())
            .unwrap_or(0)
    }
}
