//! Positive-response cache for authorization checks.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{CheckAggregationOptions, FlushCallback};
use crate::aggregate::OperationAggregator;
use crate::cache::removed::{CallbackSlot, RemovedItems};
use crate::cache::{AgedLruCache, Eviction};
use crate::error::{Result, TollgateError};
use crate::signature::check_request_signature;
use crate::telemetry;
use crate::types::{
    CheckRequest, CheckResponse, MetricKindMap, MetricValueData, Operation,
};

/// One cached check verdict plus the telemetry accumulated against it.
struct CheckEntry {
    response: CheckResponse,
    /// When the response was last replaced by a transport completion.
    last_refresh: Instant,
    /// Ratio of units the control plane charged to units the request
    /// asked for, from the last response. Used to predict consumption
    /// for requests served from cache.
    quota_scale: f64,
    /// Operations aggregated since the last refresh, dispatched when the
    /// entry is evicted. Only OK responses aggregate, so an entry whose
    /// response carries errors never produces an outbound request.
    pending: Option<OperationAggregator>,
}

impl CheckEntry {
    fn new(response: CheckResponse, quota_scale: f64) -> Self {
        Self {
            response,
            last_refresh: Instant::now(),
            quota_scale,
            pending: None,
        }
    }

    fn set_response(&mut self, response: CheckResponse, quota_scale: f64) {
        self.response = response;
        self.quota_scale = quota_scale;
        self.last_refresh = Instant::now();
    }

    fn aggregate(&mut self, operation: &Operation, metric_kinds: &Arc<MetricKindMap>) {
        match &mut self.pending {
            Some(aggregator) => aggregator.merge(operation),
            None => {
                self.pending = Some(OperationAggregator::new(
                    operation.clone(),
                    metric_kinds.clone(),
                ))
            }
        }
    }

    fn take_pending_request(
        &mut self,
        service_name: &str,
        service_config_id: &str,
    ) -> Option<CheckRequest> {
        self.pending.take().map(|aggregator| CheckRequest {
            service_name: service_name.to_owned(),
            service_config_id: service_config_id.to_owned(),
            operation: aggregator.into_operation(),
        })
    }
}

enum Lookup {
    Miss,
    Stale,
    Fresh(CheckResponse),
}

/// Caches and batches check requests. Thread safe.
pub struct CheckAggregator {
    service_name: String,
    service_config_id: String,
    expiration: Duration,
    flush_interval: Duration,
    metric_kinds: Arc<MetricKindMap>,
    cache: Option<Mutex<AgedLruCache<CheckEntry, CheckRequest>>>,
    callback: CallbackSlot<CheckRequest>,
}

impl CheckAggregator {
    pub fn new(
        service_name: impl Into<String>,
        service_config_id: impl Into<String>,
        options: CheckAggregationOptions,
        metric_kinds: Arc<MetricKindMap>,
    ) -> Self {
        let service_name = service_name.into();
        let service_config_id = service_config_id.into();

        let cache = NonZeroUsize::new(options.num_entries).map(|capacity| {
            let evict_service = service_name.clone();
            let evict_config = service_config_id.clone();
            let mut cache: AgedLruCache<CheckEntry, CheckRequest> = AgedLruCache::new(
                capacity,
                Box::new(move |_, mut entry: CheckEntry| {
                    match entry.take_pending_request(&evict_service, &evict_config) {
                        Some(request) => Eviction::Emit(request),
                        None => Eviction::Discard,
                    }
                }),
            );
            cache.set_age_based_eviction(options.flush_interval);
            Mutex::new(cache)
        });

        Self {
            service_name,
            service_config_id,
            expiration: options.effective_expiration(),
            flush_interval: options.flush_interval,
            metric_kinds,
            cache,
            callback: CallbackSlot::new("check"),
        }
    }

    /// Install or disarm the flush callback that receives evicted pending
    /// operations as outbound check requests.
    pub fn set_flush_callback(&self, callback: Option<FlushCallback<CheckRequest>>) {
        self.callback.set(callback);
    }

    /// Answer a check from the cache.
    ///
    /// `Ok(Some(response))` is a hit: the cached verdict, whether it
    /// passes or denies, and the request's operation has been folded into
    /// the entry's pending batch (pass verdicts only). `Ok(None)` is a
    /// miss: the caller must dispatch to the transport and feed the
    /// completion through [`cache_response`](Self::cache_response).
    pub fn check(&self, request: &CheckRequest) -> Result<Option<CheckResponse>> {
        if request.service_name != self.service_name {
            return Err(TollgateError::InvalidArgument(format!(
                "invalid service name: {} expecting: {}",
                request.service_name, self.service_name
            )));
        }

        let Some(cache) = &self.cache else {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "aggregator" => "check")
                .increment(1);
            return Ok(None);
        };

        let signature = check_request_signature(request);
        let mut removed = RemovedItems::new();
        let outcome = {
            let mut cache = cache.lock().expect("cache lock poisoned");
            let lookup = match cache.lookup(&signature) {
                None => Lookup::Miss,
                Some(entry) if entry.last_refresh.elapsed() >= self.expiration => Lookup::Stale,
                Some(entry) => {
                    if !entry.response.is_rejected() {
                        entry.aggregate(&request.operation, &self.metric_kinds);
                    }
                    Lookup::Fresh(entry.response.clone())
                }
            };

            match lookup {
                Lookup::Miss => None,
                Lookup::Stale => {
                    // Dispatches the pending batch, then reports a miss so
                    // the caller refreshes the verdict.
                    cache.remove(&signature, &mut removed);
                    None
                }
                Lookup::Fresh(response) => Some(response),
            }
        };
        self.callback.dispatch(removed);

        if outcome.is_some() {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "aggregator" => "check").increment(1);
        } else {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "aggregator" => "check").increment(1);
        }

        Ok(outcome)
    }

    /// Store a transport completion as the new cached verdict for the
    /// request's signature.
    ///
    /// Concurrent completions for one signature serialize on the cache
    /// lock: the last writer wins on the stored response, and any pending
    /// aggregated operation is left in place rather than overwritten.
    pub fn cache_response(&self, request: &CheckRequest, response: CheckResponse) {
        let Some(cache) = &self.cache else {
            return;
        };

        let quota_scale = predicted_scale(request, &response);
        let signature = check_request_signature(request);
        let mut removed = RemovedItems::new();
        {
            let mut cache = cache.lock().expect("cache lock poisoned");
            let mut response = Some(response);
            if let Some(entry) = cache.lookup(&signature) {
                entry.set_response(response.take().expect("response consumed once"), quota_scale);
            }
            if let Some(response) = response {
                cache.insert(signature, CheckEntry::new(response, quota_scale), &mut removed);
            }
        }
        self.callback.dispatch(removed);
    }

    /// The quota scale predicted for this request by its cached entry.
    pub fn predicted_quota_scale(&self, request: &CheckRequest) -> Option<f64> {
        let cache = self.cache.as_ref()?;
        let signature = check_request_signature(request);
        let mut cache = cache.lock().expect("cache lock poisoned");
        cache.lookup(&signature).map(|entry| entry.quota_scale)
    }

    /// Evict entries older than the flush interval, dispatching their
    /// pending operations. Driven by the periodic timer.
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

    /// Evict everything, dispatching pending operations. Called at
    /// shutdown.
    pub fn flush_all(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        debug!("removing all entries of the check aggregator");
        let mut removed = RemovedItems::new();
        cache
            .lock()
            .expect("cache lock poisoned")
            .remove_all(&mut removed);
        self.callback.dispatch(removed);
    }

    /// How long from now the next flush is due, or `None` when the cache
    /// is disabled and flushing is pointless.
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

/// Ratio of charged to requested units, from the response's per-metric
/// accounting against the request's int64 samples.
fn predicted_scale(request: &CheckRequest, response: &CheckResponse) -> f64 {
    let requested: i64 = request
        .operation
        .metric_value_sets
        .iter()
        .flat_map(|set| &set.metric_values)
        .filter_map(|value| match value.value {
            MetricValueData::Int64(amount) => Some(amount),
            _ => None,
        })
        .sum();
    if requested <= 0 {
        return 0.0;
    }
    let consumed: i64 = response.quota_consumed.values().sum();
    consumed as f64 / requested as f64
}
