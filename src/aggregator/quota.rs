//! Cache of quota grants with in-place refresh.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

use super::{FlushCallback, QuotaAggregationOptions};
use crate::aggregate::QuotaOperationAggregator;
use crate::cache::removed::{CallbackSlot, RemovedItems};
use crate::cache::{AgedLruCache, Eviction};
use crate::error::{Result, TollgateError};
use crate::signature::allocate_quota_request_signature;
use crate::telemetry;
use crate::types::{AllocateQuotaRequest, AllocateQuotaResponse, QuotaOperation};

/// One cached quota grant plus the tokens consumed against it since the
/// last refresh.
struct QuotaEntry {
    response: AllocateQuotaResponse,
    /// Tokens aggregated since the last refresh, folded into the next
    /// refresh request.
    pending: Option<QuotaOperationAggregator>,
    /// Set by every hit-path aggregation; only dirty entries emit a
    /// refresh when they age out.
    dirty: bool,
}

impl QuotaEntry {
    /// A zero-content entry installed on a cold miss, so concurrent
    /// callers during the first round trip see an empty grant instead of
    /// stampeding the control plane.
    fn placeholder() -> Self {
        Self::new(AllocateQuotaResponse::default())
    }

    fn new(response: AllocateQuotaResponse) -> Self {
        Self {
            response,
            pending: None,
            dirty: false,
        }
    }

    fn aggregate(&mut self, operation: &QuotaOperation) {
        match &mut self.pending {
            Some(aggregator) => aggregator.merge_operation(operation),
            None => self.pending = Some(QuotaOperationAggregator::new(operation.clone())),
        }
        self.dirty = true;
    }

    fn take_pending(&mut self) -> Option<QuotaOperationAggregator> {
        self.dirty = false;
        self.pending.take()
    }

    fn take_refresh_request(
        &mut self,
        service_name: &str,
        service_config_id: &str,
    ) -> Option<AllocateQuotaRequest> {
        self.take_pending().map(|aggregator| AllocateQuotaRequest {
            service_name: service_name.to_owned(),
            service_config_id: service_config_id.to_owned(),
            allocate_operation: Some(aggregator.into_operation()),
        })
    }
}

/// Caches and aggregates quota allocations. Thread safe.
pub struct QuotaAggregator {
    service_name: String,
    service_config_id: String,
    refresh_interval: Duration,
    cache: Option<Mutex<AgedLruCache<QuotaEntry, AllocateQuotaRequest>>>,
    callback: CallbackSlot<AllocateQuotaRequest>,
}

impl QuotaAggregator {
    pub fn new(
        service_name: impl Into<String>,
        service_config_id: impl Into<String>,
        options: QuotaAggregationOptions,
    ) -> Self {
        let service_name = service_name.into();
        let service_config_id = service_config_id.into();

        let cache = NonZeroUsize::new(options.num_entries).map(|capacity| {
            let evict_service = service_name.clone();
            let evict_config = service_config_id.clone();
            let mut cache: AgedLruCache<QuotaEntry, AllocateQuotaRequest> = AgedLruCache::new(
                capacity,
                Box::new(move |_, mut entry: QuotaEntry| {
                    // A dirty entry has consumed tokens to report: emit a
                    // refresh and keep serving the grant while it runs.
                    // The refresh response lands via cache_response.
                    if entry.dirty {
                        if let Some(request) =
                            entry.take_refresh_request(&evict_service, &evict_config)
                        {
                            return Eviction::Requeue(entry, request);
                        }
                    }
                    Eviction::Discard
                }),
            );
            cache.set_age_based_eviction(options.refresh_interval);
            Mutex::new(cache)
        });

        Self {
            service_name,
            service_config_id,
            refresh_interval: options.refresh_interval,
            cache,
            callback: CallbackSlot::new("quota"),
        }
    }

    /// Install or disarm the flush callback that receives refresh
    /// requests for aged-out dirty entries.
    pub fn set_flush_callback(&self, callback: Option<FlushCallback<AllocateQuotaRequest>>) {
        self.callback.set(callback);
    }

    /// Answer an allocation from the cache.
    ///
    /// `Ok(Some(response))` is a hit: the request's tokens were folded
    /// into the entry's pending refresh and the cached grant (or cached
    /// rejection) is returned. `Ok(None)` is a miss: a placeholder was
    /// installed and the caller must dispatch to the transport, feeding
    /// the completion through [`cache_response`](Self::cache_response).
    pub fn quota(&self, request: &AllocateQuotaRequest) -> Result<Option<AllocateQuotaResponse>> {
        if request.service_name != self.service_name {
            return Err(TollgateError::InvalidArgument(format!(
                "invalid service name: {} expecting: {}",
                request.service_name, self.service_name
            )));
        }
        let Some(operation) = &request.allocate_operation else {
            return Err(TollgateError::InvalidArgument(
                "allocate operation field is required".into(),
            ));
        };

        let Some(cache) = &self.cache else {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "aggregator" => "quota")
                .increment(1);
            return Ok(None);
        };

        let signature = allocate_quota_request_signature(request);
        let mut removed = RemovedItems::new();
        let outcome = {
            let mut cache = cache.lock().expect("cache lock poisoned");
            let hit = match cache.lookup(&signature) {
                Some(entry) => {
                    entry.aggregate(operation);
                    Some(entry.response.clone())
                }
                None => None,
            };

            match hit {
                Some(response) => Some(response),
                None => {
                    debug!("inserting placeholder quota entry for aggregation");
                    cache.insert(signature, QuotaEntry::placeholder(), &mut removed);
                    None
                }
            }
        };
        self.callback.dispatch(removed);

        if outcome.is_some() {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "aggregator" => "quota").increment(1);
        } else {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "aggregator" => "quota").increment(1);
        }

        Ok(outcome)
    }

    /// Store a transport completion as the cached grant for the request's
    /// signature.
    ///
    /// Tokens aggregated against the replaced entry (a placeholder or a
    /// grant mid-refresh) carry over into the new entry's pending state,
    /// so nothing consumed during the round trip is lost.
    pub fn cache_response(&self, request: &AllocateQuotaRequest, response: AllocateQuotaResponse) {
        let Some(cache) = &self.cache else {
            return;
        };

        let signature = allocate_quota_request_signature(request);
        let mut removed = RemovedItems::new();
        {
            let mut cache = cache.lock().expect("cache lock poisoned");
            let carried = match cache.lookup(&signature) {
                Some(existing) => existing.take_pending(),
                None => None,
            };

            let mut entry = QuotaEntry::new(response);
            if let Some(pending) = carried {
                entry.pending = Some(pending);
                entry.dirty = true;
            }
            // The replaced entry's pending state was just taken, so the
            // replacement eviction discards cleanly.
            cache.insert(signature, entry, &mut removed);
        }
        self.callback.dispatch(removed);
    }

    /// Refresh aged-out dirty grants in place. Driven by the periodic
    /// timer.
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

    /// Evict everything, emitting a final refresh for dirty entries.
    /// Called at shutdown.
    pub fn flush_all(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        debug!("removing all entries of the quota aggregator");
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
        self.cache.as_ref().map(|_| self.refresh_interval)
    }

    /// Number of entries currently cached.
    pub fn entry_count(&self) -> usize {
        self.cache
            .as_ref()
            .map(|cache| cache.lock().expect("cache lock poisoned").len())
            .unwrap_or(0)
    }
}
