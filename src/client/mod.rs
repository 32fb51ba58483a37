//! The client façade: aggregators wired to transports and a flush timer.
//!
//! [`ControlClient`] owns the three aggregators, dispatches cache misses
//! to the configured transports, and runs one periodic timer whose tick
//! flushes all three caches. Flush-driven dispatches are spawned onto the
//! ambient tokio runtime so no cache lock is ever held across a
//! transport call.

pub mod timer;
pub mod transport;

mod stats;

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tracing::warn;

use crate::aggregator::{
    CheckAggregationOptions, CheckAggregator, QuotaAggregationOptions, QuotaAggregator,
    ReportAggregationOptions, ReportAggregator, ReportOutcome,
};
use crate::error::{QuotaRejectKind, Result, TollgateError};
use crate::types::{
    AllocateQuotaRequest, AllocateQuotaResponse, CheckRequest, CheckResponse, MetricKindMap,
    QuotaErrorCode, ReportRequest, ReportResponse,
};

pub use stats::Statistics;
pub(crate) use stats::ClientStats;
pub use timer::{PeriodicTimer, TimerHandle, TokioTimer};
pub use transport::{CheckTransport, QuotaTransport, ReportTransport};

/// Client for a quota/billing/telemetry control plane.
///
/// Absorbs per-request Check / AllocateQuota / Report traffic into a
/// small set of aggregated background calls while preserving the
/// semantics the control plane expects. One instance serves one
/// `service_name`; it is `Send + Sync` and meant to be shared across
/// request handlers.
pub struct ControlClient {
    service_name: String,
    check_aggregator: Arc<CheckAggregator>,
    quota_aggregator: Arc<QuotaAggregator>,
    report_aggregator: Arc<ReportAggregator>,
    check_transport: Option<Arc<dyn CheckTransport>>,
    quota_transport: Option<Arc<dyn QuotaTransport>>,
    report_transport: Option<Arc<dyn ReportTransport>>,
    stats: Arc<ClientStats>,
    timer: Mutex<Option<Box<dyn TimerHandle>>>,
}

impl ControlClient {
    /// Start configuring a client for the given service.
    pub fn builder(service_name: impl Into<String>) -> ControlClientBuilder {
        ControlClientBuilder::new(service_name)
    }

    /// Pre-flight authorization check.
    ///
    /// Served from cache when the signature is known and fresh; otherwise
    /// dispatched to the configured transport and the completion cached.
    /// A cached response carrying check errors is returned as `Ok`: the
    /// denial is the verdict, not a client failure.
    pub async fn check(&self, request: &CheckRequest) -> Result<CheckResponse> {
        self.stats.total_called_checks.fetch_add(1, Ordering::Relaxed);
        let transport = self
            .check_transport
            .clone()
            .ok_or_else(|| no_transport("check"))?;
        self.check_via(transport.as_ref(), request).await
    }

    /// [`check`](Self::check) routed through a caller-supplied transport.
    ///
    /// The request still participates in the shared cache; only this
    /// call's miss dispatch uses the override.
    pub async fn check_with_transport(
        &self,
        transport: &dyn CheckTransport,
        request: &CheckRequest,
    ) -> Result<CheckResponse> {
        self.stats.total_called_checks.fetch_add(1, Ordering::Relaxed);
        self.check_via(transport, request).await
    }

    /// Blocking form of [`check`](Self::check).
    ///
    /// Runs the async call to completion on this thread. Inside a tokio
    /// runtime this requires the multi-thread flavour.
    pub fn check_blocking(&self, request: &CheckRequest) -> Result<CheckResponse> {
        block_on(self.check(request))
    }

    async fn check_via(
        &self,
        transport: &dyn CheckTransport,
        request: &CheckRequest,
    ) -> Result<CheckResponse> {
        if let Some(response) = self.check_aggregator.check(request)? {
            return Ok(response);
        }

        self.stats
            .send_checks_in_flight
            .fetch_add(1, Ordering::Relaxed);
        let response = transport.check(request.clone()).await?;
        self.check_aggregator.cache_response(request, response.clone());
        Ok(response)
    }

    /// Allocate quota for one operation.
    ///
    /// Served from cache when possible; consumed tokens accumulate on the
    /// entry and reach the control plane with the next refresh. A
    /// response carrying `allocate_errors` is cached, then surfaced as
    /// [`TollgateError::QuotaRejected`].
    pub async fn allocate_quota(
        &self,
        request: &AllocateQuotaRequest,
    ) -> Result<AllocateQuotaResponse> {
        self.stats.total_called_quotas.fetch_add(1, Ordering::Relaxed);
        let transport = self
            .quota_transport
            .clone()
            .ok_or_else(|| no_transport("quota"))?;
        self.quota_via(transport.as_ref(), request).await
    }

    /// [`allocate_quota`](Self::allocate_quota) routed through a
    /// caller-supplied transport.
    pub async fn allocate_quota_with_transport(
        &self,
        transport: &dyn QuotaTransport,
        request: &AllocateQuotaRequest,
    ) -> Result<AllocateQuotaResponse> {
        self.stats.total_called_quotas.fetch_add(1, Ordering::Relaxed);
        self.quota_via(transport, request).await
    }

    /// Blocking form of [`allocate_quota`](Self::allocate_quota).
    pub fn allocate_quota_blocking(
        &self,
        request: &AllocateQuotaRequest,
    ) -> Result<AllocateQuotaResponse> {
        block_on(self.allocate_quota(request))
    }

    async fn quota_via(
        &self,
        transport: &dyn QuotaTransport,
        request: &AllocateQuotaRequest,
    ) -> Result<AllocateQuotaResponse> {
        if let Some(response) = self.quota_aggregator.quota(request)? {
            return translate_quota_response(&self.service_name, response);
        }

        self.stats
            .send_quotas_in_flight
            .fetch_add(1, Ordering::Relaxed);
        let response = transport.allocate_quota(request.clone()).await?;
        // Rejections are cached too: subsequent hits return the denial
        // without a round trip.
        self.quota_aggregator.cache_response(request, response.clone());
        translate_quota_response(&self.service_name, response)
    }

    /// Deliver telemetry for one or more operations.
    ///
    /// Low-importance operations are merged into the report cache and the
    /// call returns immediately. A request carrying any high-importance
    /// operation bypasses the cache and goes to the transport verbatim.
    pub async fn report(&self, request: &ReportRequest) -> Result<ReportResponse> {
        self.stats.total_called_reports.fetch_add(1, Ordering::Relaxed);
        let transport = self
            .report_transport
            .clone()
            .ok_or_else(|| no_transport("report"))?;
        self.report_via(transport.as_ref(), request).await
    }

    /// [`report`](Self::report) routed through a caller-supplied
    /// transport.
    pub async fn report_with_transport(
        &self,
        transport: &dyn ReportTransport,
        request: &ReportRequest,
    ) -> Result<ReportResponse> {
        self.stats.total_called_reports.fetch_add(1, Ordering::Relaxed);
        self.report_via(transport, request).await
    }

    /// Blocking form of [`report`](Self::report).
    pub fn report_blocking(&self, request: &ReportRequest) -> Result<ReportResponse> {
        block_on(self.report(request))
    }

    async fn report_via(
        &self,
        transport: &dyn ReportTransport,
        request: &ReportRequest,
    ) -> Result<ReportResponse> {
        match self.report_aggregator.report(request)? {
            ReportOutcome::Buffered => Ok(ReportResponse::default()),
            ReportOutcome::Bypass => {
                self.stats
                    .send_reports_in_flight
                    .fetch_add(1, Ordering::Relaxed);
                self.stats
                    .send_report_operations
                    .fetch_add(request.operations.len() as u64, Ordering::Relaxed);
                transport.report(request.clone()).await
            }
        }
    }

    /// Snapshot the call counters.
    pub fn statistics(&self) -> Statistics {
        self.stats.snapshot()
    }

    /// Evict aged-out entries from all three caches, dispatching what
    /// they buffered. The periodic timer calls this; exposed for callers
    /// that drive flushing themselves.
    pub fn flush(&self) {
        self.check_aggregator.flush();
        self.quota_aggregator.flush();
        self.report_aggregator.flush();
    }

    /// Evict everything from all three caches.
    pub fn flush_all(&self) {
        self.check_aggregator.flush_all();
        self.quota_aggregator.flush_all();
        self.report_aggregator.flush_all();
    }

    /// Stop the timer, flush all buffered data, and disarm the flush
    /// callbacks.
    ///
    /// Disarming breaks the reference cycle between the quota aggregator
    /// and its own refresh callback, and guarantees no callback runs
    /// against a client that is going away. In-flight transport
    /// completions stay safe: each holds a strong reference to the
    /// aggregator it updates. Idempotent; also run on drop.
    pub fn shutdown(&self) {
        if let Some(mut timer) = self.timer.lock().expect("timer lock poisoned").take() {
            timer.stop();
        }
        self.flush_all();
        self.check_aggregator.set_flush_callback(None);
        self.quota_aggregator.set_flush_callback(None);
        self.report_aggregator.set_flush_callback(None);
    }
}

impl Drop for ControlClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn no_transport(kind: &str) -> TollgateError {
    TollgateError::InvalidArgument(format!("{kind} transport is not configured"))
}

/// Run an async client call to completion on the current thread.
fn block_on<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    match Handle::try_current() {
        Ok(handle) => tokio::task::block_in_place(|| handle.block_on(future)),
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                TollgateError::Internal(format!("failed to build blocking runtime: {error}"))
            })?
            .block_on(future),
    }
}

/// Spawn a flush-driven transport dispatch onto the ambient runtime.
///
/// Flush callbacks run synchronously under no lock but still must not
/// block, so the actual round trip happens on a spawned task.
fn spawn_dispatch<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => warn!("dropping flush dispatch: no tokio runtime on this thread"),
    }
}

/// Translate a quota response's first error code into the caller-visible
/// outcome. Responses without errors, and the `*_UNAVAILABLE` codes
/// (fail open), pass through as `Ok`.
fn translate_quota_response(
    service_name: &str,
    response: AllocateQuotaResponse,
) -> Result<AllocateQuotaResponse> {
    let Some(code) = response.allocate_errors.first().map(|error| error.code) else {
        return Ok(response);
    };

    let (kind, message) = match code {
        QuotaErrorCode::ResourceExhausted => {
            (QuotaRejectKind::PermissionDenied, "Quota allocation failed.".to_owned())
        }
        QuotaErrorCode::ProjectSuspended => {
            (QuotaRejectKind::PermissionDenied, "Project suspended.".to_owned())
        }
        QuotaErrorCode::IpAddressBlocked => {
            (QuotaRejectKind::PermissionDenied, "IP address blocked.".to_owned())
        }
        QuotaErrorCode::RefererBlocked => {
            (QuotaRejectKind::PermissionDenied, "Referer blocked.".to_owned())
        }
        QuotaErrorCode::ClientAppBlocked => {
            (QuotaRejectKind::PermissionDenied, "Client application blocked.".to_owned())
        }
        QuotaErrorCode::ServiceNotEnabled => (
            QuotaRejectKind::PermissionDenied,
            format!("API {service_name} is not enabled for the consumer project."),
        ),
        QuotaErrorCode::BillingNotActive => (
            QuotaRejectKind::PermissionDenied,
            format!("Billing is not active for API {service_name}."),
        ),
        QuotaErrorCode::ProjectDeleted => {
            (QuotaRejectKind::InvalidArgument, "Project has been deleted.".to_owned())
        }
        QuotaErrorCode::ProjectInvalid => {
            (QuotaRejectKind::InvalidArgument, "Client project is not valid.".to_owned())
        }
        QuotaErrorCode::ApiKeyInvalid => {
            (QuotaRejectKind::InvalidArgument, "API key is not valid.".to_owned())
        }
        QuotaErrorCode::ApiKeyExpired => {
            (QuotaRejectKind::InvalidArgument, "API key has expired.".to_owned())
        }
        QuotaErrorCode::ProjectStatusUnavailable
        | QuotaErrorCode::ServiceStatusUnavailable
        | QuotaErrorCode::BillingStatusUnavailable => {
            // The control plane could not consult its own backends; fail
            // open rather than reject live traffic.
            return Ok(response);
        }
        QuotaErrorCode::Unspecified => (
            QuotaRejectKind::Internal,
            format!("unrecognized quota error: {code:?}"),
        ),
    };

    Err(TollgateError::QuotaRejected {
        kind,
        message,
        response: Box::new(response),
    })
}

/// Builder for [`ControlClient`] instances.
///
/// ```rust,no_run
/// use tollgate::aggregator::CheckAggregationOptions;
/// use tollgate::client::ControlClient;
///
/// # fn main() -> tollgate::Result<()> {
/// let client = ControlClient::builder("library.googleapis.com")
///     .service_config_id("2016-09-19r0")
///     .check_options(CheckAggregationOptions::new().num_entries(10_000))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ControlClientBuilder {
    service_name: String,
    service_config_id: String,
    check_options: CheckAggregationOptions,
    quota_options: QuotaAggregationOptions,
    report_options: ReportAggregationOptions,
    metric_kinds: MetricKindMap,
    check_transport: Option<Arc<dyn CheckTransport>>,
    quota_transport: Option<Arc<dyn QuotaTransport>>,
    report_transport: Option<Arc<dyn ReportTransport>>,
    timer: Option<Arc<dyn PeriodicTimer>>,
}

impl ControlClientBuilder {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_config_id: String::new(),
            check_options: CheckAggregationOptions::default(),
            quota_options: QuotaAggregationOptions::default(),
            report_options: ReportAggregationOptions::default(),
            metric_kinds: MetricKindMap::new(),
            check_transport: None,
            quota_transport: None,
            report_transport: None,
            timer: None,
        }
    }

    /// Set the service config rollout id stamped on outbound requests.
    pub fn service_config_id(mut self, id: impl Into<String>) -> Self {
        self.service_config_id = id.into();
        self
    }

    pub fn check_options(mut self, options: CheckAggregationOptions) -> Self {
        self.check_options = options;
        self
    }

    pub fn quota_options(mut self, options: QuotaAggregationOptions) -> Self {
        self.quota_options = options;
        self
    }

    pub fn report_options(mut self, options: ReportAggregationOptions) -> Self {
        self.report_options = options;
        self
    }

    /// Map metric names to their kinds. Unlisted metrics default to
    /// delta.
    pub fn metric_kinds(mut self, kinds: MetricKindMap) -> Self {
        self.metric_kinds = kinds;
        self
    }

    pub fn check_transport(mut self, transport: impl CheckTransport + 'static) -> Self {
        self.check_transport = Some(Arc::new(transport));
        self
    }

    pub fn quota_transport(mut self, transport: impl QuotaTransport + 'static) -> Self {
        self.quota_transport = Some(Arc::new(transport));
        self
    }

    pub fn report_transport(mut self, transport: impl ReportTransport + 'static) -> Self {
        self.report_transport = Some(Arc::new(transport));
        self
    }

    /// Supply a timer implementation. Defaults to [`TokioTimer`] when
    /// built inside a tokio runtime; without a runtime the periodic
    /// flush is disabled and [`ControlClient::flush`] must be driven by
    /// the caller.
    pub fn periodic_timer(mut self, timer: impl PeriodicTimer + 'static) -> Self {
        self.timer = Some(Arc::new(timer));
        self
    }

    /// Build the client: construct the aggregators, arm their flush
    /// callbacks, and start the flush timer.
    pub fn build(self) -> Result<ControlClient> {
        if self.service_name.is_empty() {
            return Err(TollgateError::InvalidArgument(
                "service name must not be empty".into(),
            ));
        }

        let metric_kinds = Arc::new(self.metric_kinds);
        let check_aggregator = Arc::new(CheckAggregator::new(
            &self.service_name,
            &self.service_config_id,
            self.check_options,
            metric_kinds.clone(),
        ));
        let quota_aggregator = Arc::new(QuotaAggregator::new(
            &self.service_name,
            &self.service_config_id,
            self.quota_options,
        ));
        let report_aggregator = Arc::new(ReportAggregator::new(
            &self.service_name,
            &self.service_config_id,
            self.report_options,
            metric_kinds,
        ));
        let stats = Arc::new(ClientStats::default());

        if let Some(transport) = &self.check_transport {
            let transport = transport.clone();
            let stats = stats.clone();
            check_aggregator.set_flush_callback(Some(Box::new(move |request: CheckRequest| {
                stats.send_checks_by_flush.fetch_add(1, Ordering::Relaxed);
                let transport = transport.clone();
                spawn_dispatch(async move {
                    // The evicted entry is gone, so the refreshed verdict
                    // is not cached; the next user check re-populates it.
                    if let Err(error) = transport.check(request).await {
                        warn!(error = %error, "check flush dispatch failed");
                    }
                });
            })));
        }

        if let Some(transport) = &self.quota_transport {
            let transport = transport.clone();
            let stats = stats.clone();
            // The refresh completion must land back in the cache, so this
            // callback keeps the aggregator alive until it has run.
            let aggregator = quota_aggregator.clone();
            quota_aggregator.set_flush_callback(Some(Box::new(
                move |request: AllocateQuotaRequest| {
                    stats.send_quotas_by_flush.fetch_add(1, Ordering::Relaxed);
                    let transport = transport.clone();
                    let aggregator = aggregator.clone();
                    spawn_dispatch(async move {
                        match transport.allocate_quota(request.clone()).await {
                            Ok(response) => aggregator.cache_response(&request, response),
                            Err(error) => {
                                warn!(error = %error, "quota refresh dispatch failed")
                            }
                        }
                    });
                },
            )));
        }

        if let Some(transport) = &self.report_transport {
            let transport = transport.clone();
            let stats = stats.clone();
            report_aggregator.set_flush_callback(Some(Box::new(move |request: ReportRequest| {
                stats.send_reports_by_flush.fetch_add(1, Ordering::Relaxed);
                stats
                    .send_report_operations
                    .fetch_add(request.operations.len() as u64, Ordering::Relaxed);
                let transport = transport.clone();
                spawn_dispatch(async move {
                    if let Err(error) = transport.report(request).await {
                        warn!(error = %error, "report flush dispatch failed");
                    }
                });
            })));
        }

        let flush_interval = [
            check_aggregator.next_flush_interval(),
            quota_aggregator.next_flush_interval(),
            report_aggregator.next_flush_interval(),
        ]
        .into_iter()
        .flatten()
        .min();

        let timer = flush_interval.and_then(|interval| {
            let check = check_aggregator.clone();
            let quota = quota_aggregator.clone();
            let report = report_aggregator.clone();
            let tick: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
                check.flush();
                quota.flush();
                report.flush();
            });
            match &self.timer {
                Some(timer) => Some(timer.start(interval, tick)),
                None => match Handle::try_current() {
                    Ok(_) => Some(TokioTimer.start(interval, tick)),
                    Err(_) => {
                        warn!("no tokio runtime; periodic flushing disabled");
                        None
                    }
                },
            }
        });

        Ok(ControlClient {
            service_name: self.service_name,
            check_aggregator,
            quota_aggregator,
            report_aggregator,
            check_transport: self.check_transport,
            quota_transport: self.quota_transport,
            report_transport: self.report_transport,
            stats,
            timer: Mutex::new(timer),
        })
    }
}
