//! Tests for [`ControlClient`] — aggregators wired to transports and the
//! flush timer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tollgate::aggregator::{
    CheckAggregationOptions, QuotaAggregationOptions, ReportAggregationOptions,
};
use tollgate::client::{
    CheckTransport, ControlClient, PeriodicTimer, QuotaTransport, ReportTransport, TimerHandle,
};
use tollgate::types::{
    AllocateQuotaRequest, AllocateQuotaResponse, CheckRequest, CheckResponse, Importance,
    MetricValue, MetricValueSet, Operation, QuotaError, QuotaErrorCode, QuotaOperation,
    ReportRequest, ReportResponse,
};
use tollgate::{QuotaRejectKind, Result, TollgateError};

const SERVICE_NAME: &str = "library.googleapis.com";
const SERVICE_CONFIG_ID: &str = "2016-09-19r0";

// =========================================================================
// Mock transports
// =========================================================================

#[derive(Clone)]
struct MockCheckTransport {
    response: CheckResponse,
    requests: Arc<Mutex<Vec<CheckRequest>>>,
}

impl MockCheckTransport {
    fn new(response: CheckResponse) -> Self {
        Self {
            response,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CheckTransport for MockCheckTransport {
    async fn check(&self, request: CheckRequest) -> Result<CheckResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(self.response.clone())
    }
}

struct FailingCheckTransport;

#[async_trait]
impl CheckTransport for FailingCheckTransport {
    async fn check(&self, _request: CheckRequest) -> Result<CheckResponse> {
        Err(TollgateError::Transport("connection refused".into()))
    }
}

#[derive(Clone)]
struct MockQuotaTransport {
    response: AllocateQuotaResponse,
    requests: Arc<Mutex<Vec<AllocateQuotaRequest>>>,
}

impl MockQuotaTransport {
    fn new(response: AllocateQuotaResponse) -> Self {
        Self {
            response,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl QuotaTransport for MockQuotaTransport {
    async fn allocate_quota(
        &self,
        request: AllocateQuotaRequest,
    ) -> Result<AllocateQuotaResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(self.response.clone())
    }
}

#[derive(Clone)]
struct MockReportTransport {
    requests: Arc<Mutex<Vec<ReportRequest>>>,
}

impl MockReportTransport {
    fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ReportTransport for MockReportTransport {
    async fn report(&self, request: ReportRequest) -> Result<ReportResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(ReportResponse::default())
    }
}

// =========================================================================
// Fixtures
// =========================================================================

fn check_request(operation_name: &str) -> CheckRequest {
    CheckRequest {
        service_name: SERVICE_NAME.into(),
        service_config_id: SERVICE_CONFIG_ID.into(),
        operation: Operation {
            operation_id: "operation-1".into(),
            operation_name: operation_name.into(),
            consumer_id: "project:p".into(),
            ..Default::default()
        },
    }
}

fn pass_check_response(operation_id: &str) -> CheckResponse {
    CheckResponse {
        operation_id: operation_id.into(),
        service_config_id: SERVICE_CONFIG_ID.into(),
        ..Default::default()
    }
}

fn quota_request() -> AllocateQuotaRequest {
    AllocateQuotaRequest {
        service_name: SERVICE_NAME.into(),
        service_config_id: SERVICE_CONFIG_ID.into(),
        allocate_operation: Some(QuotaOperation {
            operation_id: "operation-1".into(),
            method_name: "methodname".into(),
            consumer_id: "consumerid".into(),
            quota_metrics: vec![MetricValueSet {
                metric_name: "metric_first".into(),
                metric_values: vec![MetricValue::int64(1, None, None)],
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn quota_success_response() -> AllocateQuotaResponse {
    AllocateQuotaResponse {
        operation_id: "operation-1".into(),
        service_config_id: SERVICE_CONFIG_ID.into(),
        ..Default::default()
    }
}

fn quota_reject_response(code: QuotaErrorCode) -> AllocateQuotaResponse {
    AllocateQuotaResponse {
        operation_id: "operation-1".into(),
        allocate_errors: vec![QuotaError {
            code,
            subject: "user:integration_test_user".into(),
            description: "rejected".into(),
        }],
        ..Default::default()
    }
}

fn report_request(operation_name: &str, importance: Importance) -> ReportRequest {
    ReportRequest {
        service_name: SERVICE_NAME.into(),
        service_config_id: SERVICE_CONFIG_ID.into(),
        operations: vec![Operation {
            operation_id: "operation-1".into(),
            operation_name: operation_name.into(),
            consumer_id: "project:p".into(),
            importance,
            ..Default::default()
        }],
    }
}

// =========================================================================
// Check
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn check_miss_dispatches_then_serves_from_cache() {
    let transport = MockCheckTransport::new(pass_check_response("op-1"));
    let client = ControlClient::builder(SERVICE_NAME)
        .service_config_id(SERVICE_CONFIG_ID)
        .check_transport(transport.clone())
        .build()
        .unwrap();

    let request = check_request("ListShelves");
    let first = client.check(&request).await.unwrap();
    assert_eq!(first.operation_id, "op-1");
    assert_eq!(transport.call_count(), 1);

    for _ in 0..9 {
        let response = client.check(&request).await.unwrap();
        assert_eq!(response.operation_id, "op-1");
    }
    assert_eq!(transport.call_count(), 1);

    let stats = client.statistics();
    assert_eq!(stats.total_called_checks, 10);
    assert_eq!(stats.send_checks_in_flight, 1);
    assert_eq!(stats.send_checks_by_flush, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn check_without_transport_fails() {
    let client = ControlClient::builder(SERVICE_NAME).build().unwrap();

    match client.check(&check_request("ListShelves")).await {
        Err(TollgateError::InvalidArgument(message)) => {
            assert!(message.contains("transport"));
        }
        other => panic!("expected invalid argument, got {other:?}"),
    }
    assert_eq!(client.statistics().total_called_checks, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn check_transport_error_is_surfaced_and_not_cached() {
    let fallback = MockCheckTransport::new(pass_check_response("op-1"));
    let client = ControlClient::builder(SERVICE_NAME)
        .check_transport(FailingCheckTransport)
        .build()
        .unwrap();

    let request = check_request("ListShelves");
    match client.check(&request).await {
        Err(TollgateError::Transport(message)) => assert!(message.contains("refused")),
        other => panic!("expected transport error, got {other:?}"),
    }

    // The failure was not cached: the next call dispatches again, and a
    // per-call transport can answer it.
    let response = client
        .check_with_transport(&fallback, &request)
        .await
        .unwrap();
    assert_eq!(response.operation_id, "op-1");
    assert_eq!(fallback.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn per_call_transport_populates_the_shared_cache() {
    let override_transport = MockCheckTransport::new(pass_check_response("op-override"));
    let default_transport = MockCheckTransport::new(pass_check_response("op-default"));
    let client = ControlClient::builder(SERVICE_NAME)
        .check_transport(default_transport.clone())
        .build()
        .unwrap();

    let request = check_request("ListShelves");
    let first = client
        .check_with_transport(&override_transport, &request)
        .await
        .unwrap();
    assert_eq!(first.operation_id, "op-override");

    // The default-transport path now hits the entry the override
    // populated.
    let second = client.check(&request).await.unwrap();
    assert_eq!(second.operation_id, "op-override");
    assert_eq!(default_transport.call_count(), 0);
    assert_eq!(override_transport.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn check_blocking_wraps_the_async_call() {
    let transport = MockCheckTransport::new(pass_check_response("op-1"));
    let client = ControlClient::builder(SERVICE_NAME)
        .check_transport(transport.clone())
        .build()
        .unwrap();

    let request = check_request("ListShelves");
    let response = client.check_blocking(&request).unwrap();
    assert_eq!(response.operation_id, "op-1");
    assert_eq!(transport.call_count(), 1);
}

// =========================================================================
// Quota
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quota_miss_dispatches_then_serves_from_cache() {
    let transport = MockQuotaTransport::new(quota_success_response());
    let client = ControlClient::builder(SERVICE_NAME)
        .quota_transport(transport.clone())
        .build()
        .unwrap();

    let request = quota_request();
    let first = client.allocate_quota(&request).await.unwrap();
    assert_eq!(first.operation_id, "operation-1");
    assert_eq!(transport.call_count(), 1);

    let second = client.allocate_quota(&request).await.unwrap();
    assert_eq!(second.operation_id, "operation-1");
    assert_eq!(transport.call_count(), 1);

    let stats = client.statistics();
    assert_eq!(stats.total_called_quotas, 2);
    assert_eq!(stats.send_quotas_in_flight, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quota_rejection_is_translated_and_served_from_cache() {
    let transport = MockQuotaTransport::new(quota_reject_response(QuotaErrorCode::ResourceExhausted));
    let client = ControlClient::builder(SERVICE_NAME)
        .quota_transport(transport.clone())
        .build()
        .unwrap();

    let request = quota_request();
    match client.allocate_quota(&request).await {
        Err(TollgateError::QuotaRejected {
            kind,
            message,
            response,
        }) => {
            assert_eq!(kind, QuotaRejectKind::PermissionDenied);
            assert!(message.contains("Quota allocation failed"));
            assert_eq!(
                response.allocate_errors[0].code,
                QuotaErrorCode::ResourceExhausted
            );
        }
        other => panic!("expected quota rejection, got {other:?}"),
    }

    // The rejection was cached: the repeat rejects without a round trip.
    match client.allocate_quota(&request).await {
        Err(error) => assert_eq!(
            error.quota_reject_kind(),
            Some(QuotaRejectKind::PermissionDenied)
        ),
        other => panic!("expected quota rejection, got {other:?}"),
    }
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quota_reject_codes_map_to_status_kinds() {
    let cases = [
        (QuotaErrorCode::ProjectSuspended, QuotaRejectKind::PermissionDenied),
        (QuotaErrorCode::ServiceNotEnabled, QuotaRejectKind::PermissionDenied),
        (QuotaErrorCode::ProjectDeleted, QuotaRejectKind::InvalidArgument),
        (QuotaErrorCode::ApiKeyExpired, QuotaRejectKind::InvalidArgument),
        (QuotaErrorCode::Unspecified, QuotaRejectKind::Internal),
    ];

    for (code, expected) in cases {
        let transport = MockQuotaTransport::new(quota_reject_response(code));
        let client = ControlClient::builder(SERVICE_NAME)
            .quota_transport(transport)
            .build()
            .unwrap();

        let error = client
            .allocate_quota(&quota_request())
            .await
            .expect_err("rejection expected");
        assert_eq!(error.quota_reject_kind(), Some(expected), "{code:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quota_unavailable_codes_fail_open() {
    let transport =
        MockQuotaTransport::new(quota_reject_response(QuotaErrorCode::ServiceStatusUnavailable));
    let client = ControlClient::builder(SERVICE_NAME)
        .quota_transport(transport)
        .build()
        .unwrap();

    // The control plane could not consult its backends; the caller is
    // allowed through with the response as-is.
    let response = client.allocate_quota(&quota_request()).await.unwrap();
    assert!(response.is_rejected());
}

// =========================================================================
// Report
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn low_importance_reports_are_buffered() {
    let transport = MockReportTransport::new();
    let client = ControlClient::builder(SERVICE_NAME)
        .report_transport(transport.clone())
        .build()
        .unwrap();

    for _ in 0..5 {
        client
            .report(&report_request("ListShelves", Importance::Low))
            .await
            .unwrap();
    }
    assert_eq!(transport.call_count(), 0);

    let stats = client.statistics();
    assert_eq!(stats.total_called_reports, 5);
    assert_eq!(stats.send_reports_in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn high_importance_reports_bypass_to_the_transport() {
    let transport = MockReportTransport::new();
    let client = ControlClient::builder(SERVICE_NAME)
        .report_transport(transport.clone())
        .build()
        .unwrap();

    client
        .report(&report_request("ListShelves", Importance::High))
        .await
        .unwrap();

    assert_eq!(transport.call_count(), 1);
    let sent = transport.requests.lock().unwrap();
    assert_eq!(sent[0].operations[0].importance, Importance::High);
    drop(sent);

    let stats = client.statistics();
    assert_eq!(stats.send_reports_in_flight, 1);
    assert_eq!(stats.send_report_operations, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_flushes_buffered_reports_through_the_transport() {
    let transport = MockReportTransport::new();
    let client = ControlClient::builder(SERVICE_NAME)
        .report_transport(transport.clone())
        .build()
        .unwrap();

    client
        .report(&report_request("ListShelves", Importance::Low))
        .await
        .unwrap();
    client
        .report(&report_request("DeleteShelf", Importance::Low))
        .await
        .unwrap();

    client.shutdown();
    // The flush callback spawns the dispatches; give them a beat.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(transport.call_count(), 2);
    let stats = client.statistics();
    assert_eq!(stats.send_reports_by_flush, 2);
    assert_eq!(stats.send_report_operations, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timer_flushes_aged_batches_in_the_background() {
    let transport = MockReportTransport::new();
    let client = ControlClient::builder(SERVICE_NAME)
        .check_options(CheckAggregationOptions::new().num_entries(0))
        .quota_options(QuotaAggregationOptions::new().num_entries(0))
        .report_options(
            ReportAggregationOptions::new().flush_interval(Duration::from_millis(50)),
        )
        .report_transport(transport.clone())
        .build()
        .unwrap();

    client
        .report(&report_request("ListShelves", Importance::Low))
        .await
        .unwrap();
    assert_eq!(transport.call_count(), 0);

    // Two flush intervals plus dispatch slack.
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(transport.call_count(), 1);
    assert_eq!(client.statistics().send_reports_by_flush, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quota_refresh_response_lands_back_in_the_cache() {
    let transport = MockQuotaTransport::new(quota_success_response());
    let client = ControlClient::builder(SERVICE_NAME)
        .check_options(CheckAggregationOptions::new().num_entries(0))
        .quota_options(
            QuotaAggregationOptions::new().refresh_interval(Duration::from_millis(50)),
        )
        .report_options(ReportAggregationOptions::new().num_entries(0))
        .quota_transport(transport.clone())
        .build()
        .unwrap();

    let request = quota_request();
    client.allocate_quota(&request).await.unwrap();
    client.allocate_quota(&request).await.unwrap();
    assert_eq!(transport.call_count(), 1);

    // The timer refreshes the dirty entry in the background while hits
    // keep being served from cache.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(transport.call_count() >= 2);

    let response = client.allocate_quota(&request).await.unwrap();
    assert_eq!(response.operation_id, "operation-1");
    assert!(client.statistics().send_quotas_by_flush >= 1);
}

// =========================================================================
// Timer seam
// =========================================================================

type TickFn = Arc<dyn Fn() + Send + Sync>;

/// Timer driven by the test instead of the clock.
#[derive(Clone)]
struct ManualTimer {
    interval: Arc<Mutex<Option<Duration>>>,
    tick: Arc<Mutex<Option<TickFn>>>,
}

impl ManualTimer {
    fn new() -> Self {
        Self {
            interval: Arc::new(Mutex::new(None)),
            tick: Arc::new(Mutex::new(None)),
        }
    }

    fn fire(&self) {
        let tick = self.tick.lock().unwrap().clone();
        if let Some(tick) = tick {
            tick();
        }
    }

    fn started_interval(&self) -> Option<Duration> {
        *self.interval.lock().unwrap()
    }
}

struct ManualTimerHandle {
    tick: Arc<Mutex<Option<TickFn>>>,
}

impl TimerHandle for ManualTimerHandle {
    fn stop(&mut self) {
        self.tick.lock().unwrap().take();
    }
}

impl PeriodicTimer for ManualTimer {
    fn start(&self, interval: Duration, tick: TickFn) -> Box<dyn TimerHandle> {
        *self.interval.lock().unwrap() = Some(interval);
        *self.tick.lock().unwrap() = Some(tick);
        Box::new(ManualTimerHandle {
            tick: self.tick.clone(),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn custom_timer_receives_the_shortest_interval_and_drives_flushes() {
    let timer = ManualTimer::new();
    let transport = MockReportTransport::new();
    let client = ControlClient::builder(SERVICE_NAME)
        .report_options(
            ReportAggregationOptions::new().flush_interval(Duration::from_millis(30)),
        )
        .report_transport(transport.clone())
        .periodic_timer(timer.clone())
        .build()
        .unwrap();

    // The timer period is the minimum of the three aggregator intervals.
    assert_eq!(timer.started_interval(), Some(Duration::from_millis(30)));

    client
        .report(&report_request("ListShelves", Importance::Low))
        .await
        .unwrap();

    // Too young on the first tick, flushed on a tick after it ages out.
    timer.fire();
    assert_eq!(transport.call_count(), 0);

    tokio::time::sleep(Duration::from_millis(60)).await;
    timer.fire();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.call_count(), 1);

    // Shutdown stops the timer; later fires are no-ops.
    client.shutdown();
    timer.fire();
}

// =========================================================================
// Blocking wrappers and statistics
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_wrappers_cover_quota_and_report() {
    let quota_transport = MockQuotaTransport::new(quota_success_response());
    let report_transport = MockReportTransport::new();
    let client = ControlClient::builder(SERVICE_NAME)
        .quota_transport(quota_transport.clone())
        .report_transport(report_transport.clone())
        .build()
        .unwrap();

    let response = client.allocate_quota_blocking(&quota_request()).unwrap();
    assert_eq!(response.operation_id, "operation-1");

    client
        .report_blocking(&report_request("ListShelves", Importance::Low))
        .unwrap();

    let stats = client.statistics();
    assert_eq!(stats.total_called_quotas, 1);
    assert_eq!(stats.total_called_reports, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn statistics_start_at_zero_and_track_each_surface() {
    let check_transport = MockCheckTransport::new(pass_check_response("op-1"));
    let quota_transport = MockQuotaTransport::new(quota_success_response());
    let report_transport = MockReportTransport::new();
    let client = ControlClient::builder(SERVICE_NAME)
        .check_transport(check_transport)
        .quota_transport(quota_transport)
        .report_transport(report_transport)
        .build()
        .unwrap();

    assert_eq!(client.statistics(), Default::default());

    client.check(&check_request("ListShelves")).await.unwrap();
    client.check(&check_request("ListShelves")).await.unwrap();
    client.allocate_quota(&quota_request()).await.unwrap();
    client
        .report(&report_request("ListShelves", Importance::Low))
        .await
        .unwrap();

    let stats = client.statistics();
    assert_eq!(stats.total_called_checks, 2);
    assert_eq!(stats.send_checks_in_flight, 1);
    assert_eq!(stats.total_called_quotas, 1);
    assert_eq!(stats.send_quotas_in_flight, 1);
    assert_eq!(stats.total_called_reports, 1);
    assert_eq!(stats.send_reports_in_flight, 0);
}

// =========================================================================
// Construction
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_service_name_is_rejected() {
    match ControlClient::builder("").build() {
        Err(TollgateError::InvalidArgument(message)) => {
            assert!(message.contains("service name"));
        }
        other => panic!("expected invalid argument, got {:?}", other.map(|_| ())),
    }
}
