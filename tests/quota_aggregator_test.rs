//! Tests for [`QuotaAggregator`] — grant caching with in-place refresh.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tollgate::aggregator::{QuotaAggregationOptions, QuotaAggregator};
use tollgate::types::{
    AllocateQuotaRequest, AllocateQuotaResponse, MetricValue, MetricValueData, MetricValueSet,
    QuotaError, QuotaErrorCode, QuotaOperation,
};
use tollgate::TollgateError;

const SERVICE_NAME: &str = "library.googleapis.com";
const SERVICE_CONFIG_ID: &str = "2016-09-19r0";

fn quota_request(tokens: i64) -> AllocateQuotaRequest {
    AllocateQuotaRequest {
        service_name: SERVICE_NAME.into(),
        service_config_id: SERVICE_CONFIG_ID.into(),
        allocate_operation: Some(QuotaOperation {
            operation_id: "operation-1".into(),
            method_name: "methodname".into(),
            consumer_id: "consumerid".into(),
            quota_metrics: vec![MetricValueSet {
                metric_name: "metric_first".into(),
                metric_values: vec![MetricValue::int64(tokens, None, None)],
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn success_response() -> AllocateQuotaResponse {
    AllocateQuotaResponse {
        operation_id: "operation-1".into(),
        service_config_id: SERVICE_CONFIG_ID.into(),
        ..Default::default()
    }
}

fn reject_response() -> AllocateQuotaResponse {
    AllocateQuotaResponse {
        operation_id: "operation-1".into(),
        allocate_errors: vec![QuotaError {
            code: QuotaErrorCode::ResourceExhausted,
            subject: "user:integration_test_user".into(),
            description: "out of tokens".into(),
        }],
        ..Default::default()
    }
}

fn aggregator_with_sink(
    options: QuotaAggregationOptions,
) -> (QuotaAggregator, Arc<Mutex<Vec<AllocateQuotaRequest>>>) {
    let aggregator = QuotaAggregator::new(SERVICE_NAME, SERVICE_CONFIG_ID, options);
    let flushed = Arc::new(Mutex::new(Vec::new()));
    let sink = flushed.clone();
    aggregator.set_flush_callback(Some(Box::new(move |request| {
        sink.lock().unwrap().push(request);
    })));
    (aggregator, flushed)
}

fn total_tokens(request: &AllocateQuotaRequest) -> i64 {
    request
        .allocate_operation
        .as_ref()
        .map(|operation| {
            operation
                .quota_metrics
                .iter()
                .flat_map(|set| &set.metric_values)
                .map(|value| match value.value {
                    MetricValueData::Int64(amount) => amount,
                    _ => 0,
                })
                .sum()
        })
        .unwrap_or(0)
}

// =========================================================================
// Validation
// =========================================================================

#[test]
fn wrong_service_name_is_rejected() {
    let (aggregator, _) = aggregator_with_sink(QuotaAggregationOptions::default());
    let mut request = quota_request(1);
    request.service_name = "unknown".into();

    match aggregator.quota(&request) {
        Err(TollgateError::InvalidArgument(message)) => {
            assert!(message.contains("unknown"));
            assert!(message.contains(SERVICE_NAME));
        }
        other => panic!("expected invalid argument, got {other:?}"),
    }
}

#[test]
fn missing_operation_is_rejected() {
    let (aggregator, _) = aggregator_with_sink(QuotaAggregationOptions::default());
    let request = AllocateQuotaRequest {
        service_name: SERVICE_NAME.into(),
        ..Default::default()
    };

    match aggregator.quota(&request) {
        Err(TollgateError::InvalidArgument(message)) => {
            assert!(message.contains("allocate operation"));
        }
        other => panic!("expected invalid argument, got {other:?}"),
    }
}

#[test]
fn disabled_cache_always_misses() {
    let (aggregator, _) =
        aggregator_with_sink(QuotaAggregationOptions::new().num_entries(0));
    let request = quota_request(1);

    assert!(aggregator.quota(&request).unwrap().is_none());
    aggregator.cache_response(&request, success_response());
    assert!(aggregator.quota(&request).unwrap().is_none());
}

// =========================================================================
// Placeholder semantics
// =========================================================================

#[test]
fn cold_miss_installs_placeholder_for_concurrent_callers() {
    let (aggregator, _) = aggregator_with_sink(QuotaAggregationOptions::default());
    let request = quota_request(1);

    // First caller misses and will dispatch to the transport; the miss
    // leaves a placeholder behind.
    assert!(aggregator.quota(&request).unwrap().is_none());
    assert_eq!(aggregator.entry_count(), 1);

    // Callers arriving during the round trip hit the placeholder: an
    // empty grant rather than a thundering herd of misses.
    let response = aggregator.quota(&request).unwrap().expect("placeholder hit");
    assert_eq!(response, AllocateQuotaResponse::default());
}

#[test]
fn response_replaces_placeholder_and_keeps_accumulated_tokens() {
    let (aggregator, flushed) = aggregator_with_sink(
        QuotaAggregationOptions::new().refresh_interval(Duration::from_millis(50)),
    );
    let request = quota_request(1);

    assert!(aggregator.quota(&request).unwrap().is_none());
    // Two concurrent callers charge the placeholder while the first
    // round trip is in flight.
    assert!(aggregator.quota(&request).unwrap().is_some());
    assert!(aggregator.quota(&request).unwrap().is_some());

    aggregator.cache_response(&request, success_response());

    // Hits now serve the real grant.
    let response = aggregator.quota(&request).unwrap().expect("cache hit");
    assert_eq!(response.operation_id, "operation-1");

    // The refresh carries everything charged since: two placeholder hits
    // plus one grant hit.
    std::thread::sleep(Duration::from_millis(100));
    aggregator.flush();

    let flushed = flushed.lock().unwrap();
    assert_eq!(flushed.len(), 1);
    assert_eq!(total_tokens(&flushed[0]), 3);
    assert_eq!(flushed[0].service_name, SERVICE_NAME);
    assert_eq!(flushed[0].service_config_id, SERVICE_CONFIG_ID);
}

// =========================================================================
// Refresh in place
// =========================================================================

#[test]
fn aged_dirty_entry_refreshes_without_interrupting_hits() {
    let (aggregator, flushed) = aggregator_with_sink(
        QuotaAggregationOptions::new().refresh_interval(Duration::from_millis(50)),
    );
    let request = quota_request(2);

    aggregator.cache_response(&request, success_response());
    assert!(aggregator.quota(&request).unwrap().is_some());

    std::thread::sleep(Duration::from_millis(100));
    aggregator.flush();

    // Exactly one refresh went out, carrying the aggregated tokens.
    {
        let flushed = flushed.lock().unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(total_tokens(&flushed[0]), 2);
    }

    // The entry was re-inserted: callers keep seeing the cached grant
    // while the refresh response is in flight.
    let response = aggregator.quota(&request).unwrap().expect("cache hit");
    assert_eq!(response.operation_id, "operation-1");

    // The refresh reset the pending state; an immediate second flush has
    // nothing to send.
    aggregator.flush();
    assert_eq!(flushed.lock().unwrap().len(), 1);
    assert_eq!(aggregator.entry_count(), 1);
}

#[test]
fn aged_clean_entry_is_dropped_without_refresh() {
    let (aggregator, flushed) = aggregator_with_sink(
        QuotaAggregationOptions::new().refresh_interval(Duration::from_millis(50)),
    );
    let request = quota_request(1);

    aggregator.cache_response(&request, success_response());

    std::thread::sleep(Duration::from_millis(100));
    aggregator.flush();

    assert!(flushed.lock().unwrap().is_empty());
    // The entry is gone: the next call is a cold miss again.
    assert!(aggregator.quota(&request).unwrap().is_none());
}

#[test]
fn rejection_is_cached_and_served() {
    let (aggregator, _) = aggregator_with_sink(QuotaAggregationOptions::default());
    let request = quota_request(1);

    aggregator.cache_response(&request, reject_response());

    let response = aggregator.quota(&request).unwrap().expect("cache hit");
    assert!(response.is_rejected());
    assert_eq!(
        response.allocate_errors[0].code,
        QuotaErrorCode::ResourceExhausted
    );
}

// =========================================================================
// FlushAll
// =========================================================================

#[test]
fn flush_all_emits_final_refresh_and_empties() {
    let (aggregator, flushed) = aggregator_with_sink(QuotaAggregationOptions::default());
    let request = quota_request(5);

    aggregator.cache_response(&request, success_response());
    assert!(aggregator.quota(&request).unwrap().is_some());

    aggregator.flush_all();

    {
        let flushed = flushed.lock().unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(total_tokens(&flushed[0]), 5);
    }
    // Unlike an age refresh, flush_all leaves the cache empty.
    assert!(aggregator.quota(&request).unwrap().is_none());

    aggregator.flush_all();
    assert_eq!(flushed.lock().unwrap().len(), 1);
}
