//! Request and metric-sample fingerprints.
//!
//! A [`Signature`] is a 16-byte digest over a canonical encoding of
//! selected fields. Two requests with equal signatures are merged into a
//! shared cache entry, so the encoding must be stable across processes
//! and independent of label-map iteration order: label keys are always
//! visited sorted.
//!
//! Fields are separated by a `0x00` delimiter byte, emitted even when the
//! adjacent fields are empty, so `("ab", "")` and `("a", "b")` never
//! collide. Values and timestamps are deliberately excluded from sample
//! fingerprints: samples differing only in time or amount must merge.

use sha2::{Digest, Sha256};

use crate::types::{
    AllocateQuotaRequest, CheckRequest, MetricValue, MetricValueData, Operation, QuotaOperation,
};

const DELIMITER: [u8; 1] = [0x00];

/// A 128-bit fingerprint used as the cache key for requests and merged
/// metric samples.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature([u8; 16]);

impl Signature {
    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

fn finish(hasher: Sha256) -> Signature {
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Signature(bytes)
}

/// Absorb labels in key-sorted order, each key and value preceded by a
/// delimiter.
fn absorb_labels(hasher: &mut Sha256, labels: &std::collections::HashMap<String, String>) {
    let mut sorted: Vec<(&String, &String)> = labels.iter().collect();
    sorted.sort_by_key(|(key, _)| *key);
    for (key, value) in sorted {
        hasher.update(DELIMITER);
        hasher.update(key.as_bytes());
        hasher.update(DELIMITER);
        hasher.update(value.as_bytes());
    }
}

/// Absorb the identity of one metric sample: its labels and, for money
/// values, the currency code.
fn absorb_metric_value(hasher: &mut Sha256, metric_value: &MetricValue) {
    absorb_labels(hasher, &metric_value.labels);

    if let MetricValueData::Money(money) = &metric_value.value {
        hasher.update(DELIMITER);
        hasher.update(money.currency_code.as_bytes());
    }
}

/// Fingerprint of a report operation: consumer id, operation name, and
/// labels. Operations sharing a signature are batched into one outbound
/// report.
pub fn report_operation_signature(operation: &Operation) -> Signature {
    let mut hasher = Sha256::new();
    hasher.update(operation.consumer_id.as_bytes());
    hasher.update(DELIMITER);
    hasher.update(operation.operation_name.as_bytes());

    absorb_labels(&mut hasher, &operation.labels);

    finish(hasher)
}

/// Fingerprint of one metric sample within a metric value set. Samples
/// sharing a signature are merged under the metric's kind rules.
pub fn report_metric_value_signature(metric_value: &MetricValue) -> Signature {
    let mut hasher = Sha256::new();
    absorb_metric_value(&mut hasher, metric_value);
    finish(hasher)
}

/// Fingerprint of a check request: operation identity, labels, metric
/// identities, and the canonical encoding of any quota properties.
pub fn check_request_signature(request: &CheckRequest) -> Signature {
    let mut hasher = Sha256::new();

    let operation = &request.operation;
    hasher.update(operation.operation_name.as_bytes());

    hasher.update(DELIMITER);
    hasher.update(operation.consumer_id.as_bytes());

    hasher.update(DELIMITER);
    absorb_labels(&mut hasher, &operation.labels);

    for metric_value_set in &operation.metric_value_sets {
        hasher.update(DELIMITER);
        hasher.update(metric_value_set.metric_name.as_bytes());

        for metric_value in &metric_value_set.metric_values {
            absorb_metric_value(&mut hasher, metric_value);
        }
    }

    hasher.update(DELIMITER);
    if let Some(properties) = &operation.quota_properties {
        hasher.update(serde_json::to_vec(properties).unwrap_or_default());
    }

    hasher.update(DELIMITER);

    finish(hasher)
}

/// Fingerprint of a quota allocation request, over the contained
/// [`QuotaOperation`]'s method, consumer, labels, and metric identities.
pub fn allocate_quota_request_signature(request: &AllocateQuotaRequest) -> Signature {
    let mut hasher = Sha256::new();

    if let Some(operation) = &request.allocate_operation {
        absorb_quota_operation(&mut hasher, operation);
    }

    finish(hasher)
}

fn absorb_quota_operation(hasher: &mut Sha256, operation: &QuotaOperation) {
    hasher.update(operation.method_name.as_bytes());

    hasher.update(DELIMITER);
    hasher.update(operation.consumer_id.as_bytes());

    hasher.update(DELIMITER);
    absorb_labels(hasher, &operation.labels);

    for metric_value_set in &operation.quota_metrics {
        hasher.update(DELIMITER);
        hasher.update(metric_value_set.metric_name.as_bytes());

        for metric_value in &metric_value_set.metric_values {
            absorb_metric_value(hasher, metric_value);
        }
    }

    hasher.update(DELIMITER);
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::types::{MetricValueSet, Money, QuotaProperties, Timestamp};

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn operation(name: &str, consumer: &str, label_pairs: &[(&str, &str)]) -> Operation {
        Operation {
            operation_name: name.into(),
            consumer_id: consumer.into(),
            labels: labels(label_pairs),
            ..Default::default()
        }
    }

    #[test]
    fn operation_signature_is_deterministic() {
        let op = operation("ListShelves", "project:p", &[("a", "1"), ("b", "2")]);
        assert_eq!(
            report_operation_signature(&op),
            report_operation_signature(&op.clone())
        );
    }

    #[test]
    fn operation_signature_ignores_label_insertion_order() {
        let forward = operation("ListShelves", "project:p", &[("a", "1"), ("b", "2")]);
        let reverse = operation("ListShelves", "project:p", &[("b", "2"), ("a", "1")]);
        assert_eq!(
            report_operation_signature(&forward),
            report_operation_signature(&reverse)
        );
    }

    #[test]
    fn operation_signature_separates_adjacent_fields() {
        // Without delimiters these two would concatenate identically.
        let a = operation("ab", "", &[]);
        let b = operation("a", "b", &[]);
        assert_ne!(report_operation_signature(&a), report_operation_signature(&b));
    }

    #[test]
    fn operation_signature_differs_on_labels() {
        let a = operation("ListShelves", "project:p", &[("key", "1")]);
        let b = operation("ListShelves", "project:p", &[("key", "2")]);
        assert_ne!(report_operation_signature(&a), report_operation_signature(&b));
    }

    #[test]
    fn metric_value_signature_ignores_value_and_time() {
        let mut a = MetricValue::int64(100, Some(Timestamp::from_seconds(1)), None);
        a.labels = labels(&[("l", "v")]);
        let mut b = MetricValue::int64(999, None, Some(Timestamp::from_seconds(9)));
        b.labels = labels(&[("l", "v")]);
        assert_eq!(
            report_metric_value_signature(&a),
            report_metric_value_signature(&b)
        );
    }

    #[test]
    fn metric_value_signature_includes_currency() {
        let usd = MetricValue {
            labels: HashMap::new(),
            start_time: None,
            end_time: None,
            value: MetricValueData::Money(Money::new("USD", 1, 0)),
        };
        let eur = MetricValue {
            value: MetricValueData::Money(Money::new("EUR", 1, 0)),
            ..usd.clone()
        };
        assert_ne!(
            report_metric_value_signature(&usd),
            report_metric_value_signature(&eur)
        );
    }

    #[test]
    fn check_signature_covers_operation_and_metrics() {
        let mut request = CheckRequest {
            service_name: "library.googleapis.com".into(),
            service_config_id: "2016-09-19r0".into(),
            operation: operation("ListShelves", "project:p", &[("caller", "gateway")]),
        };
        let base = check_request_signature(&request);

        request.operation.metric_value_sets.push(MetricValueSet {
            metric_name: "requests".into(),
            metric_values: vec![MetricValue::int64(1, None, None)],
        });
        assert_ne!(base, check_request_signature(&request));
    }

    #[test]
    fn check_signature_covers_quota_properties() {
        let request = CheckRequest {
            service_name: "library.googleapis.com".into(),
            operation: operation("ListShelves", "project:p", &[]),
            ..Default::default()
        };
        let mut with_properties = request.clone();
        with_properties.operation.quota_properties = Some(QuotaProperties::default());

        assert_ne!(
            check_request_signature(&request),
            check_request_signature(&with_properties)
        );
    }

    #[test]
    fn check_signature_stable_under_relabeling() {
        let forward = CheckRequest {
            service_name: "s".into(),
            operation: operation("op", "c", &[("x", "1"), ("y", "2"), ("z", "3")]),
            ..Default::default()
        };
        let reverse = CheckRequest {
            service_name: "s".into(),
            operation: operation("op", "c", &[("z", "3"), ("y", "2"), ("x", "1")]),
            ..Default::default()
        };
        assert_eq!(
            check_request_signature(&forward),
            check_request_signature(&reverse)
        );
    }

    #[test]
    fn quota_signature_covers_method_and_metrics() {
        let request = AllocateQuotaRequest {
            service_name: "library.googleapis.com".into(),
            allocate_operation: Some(QuotaOperation {
                method_name: "methodname".into(),
                consumer_id: "consumerid".into(),
                quota_metrics: vec![MetricValueSet {
                    metric_name: "metric_first".into(),
                    metric_values: vec![MetricValue::int64(1, None, None)],
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut renamed = request.clone();
        renamed.allocate_operation.as_mut().unwrap().method_name = "other".into();

        assert_ne!(
            allocate_quota_request_signature(&request),
            allocate_quota_request_signature(&renamed)
        );
        assert_eq!(
            allocate_quota_request_signature(&request),
            allocate_quota_request_signature(&request.clone())
        );
    }
}
