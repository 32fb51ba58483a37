//! Merging of quota operations.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::signature::{report_metric_value_signature, Signature};
use crate::types::{
    merge_end_time, merge_start_time, MetricValue, MetricValueData, MetricValueSet, QuotaOperation,
};

/// Folds quota operations with identical request signatures into one.
///
/// Quota metrics are always int64 deltas: merging sums the values per
/// (metric name, sample signature) and widens the time window.
pub(crate) struct QuotaOperationAggregator {
    /// Base operation; `quota_metrics` stays empty until export.
    operation: QuotaOperation,
    metric_value_sets: BTreeMap<String, HashMap<Signature, MetricValue>>,
}

impl QuotaOperationAggregator {
    pub(crate) fn new(operation: QuotaOperation) -> Self {
        let mut aggregator = Self {
            operation,
            metric_value_sets: BTreeMap::new(),
        };
        let sets = std::mem::take(&mut aggregator.operation.quota_metrics);
        aggregator.merge_metric_value_sets(&sets);
        aggregator
    }

    pub(crate) fn merge_operation(&mut self, operation: &QuotaOperation) {
        self.merge_metric_value_sets(&operation.quota_metrics);
    }

    /// Rebuild the merged operation, draining the per-metric maps.
    pub(crate) fn into_operation(self) -> QuotaOperation {
        let mut operation = self.operation;
        operation.quota_metrics = self
            .metric_value_sets
            .into_iter()
            .map(|(metric_name, values)| MetricValueSet {
                metric_name,
                metric_values: values.into_values().collect(),
            })
            .collect();
        operation
    }

    fn merge_metric_value_sets(&mut self, sets: &[MetricValueSet]) {
        for set in sets {
            let values = self
                .metric_value_sets
                .entry(set.metric_name.clone())
                .or_default();

            for value in &set.metric_values {
                let signature = report_metric_value_signature(value);
                match values.get_mut(&signature) {
                    Some(existing) => merge_int64_delta(value, existing),
                    None => {
                        values.insert(signature, value.clone());
                    }
                }
            }
        }
    }
}

fn merge_int64_delta(from: &MetricValue, to: &mut MetricValue) {
    let (MetricValueData::Int64(from_value), MetricValueData::Int64(to_value)) =
        (&from.value, &mut to.value)
    else {
        warn!("dropping quota sample merge: values must be int64");
        return;
    };

    merge_start_time(from.start_time, &mut to.start_time);
    merge_end_time(from.end_time, &mut to.end_time);
    *to_value = to_value.saturating_add(*from_value);
}
