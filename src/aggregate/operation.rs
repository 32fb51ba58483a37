//! Merging of report operations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::warn;

use crate::signature::{report_metric_value_signature, Signature};
use crate::types::{
    merge_end_time, merge_start_time, MetricKind, MetricKindMap, MetricValue, MetricValueData,
    MetricValueSet, Operation,
};

/// Folds operations with identical report signatures into one.
///
/// The first operation becomes the base; its samples (and every merged
/// operation's samples) live in per-metric maps keyed by metric-value
/// signature until [`into_operation`](Self::into_operation) rebuilds the
/// flat `metric_value_sets` list.
pub(crate) struct OperationAggregator {
    /// Base operation. Its `metric_value_sets` list stays empty; samples
    /// are held in `metric_value_sets` below.
    operation: Operation,
    metric_value_sets: BTreeMap<String, HashMap<Signature, MetricValue>>,
    metric_kinds: Arc<MetricKindMap>,
}

impl OperationAggregator {
    pub(crate) fn new(operation: Operation, metric_kinds: Arc<MetricKindMap>) -> Self {
        let mut aggregator = Self {
            operation,
            metric_value_sets: BTreeMap::new(),
            metric_kinds,
        };
        let sets = std::mem::take(&mut aggregator.operation.metric_value_sets);
        aggregator.merge_metric_value_sets(&sets);
        aggregator
    }

    /// Merge another operation with the same signature into this one.
    ///
    /// The time window widens to cover both operations, samples merge per
    /// metric kind, and log entries concatenate.
    pub(crate) fn merge(&mut self, operation: &Operation) {
        merge_start_time(operation.start_time, &mut self.operation.start_time);
        merge_end_time(operation.end_time, &mut self.operation.end_time);

        self.merge_metric_value_sets(&operation.metric_value_sets);
        self.operation
            .log_entries
            .extend(operation.log_entries.iter().cloned());
    }

    /// Rebuild the merged operation, draining the per-metric maps.
    pub(crate) fn into_operation(self) -> Operation {
        let mut operation = self.operation;
        operation.metric_value_sets = self
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
            let kind = self
                .metric_kinds
                .get(&set.metric_name)
                .copied()
                .unwrap_or_default();
            let values = self
                .metric_value_sets
                .entry(set.metric_name.clone())
                .or_default();

            for value in &set.metric_values {
                let signature = report_metric_value_signature(value);
                match values.get_mut(&signature) {
                    Some(existing) => merge_metric_value(kind, value, existing),
                    None => {
                        values.insert(signature, value.clone());
                    }
                }
            }
        }
    }
}

fn merge_metric_value(kind: MetricKind, from: &MetricValue, to: &mut MetricValue) {
    match kind {
        MetricKind::Delta => merge_delta_metric_value(from, to),
        MetricKind::Cumulative | MetricKind::Gauge => merge_cumulative_or_gauge(from, to),
    }
}

/// The sample with the later end time wins outright. Ties go to the
/// incoming sample.
fn merge_cumulative_or_gauge(from: &MetricValue, to: &mut MetricValue) {
    if from.end_time < to.end_time {
        return;
    }
    *to = from.clone();
}

/// Sum values and widen the time window. Gaps or overlap between the two
/// windows are fine.
fn merge_delta_metric_value(from: &MetricValue, to: &mut MetricValue) {
    if std::mem::discriminant(&from.value) != std::mem::discriminant(&to.value) {
        warn!("dropping sample merge: metric values are not compatible");
        return;
    }

    merge_start_time(from.start_time, &mut to.start_time);
    merge_end_time(from.end_time, &mut to.end_time);

    match (&from.value, &mut to.value) {
        (MetricValueData::Int64(from), MetricValueData::Int64(to)) => {
            *to = to.saturating_add(*from);
        }
        (MetricValueData::Double(from), MetricValueData::Double(to)) => {
            *to += from;
        }
        (MetricValueData::Money(from), MetricValueData::Money(to)) => {
            // The currency code is part of the metric value signature, so
            // the codes are identical when two samples reach this point.
            if from.currency_code == to.currency_code {
                *to = to.saturating_add(from);
            } else {
                warn!("dropping money merge: currency codes differ despite equal signatures");
            }
        }
        (MetricValueData::Distribution(from), MetricValueData::Distribution(to)) => {
            to.merge(from);
        }
        _ => {}
    }
}
