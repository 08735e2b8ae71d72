//! Error monitor (spec §4.14): observational pre-validation against known
//! downstream rejection rules. Violations are counted and the first
//! occurrence of each kind is logged, but the point is always forwarded —
//! this stage never drops data.

use crate::config::ErrorMonitorConfig;
use crate::model::MetricBatch;
use prometheus::{IntCounterVec, Opts, Registry};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ViolationKind {
    AttributeTooLong,
    MetricNameTooLong,
    TooManyAttributeKeys,
}

impl ViolationKind {
    const fn label(self) -> &'static str {
        match self {
            Self::AttributeTooLong => "attribute_too_long",
            Self::MetricNameTooLong => "metric_name_too_long",
            Self::TooManyAttributeKeys => "too_many_attribute_keys",
        }
    }
}

struct SuppressionState {
    logged_first: bool,
    /// Start of the current counting window; reset once `error_suppression_duration` elapses.
    window_start: Option<Instant>,
    count_in_window: u64,
    alerted_in_window: bool,
}

pub struct ErrorMonitor {
    config: ErrorMonitorConfig,
    counters: IntCounterVec,
    suppression: Mutex<HashMap<ViolationKind, SuppressionState>>,
}

impl ErrorMonitor {
    #[must_use]
    pub fn new(config: ErrorMonitorConfig) -> Self {
        let counters = IntCounterVec::new(
            Opts::new("points_violations_total", "Pre-validation violations observed, by kind"),
            &["kind"],
        )
        .unwrap_or_else(|_| unreachable!("static metric definition"));
        Self {
            config,
            counters,
            suppression: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.counters.clone()))?;
        Ok(())
    }

    /// Inspect every point and record violations; never mutates or drops
    /// the batch (spec §4.14: "forwarded regardless").
    pub fn apply(&self, batch: &MetricBatch) {
        batch.for_each_point(|_, _, metric, point| {
            if metric.name.len() > self.config.max_metric_name_length {
                self.record(ViolationKind::MetricNameTooLong, &metric.name);
            }
            if point.attributes.len() > self.config.max_attribute_keys_per_metric {
                self.record(ViolationKind::TooManyAttributeKeys, &metric.name);
            }
            for value in point.attributes.values() {
                if value.coerced_len() > self.config.max_attribute_length {
                    self.record(ViolationKind::AttributeTooLong, &metric.name);
                }
            }
        });
    }

    fn record(&self, kind: ViolationKind, context: &str) {
        self.counters.with_label_values(&[kind.label()]).inc();

        let mut guard = match self.suppression.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = guard.entry(kind).or_insert(SuppressionState {
            logged_first: false,
            window_start: None,
            count_in_window: 0,
            alerted_in_window: false,
        });

        if !entry.logged_first {
            entry.logged_first = true;
            warn!(kind = kind.label(), context, "error monitor: first occurrence of violation");
        }

        let now = Instant::now();
        let window = self.suppression_window();
        let window_expired = entry.window_start.is_none_or(|start| now.duration_since(start) >= window);
        if window_expired {
            entry.window_start = Some(now);
            entry.count_in_window = 0;
            entry.alerted_in_window = false;
        }
        entry.count_in_window += 1;

        let threshold = self.config.alert_threshold.max(1);
        if !entry.alerted_in_window && entry.count_in_window >= threshold {
            entry.alerted_in_window = true;
            warn!(
                kind = kind.label(),
                count = entry.count_in_window,
                threshold,
                "error monitor: alert threshold event"
            );
        }
    }

    fn suppression_window(&self) -> Duration {
        self.config.error_suppression_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataPoint, Metric, MetricBatch, MetricKind, Resource, ResourceMetrics, Scope, ScopeMetrics};

    fn batch_with(point: DataPoint) -> MetricBatch {
        let mut metric = Metric::new("db.connections", MetricKind::Gauge);
        metric.push(point);
        MetricBatch {
            resources: vec![ResourceMetrics {
                resource: Resource::new(),
                scopes: vec![ScopeMetrics {
                    scope: Scope::new("dbtel"),
                    metrics: vec![metric],
                }],
            }],
        }
    }

    #[test]
    fn records_overlong_attribute_without_dropping() {
        let monitor = ErrorMonitor::new(ErrorMonitorConfig {
            max_attribute_length: 8,
            max_metric_name_length: 255,
            alert_threshold: 1,
            error_suppression_secs: 300,
            max_attribute_keys_per_metric: 32,
        });
        let point = DataPoint::new(1, 1_i64).with_attribute("db.name", "a-very-long-database-name");
        let batch = batch_with(point);
        monitor.apply(&batch);
        assert_eq!(batch.point_count(), 1, "monitor never drops points");
        assert_eq!(monitor.counters.with_label_values(&["attribute_too_long"]).get(), 1);
    }

    fn alerted(monitor: &ErrorMonitor, kind: ViolationKind) -> bool {
        let guard = match monitor.suppression.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(&kind).is_some_and(|entry| entry.alerted_in_window)
    }

    #[test]
    fn alert_only_fires_once_threshold_violations_land_within_the_window() {
        let monitor = ErrorMonitor::new(ErrorMonitorConfig {
            max_attribute_length: 8,
            max_metric_name_length: 255,
            alert_threshold: 3,
            error_suppression_secs: 300,
            max_attribute_keys_per_metric: 32,
        });

        monitor.record(ViolationKind::AttributeTooLong, "db.connections");
        assert!(!alerted(&monitor, ViolationKind::AttributeTooLong));
        monitor.record(ViolationKind::AttributeTooLong, "db.connections");
        assert!(!alerted(&monitor, ViolationKind::AttributeTooLong));
        monitor.record(ViolationKind::AttributeTooLong, "db.connections");
        assert!(alerted(&monitor, ViolationKind::AttributeTooLong));

        // apply() itself still forwards every point regardless of alert state.
        let batch = batch_with(DataPoint::new(1, 1_i64).with_attribute("db.name", "a-very-long-database-name"));
        monitor.apply(&batch);
        assert_eq!(batch.point_count(), 1);
    }
}
