//! Cost control (spec §4.13): bounds cardinality per metric name and tracks
//! an estimated cost against a configured monthly budget, escalating to an
//! "aggressive mode" that strips known high-cardinality dimensions once the
//! projected spend exceeds the budget. Each metric name gets its own
//! cardinality budget, so a noisy metric can't starve an unrelated one.

use crate::config::CostControlConfig;
use crate::model::fingerprint::series_fingerprint;
use crate::model::MetricBatch;
use lru::LruCache;
use prometheus::{IntCounter, IntGauge, Registry};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub struct CostControl {
    config: CostControlConfig,
    /// One LRU per metric name: spec §4.13 caps cardinality per `metric_name`,
    /// not across the whole pipeline, so a noisy metric can't starve the
    /// budget of every other metric sharing the process.
    seen_series: Mutex<HashMap<String, LruCache<u64, ()>>>,
    cardinality_limit: NonZeroUsize,
    aggressive: AtomicBool,
    cumulative_cost: Mutex<f64>,
    dropped_cardinality: IntCounter,
    estimated_monthly_cost: IntGauge,
}

impl CostControl {
    #[must_use]
    pub fn new(config: CostControlConfig) -> Self {
        let cardinality_limit = NonZeroUsize::new(config.metric_cardinality_limit).unwrap_or(NonZeroUsize::MIN);
        let dropped_cardinality = IntCounter::new(
            "points_dropped_cardinality_total",
            "Points dropped for exceeding the configured series cardinality limit",
        )
        .unwrap_or_else(|_| unreachable!("static metric definition"));
        let estimated_monthly_cost = IntGauge::new(
            "cost_control_estimated_monthly_cost_dollars",
            "Projected monthly telemetry cost at the current point rate",
        )
        .unwrap_or_else(|_| unreachable!("static metric definition"));
        Self {
            aggressive: AtomicBool::new(config.aggressive_mode_enabled),
            config,
            seen_series: Mutex::new(HashMap::new()),
            cardinality_limit,
            cumulative_cost: Mutex::new(0.0),
            dropped_cardinality,
            estimated_monthly_cost,
        }
    }

    pub fn register(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.dropped_cardinality.clone()))?;
        registry.register(Box::new(self.estimated_monthly_cost.clone()))?;
        Ok(())
    }

    #[must_use]
    pub fn is_aggressive(&self) -> bool {
        self.aggressive.load(Ordering::Relaxed)
    }

    /// Filters a batch in place: drops points whose series would exceed the
    /// cardinality limit, then (in aggressive mode) strips configured
    /// high-cardinality dimensions from whatever remains. Finally re-prices
    /// the batch and flips the aggressive-mode flag if the projection now
    /// crosses the budget.
    pub fn apply(&self, batch: &mut MetricBatch) {
        self.enforce_cardinality(batch);
        if self.is_aggressive() {
            self.strip_high_cardinality_dimensions(batch);
        }
        self.observe_batch_cost(batch);
    }

    fn enforce_cardinality(&self, batch: &mut MetricBatch) {
        batch.retain_points(|resource, scope, metric, point| {
            let fingerprint = series_fingerprint(resource, scope, &metric.name, &point.attributes);
            let mut series_by_metric = self.lock_series();
            let cache = series_by_metric
                .entry(metric.name.clone())
                .or_insert_with(|| LruCache::new(self.cardinality_limit));
            if cache.contains(&fingerprint) {
                cache.promote(&fingerprint);
                return true;
            }
            if cache.len() < cache.cap().get() {
                cache.put(fingerprint, ());
                return true;
            }
            drop(series_by_metric);
            self.dropped_cardinality.inc();
            false
        });
    }

    fn strip_high_cardinality_dimensions(&self, batch: &mut MetricBatch) {
        for rm in &mut batch.resources {
            for sm in &mut rm.scopes {
                for metric in &mut sm.metrics {
                    for point in &mut metric.data_points {
                        for dim in &self.config.high_cardinality_dimensions {
                            point.attributes.remove(dim);
                        }
                    }
                }
            }
        }
    }

    /// Prices the batch at `bytes_per_datapoint` and folds it into a running
    /// cumulative estimate for the process lifetime. This is a coarse
    /// running total, not a precise byte count of the serialized OTLP
    /// payload, but it is monotonic and comparable against `monthly_budget`
    /// for the purposes of tripping aggressive mode.
    fn observe_batch_cost(&self, batch: &MetricBatch) {
        #[allow(clippy::cast_precision_loss)]
        let batch_cost = batch.point_count() as f64 * self.config.bytes_per_datapoint;

        let mut cumulative = match self.cumulative_cost.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cumulative += batch_cost;
        let total = *cumulative;
        drop(cumulative);

        #[allow(clippy::cast_possible_truncation)]
        self.estimated_monthly_cost.set(total as i64);

        if total > self.config.monthly_budget {
            self.aggressive.store(true, Ordering::Relaxed);
        }
    }

    fn lock_series(&self) -> std::sync::MutexGuard<'_, HashMap<String, LruCache<u64, ()>>> {
        match self.seen_series.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::model::{DataPoint, Metric, MetricKind, Resource, ResourceMetrics, Scope, ScopeMetrics};

    fn batch_with_points(points: Vec<DataPoint>) -> MetricBatch {
        let mut metric = Metric::new("db.query.count", MetricKind::Gauge);
        for p in points {
            metric.push(p);
        }
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

    fn base_config() -> CostControlConfig {
        CostControlConfig {
            metric_cardinality_limit: 2,
            high_cardinality_dimensions: vec!["db.query.id".to_string()],
            monthly_budget: 1_000_000.0,
            aggressive_mode_enabled: false,
            bytes_per_datapoint: 8.0,
        }
    }

    #[test]
    fn drops_points_beyond_cardinality_limit() {
        let control = CostControl::new(base_config());
        let points = vec![
            DataPoint::new(1, 1_i64).with_attribute("series", "a"),
            DataPoint::new(1, 1_i64).with_attribute("series", "b"),
            DataPoint::new(1, 1_i64).with_attribute("series", "c"),
        ];
        let mut batch = batch_with_points(points);
        control.apply(&mut batch);
        assert_eq!(batch.point_count(), 2);
    }

    #[test]
    fn repeated_series_does_not_consume_extra_cardinality_budget() {
        let control = CostControl::new(base_config());
        let mut batch = batch_with_points(vec![DataPoint::new(1, 1_i64).with_attribute("series", "a")]);
        control.apply(&mut batch);
        let mut batch2 = batch_with_points(vec![
            DataPoint::new(2, 1_i64).with_attribute("series", "a"),
            DataPoint::new(2, 1_i64).with_attribute("series", "b"),
        ]);
        control.apply(&mut batch2);
        assert_eq!(batch2.point_count(), 2);
    }

    #[test]
    fn aggressive_mode_strips_configured_dimensions() {
        let mut config = base_config();
        config.aggressive_mode_enabled = true;
        let control = CostControl::new(config);
        let point = DataPoint::new(1, 1_i64).with_attribute("db.query.id", "q-1");
        let mut batch = batch_with_points(vec![point]);
        control.apply(&mut batch);
        batch.for_each_point(|_, _, _, p| {
            assert!(p.get("db.query.id").is_none());
        });
    }

    #[test]
    fn cardinality_budget_is_tracked_separately_per_metric_name() {
        let control = CostControl::new(base_config());

        let mut connections_batch = MetricBatch {
            resources: vec![ResourceMetrics {
                resource: Resource::new(),
                scopes: vec![ScopeMetrics {
                    scope: Scope::new("dbtel"),
                    metrics: vec![{
                        let mut metric = Metric::new("postgresql.backends", MetricKind::Gauge);
                        metric.push(DataPoint::new(1, 1_i64).with_attribute("series", "a"));
                        metric.push(DataPoint::new(1, 1_i64).with_attribute("series", "b"));
                        metric
                    }],
                }],
            }],
        };
        control.apply(&mut connections_batch);
        assert_eq!(connections_batch.point_count(), 2, "first metric fills its own budget");

        let mut commits_batch = MetricBatch {
            resources: vec![ResourceMetrics {
                resource: Resource::new(),
                scopes: vec![ScopeMetrics {
                    scope: Scope::new("dbtel"),
                    metrics: vec![{
                        let mut metric = Metric::new("postgresql.commits", MetricKind::Gauge);
                        metric.push(DataPoint::new(1, 1_i64).with_attribute("series", "a"));
                        metric.push(DataPoint::new(1, 1_i64).with_attribute("series", "b"));
                        metric
                    }],
                }],
            }],
        };
        control.apply(&mut commits_batch);
        assert_eq!(
            commits_batch.point_count(),
            2,
            "a second, unrelated metric name gets its own cardinality budget instead of sharing the first metric's"
        );
    }

    #[test]
    fn exceeding_budget_flips_aggressive_mode() {
        let mut config = base_config();
        config.monthly_budget = 0.0;
        config.metric_cardinality_limit = 10;
        let control = CostControl::new(config);
        let mut batch = batch_with_points(vec![DataPoint::new(1, 1_i64)]);
        control.apply(&mut batch);
        assert!(control.is_aggressive());
    }
}
