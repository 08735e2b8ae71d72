//! Query correlator (spec §4.11): joins query data points with session and
//! transaction context keyed by `(db.connection_id, db.query_id)`. A join
//! miss leaves the point unchanged rather than erroring.

use crate::model::{AttributeValue, MetricBatch};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub transaction_id: String,
    pub application_name: Option<String>,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CorrelationKey {
    connection_id: String,
    query_id: String,
}

/// Bounded LRU of recent session contexts, published by whatever collects
/// session/transaction telemetry (out of this module's scope — it only owns
/// the join). In production this is the PostgreSQL ASH sampler, which
/// publishes one entry per active backend on every sampling tick.
pub struct QueryCorrelator {
    cache: Mutex<LruCache<CorrelationKey, SessionContext>>,
}

impl QueryCorrelator {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<CorrelationKey, SessionContext>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Publish a session context for later correlation (called by whatever
    /// scrapes session/transaction state).
    pub fn publish(&self, connection_id: impl Into<String>, query_id: impl Into<String>, ctx: SessionContext) {
        let key = CorrelationKey {
            connection_id: connection_id.into(),
            query_id: query_id.into(),
        };
        self.lock().put(key, ctx);
    }

    /// Join each point carrying both correlation keys with its cached
    /// session context, if any.
    pub fn apply(&self, batch: &mut MetricBatch) {
        for rm in &mut batch.resources {
            for sm in &mut rm.scopes {
                for metric in &mut sm.metrics {
                    for point in &mut metric.data_points {
                        self.correlate_point(point);
                    }
                }
            }
        }
    }

    fn correlate_point(&self, point: &mut crate::model::DataPoint) {
        let (Some(AttributeValue::String(connection_id)), Some(AttributeValue::String(query_id))) =
            (point.attributes.get("db.connection_id"), point.attributes.get("db.query_id"))
        else {
            return;
        };
        let key = CorrelationKey {
            connection_id: connection_id.clone(),
            query_id: query_id.clone(),
        };
        let Some(ctx) = self.lock().get(&key).cloned() else {
            return;
        };
        point
            .attributes
            .insert("db.transaction.id".to_string(), AttributeValue::from(ctx.transaction_id));
        if let Some(app) = ctx.application_name {
            point.attributes.insert("db.client.application_name".to_string(), AttributeValue::from(app));
        }
    }
}

impl Default for QueryCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataPoint, Metric, MetricKind, Resource, ResourceMetrics, Scope, ScopeMetrics};

    fn batch_with(point: DataPoint) -> MetricBatch {
        let mut metric = Metric::new("db.query.count", MetricKind::Gauge);
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
    fn join_hit_adds_transaction_id() {
        let correlator = QueryCorrelator::new();
        correlator.publish(
            "conn-1",
            "query-1",
            SessionContext {
                transaction_id: "txn-42".to_string(),
                application_name: Some("billing-svc".to_string()),
            },
        );

        let point = DataPoint::new(1, 1_i64)
            .with_attribute("db.connection_id", "conn-1")
            .with_attribute("db.query_id", "query-1");
        let mut batch = batch_with(point);
        correlator.apply(&mut batch);

        batch.for_each_point(|_, _, _, point| {
            assert_eq!(point.get("db.transaction.id"), Some(&AttributeValue::from("txn-42")));
        });
    }

    #[test]
    fn join_miss_leaves_point_unchanged() {
        let correlator = QueryCorrelator::new();
        let point = DataPoint::new(1, 1_i64)
            .with_attribute("db.connection_id", "conn-missing")
            .with_attribute("db.query_id", "query-missing");
        let mut batch = batch_with(point.clone());
        correlator.apply(&mut batch);

        batch.for_each_point(|_, _, _, p| {
            assert_eq!(p, &point);
        });
    }
}
