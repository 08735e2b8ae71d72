//! Query-intelligence scrape for MySQL: slow queries, wait events, and
//! blocking sessions via `performance_schema`/`sys`. No active-session
//! history — MySQL has no primitive equivalent, so that probe always
//! disables itself in the selector (see `selector::registry::MYSQL_ASH`).

use crate::adapters::pool::classify_query_error;
use crate::adapters::{ScrapeContext, SelectedQueries, now_unix_nanos};
use crate::anonymize::anonymize_sql;
use crate::capability::CapabilitySet;
use crate::errors::ClassifiedError;
use crate::model::{DataPoint, Metric, MetricBatch, MetricKind, Resource, ResourceMetrics, Scope, ScopeMetrics};
use crate::selector::Probe;
use sqlx::{MySqlPool, Row};

const SCOPE_NAME: &str = "dbtel.mysql.query_intelligence";
const SLOW_QUERY_LIMIT: i64 = 50;

pub(super) async fn scrape(
    pool: &MySqlPool,
    target_id: &str,
    _ctx: &ScrapeContext,
    _capabilities: &CapabilitySet,
    selected: &SelectedQueries,
) -> Result<MetricBatch, ClassifiedError> {
    let now = now_unix_nanos();
    let mut metrics = Vec::new();

    if let Some(template) = selected.get(Probe::SlowQueries) {
        metrics.push(slow_queries(pool, target_id, template.sql, now).await?);
    }
    if let Some(template) = selected.get(Probe::WaitEvents) {
        metrics.push(wait_events(pool, target_id, template.sql, now).await?);
    }
    if let Some(template) = selected.get(Probe::BlockingSessions) {
        metrics.push(blocking_sessions(pool, target_id, template.sql, now).await?);
    }

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

async fn slow_queries(pool: &MySqlPool, target_id: &str, sql: &str, now: u64) -> Result<Metric, ClassifiedError> {
    let rows = sqlx::query(sql)
        .bind(SLOW_QUERY_LIMIT)
        .fetch_all(pool)
        .await
        .map_err(|e| classify_query_error(target_id, e))?;

    let mut metric = Metric::new("db.query.total_exec_time", MetricKind::Gauge)
        .with_unit("s")
        .with_description("Cumulative execution time for a normalized query shape.");

    for row in rows {
        let query_id: String = row.try_get("query_id").unwrap_or_default();
        let datname: Option<String> = row.try_get("datname").unwrap_or(None);
        let raw_text: String = row.try_get("query_text").unwrap_or_default();
        let calls: i64 = row.try_get("calls").unwrap_or(0);
        let total_exec_time_sec: f64 = row.try_get("total_exec_time_sec").unwrap_or(0.0);
        let anonymized = anonymize_sql(&raw_text);

        metric.push(
            DataPoint::new(now, total_exec_time_sec)
                .with_attribute("db.name", datname.unwrap_or_default())
                .with_attribute("db.query.id", query_id)
                .with_attribute("db.statement", anonymized.text)
                .with_attribute("db.query.calls", calls),
        );
    }
    Ok(metric)
}

async fn wait_events(pool: &MySqlPool, target_id: &str, sql: &str, now: u64) -> Result<Metric, ClassifiedError> {
    let rows = sqlx::query(sql)
        .fetch_all(pool)
        .await
        .map_err(|e| classify_query_error(target_id, e))?;

    let mut metric = Metric::new("db.wait_events.samples", MetricKind::Sum { monotonic: true })
        .with_unit("{event}")
        .with_description("Cumulative wait-event occurrences since the last stats reset.");

    for row in rows {
        let wait_event: String = row.try_get("wait_event").unwrap_or_default();
        let samples: i64 = row.try_get("samples").unwrap_or(0);
        metric.push(DataPoint::new(now, samples).with_attribute("db.wait_event.name", wait_event));
    }
    Ok(metric)
}

async fn blocking_sessions(
    pool: &MySqlPool,
    target_id: &str,
    sql: &str,
    now: u64,
) -> Result<Metric, ClassifiedError> {
    let rows = sqlx::query(sql)
        .fetch_all(pool)
        .await
        .map_err(|e| classify_query_error(target_id, e))?;

    let mut metric = Metric::new("db.blocking_sessions.count", MetricKind::Gauge)
        .with_unit("{session}")
        .with_description("Currently blocked sessions and the session blocking them.");

    for row in rows {
        let blocked_pid: String = row.try_get("blocked_pid").unwrap_or_default();
        let blocking_pid: String = row.try_get("blocking_pid").unwrap_or_default();
        let raw_text: String = row.try_get("blocked_query").unwrap_or_default();
        let anonymized = anonymize_sql(&raw_text);

        metric.push(
            DataPoint::new(now, 1_i64)
                .with_attribute("db.session.blocked_id", blocked_pid)
                .with_attribute("db.session.blocking_id", blocking_pid)
                .with_attribute("db.statement", anonymized.text),
        );
    }
    Ok(metric)
}
