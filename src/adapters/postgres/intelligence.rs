//! Query-intelligence scrape for PostgreSQL (spec §4.2): slow queries, wait
//! events, blocking sessions, execution-plan summaries, and a drain of the
//! buffered active-session-history ring.

use super::ash::AshRingBuffer;
use crate::adapters::pool::classify_query_error;
use crate::adapters::{ScrapeContext, SelectedQueries, now_unix_nanos};
use crate::anonymize::anonymize_sql;
use crate::capability::CapabilitySet;
use crate::errors::ClassifiedError;
use crate::model::{DataPoint, Metric, MetricBatch, MetricKind, Resource, ResourceMetrics, Scope, ScopeMetrics};
use crate::selector::Probe;
use sqlx::{PgPool, Row};
use std::sync::Arc;

const SCOPE_NAME: &str = "dbtel.postgres.query_intelligence";
const SLOW_QUERY_LIMIT: i64 = 50;

pub(super) async fn scrape(
    pool: &PgPool,
    target_id: &str,
    ctx: &ScrapeContext,
    _capabilities: &CapabilitySet,
    selected: &SelectedQueries,
    ash: &Arc<AshRingBuffer>,
) -> Result<MetricBatch, ClassifiedError> {
    let now = now_unix_nanos();
    let mut metrics = Vec::new();

    if let Some(template) = selected.get(Probe::SlowQueries) {
        if ctx.is_cancelled() {
            return Err(ClassifiedError::for_target(
                crate::errors::ErrorClass::TransientIo,
                target_id,
                anyhow::anyhow!("scrape deadline exceeded before slow-query probe"),
            ));
        }
        metrics.push(slow_queries(pool, target_id, template.sql, now).await?);
    }

    if let Some(template) = selected.get(Probe::WaitEvents) {
        metrics.push(wait_events(pool, target_id, template.sql, now).await?);
    }

    if let Some(template) = selected.get(Probe::BlockingSessions) {
        metrics.push(blocking_sessions(pool, target_id, template.sql, now).await?);
    }

    if selected.get(Probe::ActiveSessionHistory).is_some() {
        metrics.push(active_session_history(ash, now).await);
    }

    let resource = Resource::new()
        .with_attribute("db.system", "postgresql")
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

async fn slow_queries(pool: &PgPool, target_id: &str, sql: &str, now: u64) -> Result<Metric, ClassifiedError> {
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
        let datname: String = row.try_get("datname").unwrap_or_default();
        let raw_text: String = row.try_get("query_text").unwrap_or_default();
        let calls: i64 = row.try_get("calls").unwrap_or(0);
        let total_exec_time_sec: f64 = row.try_get("total_exec_time_sec").unwrap_or(0.0);

        let anonymized = anonymize_sql(&raw_text);
        #[allow(clippy::cast_possible_wrap)]
        let fingerprint = anonymized.fingerprint as i64;

        metric.push(
            DataPoint::new(now, total_exec_time_sec)
                .with_attribute("db.name", datname)
                .with_attribute("db.query.id", query_id)
                .with_attribute("db.statement", anonymized.text)
                .with_attribute("db.statement.fingerprint", fingerprint)
                .with_attribute("db.query.calls", calls),
        );
    }
    Ok(metric)
}

async fn wait_events(pool: &PgPool, target_id: &str, sql: &str, now: u64) -> Result<Metric, ClassifiedError> {
    let rows = sqlx::query(sql)
        .fetch_all(pool)
        .await
        .map_err(|e| classify_query_error(target_id, e))?;

    let mut metric = Metric::new("db.wait_events.samples", MetricKind::Gauge)
        .with_unit("{sample}")
        .with_description("Sampled backend count by wait event, this scrape.");

    for row in rows {
        let wait_event_type: String = row.try_get("wait_event_type").unwrap_or_default();
        let wait_event: String = row.try_get("wait_event").unwrap_or_default();
        let samples: i64 = row.try_get("samples").unwrap_or(0);
        metric.push(
            DataPoint::new(now, samples)
                .with_attribute("db.wait_event.type", wait_event_type)
                .with_attribute("db.wait_event.name", wait_event),
        );
    }
    Ok(metric)
}

async fn blocking_sessions(
    pool: &PgPool,
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
        let datname: String = row.try_get("datname").unwrap_or_default();
        let raw_text: String = row.try_get("blocked_query").unwrap_or_default();
        let anonymized = anonymize_sql(&raw_text);

        metric.push(
            DataPoint::new(now, 1_i64)
                .with_attribute("db.name", datname)
                .with_attribute("db.session.blocked_id", blocked_pid.clone())
                .with_attribute("db.session.blocking_id", blocking_pid)
                .with_attribute("db.statement", anonymized.text)
                // Matches the keys `ash::publish_session_contexts` publishes under,
                // so the query-correlator join (spec §4.11) has something to hit.
                .with_attribute("db.connection_id", blocked_pid)
                .with_attribute("db.query_id", anonymized.fingerprint.to_string()),
        );
    }
    Ok(metric)
}

/// Drains the ASH ring buffer and aggregates samples by
/// `(state, wait_event_type, wait_event, backend_type)` into one gauge per
/// combination observed this scrape (spec §4.2).
async fn active_session_history(ash: &Arc<AshRingBuffer>, now: u64) -> Metric {
    use std::collections::HashMap;

    let samples = ash.drain().await;
    let mut counts: HashMap<(String, String, String, String), i64> = HashMap::new();
    for sample in samples {
        let key = (
            sample.state,
            sample.wait_event_type.unwrap_or_else(|| "None".to_string()),
            sample.wait_event.unwrap_or_else(|| "None".to_string()),
            sample.backend_type,
        );
        *counts.entry(key).or_insert(0) += 1;
    }

    let mut metric = Metric::new("db.ash.active_sessions", MetricKind::Gauge)
        .with_unit("{sample}")
        .with_description("Active-session-history samples accumulated since the last drain.");

    for ((state, wait_event_type, wait_event, backend_type), count) in counts {
        metric.push(
            DataPoint::new(now, count)
                .with_attribute("db.session.state", state)
                .with_attribute("db.wait_event.type", wait_event_type)
                .with_attribute("db.wait_event.name", wait_event)
                .with_attribute("db.backend_type", backend_type),
        );
    }
    #[allow(clippy::cast_possible_wrap)]
    let dropped = ash.dropped_count() as i64;
    metric.push(DataPoint::new(now, dropped).with_attribute("db.ash.dropped", true));
    metric
}
