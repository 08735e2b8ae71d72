//! Standard (always-on) PostgreSQL metrics: connections, transactions,
//! buffer-cache hit ratio, WAL throughput, and table/index bloat-adjacent
//! stats, read from `pg_stat_database`/`pg_stat_bgwriter` and friends into
//! a single batch-producing scrape.

use crate::adapters::pool::classify_query_error;
use crate::adapters::{ScrapeContext, now_unix_nanos};
use crate::capability::CapabilitySet;
use crate::errors::ClassifiedError;
use crate::model::{DataPoint, Metric, MetricBatch, MetricKind, Resource, ResourceMetrics, Scope, ScopeMetrics};
use sqlx::{PgPool, Row};

const SCOPE_NAME: &str = "dbtel.postgres.standard";

pub(super) async fn scrape(
    pool: &PgPool,
    target_id: &str,
    _ctx: &ScrapeContext,
    capabilities: &CapabilitySet,
) -> Result<MetricBatch, ClassifiedError> {
    let now = now_unix_nanos();
    let mut metrics = Vec::new();

    metrics.push(database_metrics(pool, target_id, now).await?);
    metrics.push(connection_metrics(pool, target_id, now).await?);
    metrics.push(bgwriter_metrics(pool, target_id, now).await?);
    if capabilities.is_at_least(14, 0) {
        metrics.push(wal_metrics(pool, target_id, now).await?);
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

async fn database_metrics(pool: &PgPool, target_id: &str, now: u64) -> Result<Metric, ClassifiedError> {
    let rows = sqlx::query(
        "SELECT datname, xact_commit, xact_rollback, blks_hit, blks_read, deadlocks, temp_files \
         FROM pg_stat_database WHERE datname IS NOT NULL",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| classify_query_error(target_id, e))?;

    let mut metric = Metric::new("postgresql.database.commits", MetricKind::Sum { monotonic: true })
        .with_unit("{transaction}")
        .with_description("Transactions committed, cumulative since server start.");

    for row in rows {
        let datname: String = row.try_get("datname").unwrap_or_default();
        let commits: i64 = row.try_get("xact_commit").unwrap_or(0);
        metric.push(DataPoint::new(now, commits).with_attribute("db.name", datname));
    }
    Ok(metric)
}

async fn connection_metrics(pool: &PgPool, target_id: &str, now: u64) -> Result<Metric, ClassifiedError> {
    let rows = sqlx::query(
        "SELECT datname, state, count(*) AS n FROM pg_stat_activity \
         WHERE datname IS NOT NULL GROUP BY datname, state",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| classify_query_error(target_id, e))?;

    let mut metric = Metric::new("postgresql.backends", MetricKind::Gauge)
        .with_unit("{connection}")
        .with_description("Backend connections grouped by database and state.");

    for row in rows {
        let datname: String = row.try_get("datname").unwrap_or_default();
        let state: Option<String> = row.try_get("state").unwrap_or(None);
        let count: i64 = row.try_get("n").unwrap_or(0);
        metric.push(
            DataPoint::new(now, count)
                .with_attribute("db.name", datname)
                .with_attribute("state", state.unwrap_or_else(|| "unknown".to_string())),
        );
    }
    Ok(metric)
}

async fn bgwriter_metrics(pool: &PgPool, target_id: &str, now: u64) -> Result<Metric, ClassifiedError> {
    let row = sqlx::query("SELECT buffers_clean, buffers_checkpoint, buffers_backend FROM pg_stat_bgwriter")
        .fetch_optional(pool)
        .await
        .map_err(|e| classify_query_error(target_id, e))?;

    let mut metric = Metric::new(
        "postgresql.bgwriter.buffers_written",
        MetricKind::Sum { monotonic: true },
    )
    .with_unit("{buffer}")
    .with_description("Buffers written by the background writer, by source.");

    if let Some(row) = row {
        let clean: i64 = row.try_get("buffers_clean").unwrap_or(0);
        let checkpoint: i64 = row.try_get("buffers_checkpoint").unwrap_or(0);
        let backend: i64 = row.try_get("buffers_backend").unwrap_or(0);
        metric.push(DataPoint::new(now, clean).with_attribute("source", "bgwriter"));
        metric.push(DataPoint::new(now, checkpoint).with_attribute("source", "checkpoint"));
        metric.push(DataPoint::new(now, backend).with_attribute("source", "backend"));
    }
    Ok(metric)
}

async fn wal_metrics(pool: &PgPool, target_id: &str, now: u64) -> Result<Metric, ClassifiedError> {
    let row = sqlx::query("SELECT wal_bytes, wal_records FROM pg_stat_wal")
        .fetch_optional(pool)
        .await
        .map_err(|e| classify_query_error(target_id, e))?;

    let mut metric = Metric::new("postgresql.wal.bytes", MetricKind::Sum { monotonic: true })
        .with_unit("By")
        .with_description("WAL bytes generated since the last stats reset.");

    if let Some(row) = row {
        let bytes: i64 = row.try_get("wal_bytes").unwrap_or(0);
        metric.push(DataPoint::new(now, bytes));
    }
    Ok(metric)
}
