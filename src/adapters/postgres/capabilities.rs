//! Capability probing for PostgreSQL targets (spec §4.15): server version,
//! installed extensions, permission to read performance views, and managed
//! cloud / fork variant detection.
//!
//! Consolidates what would otherwise be one inline probe per collector
//! (version query, extension inventory, RDS/Aurora marker settings,
//! superuser check) into a single capability-detection sweep.

use crate::adapters::ScrapeContext;
use crate::capability::{CapabilitySet, DatabaseVariant, FeatureStatus};
use crate::errors::ClassifiedError;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

const TRACKED_EXTENSIONS: &[&str] = &["pg_stat_statements", "pg_wait_sampling", "pg_stat_kcache"];

pub(super) async fn probe(
    pool: &PgPool,
    target_id: &str,
    _ctx: &ScrapeContext,
) -> Result<CapabilitySet, ClassifiedError> {
    let server_version = fetch_version(pool, target_id).await?;
    let extensions = fetch_extensions(pool, target_id).await?;
    let can_read_performance_views = fetch_can_read_activity(pool, target_id).await?;
    let variant = detect_variant(pool, target_id).await?;

    Ok(CapabilitySet {
        target_id: target_id.to_string(),
        server_version,
        extensions,
        can_read_performance_views,
        variant,
    })
}

async fn fetch_version(pool: &PgPool, target_id: &str) -> Result<(u32, u32, u32), ClassifiedError> {
    let row = sqlx::query("SHOW server_version_num")
        .fetch_one(pool)
        .await
        .map_err(|e| crate::adapters::pool::classify_query_error(target_id, e))?;
    let num: String = row
        .try_get(0)
        .map_err(|e| crate::adapters::pool::classify_query_error(target_id, e))?;
    let num: u32 = num.parse().unwrap_or(0);
    Ok((num / 10_000, (num / 100) % 100, num % 100))
}

async fn fetch_extensions(
    pool: &PgPool,
    target_id: &str,
) -> Result<HashMap<String, FeatureStatus>, ClassifiedError> {
    let rows = sqlx::query("SELECT extname, extversion FROM pg_extension")
        .fetch_all(pool)
        .await
        .map_err(|e| crate::adapters::pool::classify_query_error(target_id, e))?;

    let installed: HashMap<String, String> = rows
        .iter()
        .filter_map(|r| Some((r.try_get::<String, _>(0).ok()?, r.try_get::<String, _>(1).ok()?)))
        .collect();

    let mut extensions = HashMap::new();
    for name in TRACKED_EXTENSIONS {
        let status = match installed.get(*name) {
            Some(version) => FeatureStatus::available(version.clone()),
            None => FeatureStatus::unavailable(),
        };
        extensions.insert((*name).to_string(), status);
    }
    Ok(extensions)
}

async fn fetch_can_read_activity(pool: &PgPool, target_id: &str) -> Result<bool, ClassifiedError> {
    match sqlx::query("SELECT 1 FROM pg_stat_activity LIMIT 1")
        .fetch_optional(pool)
        .await
    {
        Ok(_) => Ok(true),
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42501") => Ok(false),
        Err(e) => Err(crate::adapters::pool::classify_query_error(target_id, e)),
    }
}

/// Looks for the marker settings RDS/Aurora register in `pg_settings` and
/// falls back to extension fingerprints for forks like Timescale/Citus.
async fn detect_variant(pool: &PgPool, target_id: &str) -> Result<DatabaseVariant, ClassifiedError> {
    let is_rds = sqlx::query(
        "SELECT 1 FROM pg_settings WHERE name = 'rds.superuser_reserved_connections'",
    )
    .fetch_optional(pool)
    .await
    .map_err(|e| crate::adapters::pool::classify_query_error(target_id, e))?
    .is_some();
    if is_rds {
        return Ok(DatabaseVariant::ManagedCloud("rds".to_string()));
    }

    let is_aurora = sqlx::query("SELECT 1 FROM pg_settings WHERE name = 'aurora_version'")
        .fetch_optional(pool)
        .await
        .map_err(|e| crate::adapters::pool::classify_query_error(target_id, e))?
        .is_some();
    if is_aurora {
        return Ok(DatabaseVariant::ManagedCloud("aurora".to_string()));
    }

    for (fork_name, extname) in [("timescaledb", "timescaledb"), ("citus", "citus")] {
        let present = sqlx::query("SELECT 1 FROM pg_extension WHERE extname = $1")
            .bind(extname)
            .fetch_optional(pool)
            .await
            .map_err(|e| crate::adapters::pool::classify_query_error(target_id, e))?
            .is_some();
        if present {
            return Ok(DatabaseVariant::Fork(fork_name.to_string()));
        }
    }

    Ok(DatabaseVariant::Standard)
}
