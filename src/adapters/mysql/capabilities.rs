//! Capability probing for MySQL targets: server version, `performance_schema`
//! and `sys` schema availability, and managed-cloud variant detection (RDS,
//! Aurora MySQL) via marker global variables.

use crate::adapters::ScrapeContext;
use crate::adapters::pool::classify_query_error;
use crate::capability::{CapabilitySet, DatabaseVariant, FeatureStatus};
use crate::errors::ClassifiedError;
use sqlx::{MySqlPool, Row};
use std::collections::HashMap;

pub(super) async fn probe(
    pool: &MySqlPool,
    target_id: &str,
    _ctx: &ScrapeContext,
) -> Result<CapabilitySet, ClassifiedError> {
    let server_version = fetch_version(pool, target_id).await?;
    let extensions = fetch_schema_availability(pool, target_id).await?;
    let can_read_performance_views = extensions
        .get("performance_schema")
        .is_some_and(|f| f.available);
    let variant = detect_variant(pool, target_id).await?;

    Ok(CapabilitySet {
        target_id: target_id.to_string(),
        server_version,
        extensions,
        can_read_performance_views,
        variant,
    })
}

async fn fetch_version(pool: &MySqlPool, target_id: &str) -> Result<(u32, u32, u32), ClassifiedError> {
    let row = sqlx::query("SELECT VERSION() AS v")
        .fetch_one(pool)
        .await
        .map_err(|e| classify_query_error(target_id, e))?;
    let raw: String = row.try_get("v").unwrap_or_default();
    let core = raw.split(['-', ' ']).next().unwrap_or("0.0.0");
    let mut parts = core.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    Ok((
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    ))
}

async fn fetch_schema_availability(
    pool: &MySqlPool,
    target_id: &str,
) -> Result<HashMap<String, FeatureStatus>, ClassifiedError> {
    let mut extensions = HashMap::new();
    for schema in ["performance_schema", "sys"] {
        let present = sqlx::query("SELECT 1 FROM information_schema.schemata WHERE schema_name = ?")
            .bind(schema)
            .fetch_optional(pool)
            .await
            .map_err(|e| classify_query_error(target_id, e))?
            .is_some();
        let status = if present {
            FeatureStatus::available("enabled")
        } else {
            FeatureStatus::unavailable()
        };
        extensions.insert(schema.to_string(), status);
    }
    Ok(extensions)
}

async fn detect_variant(pool: &MySqlPool, target_id: &str) -> Result<DatabaseVariant, ClassifiedError> {
    let is_aurora = sqlx::query("SHOW VARIABLES LIKE 'aurora_version'")
        .fetch_optional(pool)
        .await
        .map_err(|e| classify_query_error(target_id, e))?
        .is_some();
    if is_aurora {
        return Ok(DatabaseVariant::ManagedCloud("aurora".to_string()));
    }

    let is_rds = sqlx::query("SHOW VARIABLES LIKE 'rds%'")
        .fetch_optional(pool)
        .await
        .map_err(|e| classify_query_error(target_id, e))?
        .is_some();
    if is_rds {
        return Ok(DatabaseVariant::ManagedCloud("rds".to_string()));
    }

    Ok(DatabaseVariant::Standard)
}
