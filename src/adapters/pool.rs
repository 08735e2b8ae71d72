//! Connection pool construction shared by the PostgreSQL and MySQL
//! adapters (spec §4.2, §4.16): configurable max/idle counts, an
//! acquire timeout, and a health check on reuse after 30s idle.

use crate::errors::{ClassifiedError, ErrorClass};
use secrecy::{ExposeSecret, SecretString};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{ConnectOptions, Executor};
use std::str::FromStr;
use std::time::Duration;

/// Connections idle longer than this are health-checked before reuse
/// (spec §4.2).
const IDLE_HEALTH_CHECK_THRESHOLD: Duration = Duration::from_secs(30);

pub struct PoolSettings {
    pub max_connections: u32,
    pub idle_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            idle_connections: 2,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

pub async fn connect_postgres(
    target_id: &str,
    endpoint: &str,
    credentials: &SecretString,
    settings: &PoolSettings,
) -> Result<PgPool, ClassifiedError> {
    let opts = PgConnectOptions::from_str(endpoint)
        .map_err(|e| ClassifiedError::for_target(ErrorClass::Configuration, target_id, e.into()))?
        .password(credentials.expose_secret())
        .disable_statement_logging();

    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.idle_connections)
        .acquire_timeout(settings.acquire_timeout)
        .before_acquire(|conn, meta| {
            Box::pin(async move {
                if meta.idle_for > IDLE_HEALTH_CHECK_THRESHOLD {
                    return conn.execute("SELECT 1").await.map(|_| true);
                }
                Ok(true)
            })
        })
        .connect_with(opts)
        .await
        .map_err(|e| classify_connect_error(target_id, e))
}

pub async fn connect_mysql(
    target_id: &str,
    endpoint: &str,
    credentials: &SecretString,
    settings: &PoolSettings,
) -> Result<MySqlPool, ClassifiedError> {
    let opts = MySqlConnectOptions::from_str(endpoint)
        .map_err(|e| ClassifiedError::for_target(ErrorClass::Configuration, target_id, e.into()))?
        .password(credentials.expose_secret())
        .disable_statement_logging();

    MySqlPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.idle_connections)
        .acquire_timeout(settings.acquire_timeout)
        .before_acquire(|conn, meta| {
            Box::pin(async move {
                if meta.idle_for > IDLE_HEALTH_CHECK_THRESHOLD {
                    return conn.execute("SELECT 1").await.map(|_| true);
                }
                Ok(true)
            })
        })
        .connect_with(opts)
        .await
        .map_err(|e| classify_connect_error(target_id, e))
}

/// Classify a pool/connect error per §4.16: pool exhaustion and most
/// connect failures are transient and retryable at the next tick;
/// anything that looks like a malformed DSN is a configuration error.
fn classify_connect_error(target_id: &str, error: sqlx::Error) -> ClassifiedError {
    match &error {
        sqlx::Error::PoolTimedOut => {
            ClassifiedError::for_target(ErrorClass::TransientIo, target_id, error.into())
        }
        sqlx::Error::Configuration(_) => {
            ClassifiedError::for_target(ErrorClass::Configuration, target_id, error.into())
        }
        _ => ClassifiedError::for_target(ErrorClass::TransientIo, target_id, error.into()),
    }
}

/// Classify a query-execution failure once connected. Everything sqlx can
/// raise mid-scrape (timeout, dropped connection, protocol error) is
/// transient from the breaker's point of view; a malformed query template
/// would be a programming error, not a runtime classification.
#[must_use]
pub fn classify_query_error(target_id: &str, error: sqlx::Error) -> ClassifiedError {
    ClassifiedError::for_target(ErrorClass::TransientIo, target_id, error.into())
}
