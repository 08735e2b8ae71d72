//! Active-session-history sampling (spec §4.2): a background task takes a
//! high-frequency snapshot of `pg_stat_activity` independent of the scrape
//! cycle, buffering samples in a ring of fixed capacity. Overflow drops the
//! oldest sample and increments a drop counter rather than blocking or
//! erroring.

use crate::adapters::now_unix_nanos;
use crate::anonymize::anonymize_sql;
use crate::pipeline::query_correlator::{QueryCorrelator, SessionContext};
use sqlx::{PgPool, Row};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AshSample {
    pub timestamp_unix_nanos: u64,
    pub state: String,
    pub wait_event_type: Option<String>,
    pub wait_event: Option<String>,
    pub backend_type: String,
}

/// Fixed-capacity ring buffer of ASH samples, shared between the sampler
/// task and whichever scrape call drains it.
pub struct AshRingBuffer {
    capacity: usize,
    samples: Mutex<VecDeque<AshSample>>,
    dropped: AtomicU64,
}

impl AshRingBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            dropped: AtomicU64::new(0),
        }
    }

    async fn push_many(&self, batch: Vec<AshSample>) {
        let mut guard = self.samples.lock().await;
        for sample in batch {
            if guard.len() >= self.capacity {
                guard.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            guard.push_back(sample);
        }
    }

    /// Drains every buffered sample, leaving the ring empty for the next
    /// sampling window.
    pub async fn drain(&self) -> Vec<AshSample> {
        let mut guard = self.samples.lock().await;
        guard.drain(..).collect()
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Owns the background sampling loop; dropping it (via `stop`) cancels the
/// task rather than leaking it for the adapter's whole lifetime.
pub struct AshSampler {
    cancellation: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AshSampler {
    /// Spawns the background sampling loop. Each tick both buffers ASH
    /// samples for the next scrape's drain and publishes the session context
    /// of every active backend into `correlator`, keyed the same way
    /// `db.connection_id`/`db.query_id` are emitted on scraped points, so the
    /// query-correlator join actually has something to hit.
    #[must_use]
    pub fn spawn(pool: PgPool, buffer: Arc<AshRingBuffer>, correlator: Arc<QueryCorrelator>, period: Duration) -> Self {
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match sample_once(&pool).await {
                            Ok(samples) => buffer.push_many(samples).await,
                            Err(err) => warn!(error = %err, "active session history sample failed"),
                        }
                        if let Err(err) = publish_session_contexts(&pool, &correlator).await {
                            warn!(error = %err, "session context publish failed");
                        }
                    }
                }
            }
        });
        Self {
            cancellation,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.cancellation.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for AshSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sample_once(pool: &PgPool) -> Result<Vec<AshSample>, sqlx::Error> {
    let now = now_unix_nanos();

    let rows = sqlx::query(
        "SELECT state, wait_event_type, wait_event, backend_type \
         FROM pg_stat_activity \
         WHERE state IS NOT NULL AND pid != pg_backend_pid()",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| AshSample {
            timestamp_unix_nanos: now,
            state: row.try_get::<String, _>("state").unwrap_or_default(),
            wait_event_type: row.try_get::<Option<String>, _>("wait_event_type").unwrap_or(None),
            wait_event: row.try_get::<Option<String>, _>("wait_event").unwrap_or(None),
            backend_type: row.try_get::<String, _>("backend_type").unwrap_or_default(),
        })
        .collect())
}

/// Publishes each active backend's transaction/application context keyed by
/// `(pid, fingerprint of its current query)` — the same pair `blocking_sessions`
/// attaches to its points as `db.connection_id`/`db.query_id`.
async fn publish_session_contexts(pool: &PgPool, correlator: &QueryCorrelator) -> Result<(), sqlx::Error> {
    let rows = sqlx::query(
        "SELECT pid::text AS pid, COALESCE(backend_xid::text, '0') AS transaction_id, \
                application_name, LEFT(query, 4096) AS query_text \
         FROM pg_stat_activity \
         WHERE state IS NOT NULL AND pid != pg_backend_pid()",
    )
    .fetch_all(pool)
    .await?;

    for row in rows {
        let pid: String = row.try_get("pid").unwrap_or_default();
        let transaction_id: String = row.try_get("transaction_id").unwrap_or_default();
        let application_name: String = row.try_get("application_name").unwrap_or_default();
        let query_text: String = row.try_get("query_text").unwrap_or_default();

        let fingerprint = anonymize_sql(&query_text).fingerprint.to_string();
        let application_name = (!application_name.is_empty()).then_some(application_name);
        correlator.publish(pid, fingerprint, SessionContext { transaction_id, application_name });
    }
    Ok(())
}
