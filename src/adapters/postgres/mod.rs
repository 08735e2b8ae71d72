//! PostgreSQL adapter (spec §4.2).

pub mod ash;
pub mod capabilities;
pub mod intelligence;
pub mod standard;

use crate::adapters::pool::{self, PoolSettings};
use crate::adapters::{DbAdapter, ScrapeContext, SelectedQueries};
use crate::capability::CapabilitySet;
use crate::config::ScraperConfig;
use crate::errors::ClassifiedError;
use crate::model::MetricBatch;
use crate::pipeline::query_correlator::QueryCorrelator;
use ash::{AshRingBuffer, AshSampler};
use futures::future::BoxFuture;
use secrecy::SecretString;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

pub struct PostgresAdapter {
    target_id: String,
    pool: PgPool,
    ash: Arc<AshRingBuffer>,
    ash_sampler: AshSampler,
}

impl PostgresAdapter {
    /// Connect and start the background ASH sampler (spec §4.2: default
    /// 1 Hz, independent of the scrape interval).
    pub async fn connect(
        target_id: impl Into<String>,
        endpoint: &str,
        credentials: &SecretString,
        config: &ScraperConfig,
        query_correlator: Arc<QueryCorrelator>,
    ) -> Result<Self, ClassifiedError> {
        let target_id = target_id.into();
        let settings = PoolSettings {
            max_connections: config.max_connections,
            idle_connections: config.idle_connections,
            acquire_timeout: Duration::from_secs(30),
        };
        let pool = pool::connect_postgres(&target_id, endpoint, credentials, &settings).await?;

        let ash = Arc::new(AshRingBuffer::new(3600));
        let ash_sampler =
            AshSampler::spawn(pool.clone(), Arc::clone(&ash), query_correlator, Duration::from_secs(1));

        Ok(Self {
            target_id,
            pool,
            ash,
            ash_sampler,
        })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Drop for PostgresAdapter {
    fn drop(&mut self) {
        self.ash_sampler.stop();
    }
}

impl DbAdapter for PostgresAdapter {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    #[instrument(skip(self, ctx), fields(target = %self.target_id))]
    fn probe_capabilities<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
    ) -> BoxFuture<'a, Result<CapabilitySet, ClassifiedError>> {
        Box::pin(capabilities::probe(&self.pool, &self.target_id, ctx))
    }

    #[instrument(skip(self, ctx, capabilities), fields(target = %self.target_id))]
    fn scrape_standard<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        capabilities: &'a CapabilitySet,
    ) -> BoxFuture<'a, Result<MetricBatch, ClassifiedError>> {
        Box::pin(standard::scrape(&self.pool, &self.target_id, ctx, capabilities))
    }

    #[instrument(skip(self, ctx, capabilities, selected), fields(target = %self.target_id))]
    fn scrape_query_intelligence<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        capabilities: &'a CapabilitySet,
        selected: &'a SelectedQueries,
    ) -> BoxFuture<'a, Result<MetricBatch, ClassifiedError>> {
        Box::pin(intelligence::scrape(
            &self.pool,
            &self.target_id,
            ctx,
            capabilities,
            selected,
            &self.ash,
        ))
    }
}
