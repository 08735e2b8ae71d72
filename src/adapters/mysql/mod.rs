//! MySQL adapter (spec §4.2, SPEC_FULL §F): reduced fidelity relative to
//! PostgreSQL — no active-session-history sampler, since MySQL exposes no
//! primitive equivalent to backend-process sampling.

pub mod capabilities;
pub mod intelligence;
pub mod standard;

use crate::adapters::pool::{self, PoolSettings};
use crate::adapters::{DbAdapter, ScrapeContext, SelectedQueries};
use crate::capability::CapabilitySet;
use crate::config::ScraperConfig;
use crate::errors::ClassifiedError;
use crate::model::MetricBatch;
use futures::future::BoxFuture;
use secrecy::SecretString;
use sqlx::MySqlPool;
use std::time::Duration;
use tracing::instrument;

pub struct MysqlAdapter {
    target_id: String,
    pool: MySqlPool,
}

impl MysqlAdapter {
    pub async fn connect(
        target_id: impl Into<String>,
        endpoint: &str,
        credentials: &SecretString,
        config: &ScraperConfig,
    ) -> Result<Self, ClassifiedError> {
        let target_id = target_id.into();
        let settings = PoolSettings {
            max_connections: config.max_connections,
            idle_connections: config.idle_connections,
            acquire_timeout: Duration::from_secs(30),
        };
        let pool = pool::connect_mysql(&target_id, endpoint, credentials, &settings).await?;
        Ok(Self { target_id, pool })
    }
}

impl DbAdapter for MysqlAdapter {
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
        Box::pin(intelligence::scrape(&self.pool, &self.target_id, ctx, capabilities, selected))
    }
}
