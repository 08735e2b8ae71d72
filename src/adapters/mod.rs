//! Database adapters (spec §4.2): abstract connection pool, driver,
//! capability probe, and templated-query execution per database family.

pub mod mysql;
pub mod pool;
pub mod postgres;

use crate::capability::CapabilitySet;
use crate::errors::ClassifiedError;
use crate::model::MetricBatch;
use crate::selector::Probe;
use crate::selector::registry::QueryTemplate;
use futures::future::BoxFuture;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Per-scrape context threaded through every adapter call. Any suspension
/// point (database query, DNS lookup) must honor `cancellation` (spec §5).
#[derive(Clone)]
pub struct ScrapeContext {
    pub target_id: String,
    pub cancellation: CancellationToken,
    pub deadline: std::time::Instant,
}

impl ScrapeContext {
    #[must_use]
    pub fn new(target_id: impl Into<String>, deadline: std::time::Duration) -> Self {
        Self {
            target_id: target_id.into(),
            cancellation: CancellationToken::new(),
            deadline: std::time::Instant::now() + deadline,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled() || std::time::Instant::now() >= self.deadline
    }
}

/// Current wall-clock time as Unix nanoseconds, for stamping data points at
/// collection time rather than export time.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn now_unix_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// The templates the query selector chose for this scrape, one per probe
/// that qualified (spec §4.4). A probe absent from the map was disabled.
#[derive(Default, Clone)]
pub struct SelectedQueries {
    templates: HashMap<&'static str, &'static QueryTemplate>,
}

impl SelectedQueries {
    pub fn insert(&mut self, probe: Probe, template: &'static QueryTemplate) {
        self.templates.insert(probe.name(), template);
    }

    #[must_use]
    pub fn get(&self, probe: Probe) -> Option<&'static QueryTemplate> {
        self.templates.get(probe.name()).copied()
    }
}

/// A database adapter: connection pool, capability probe, and templated
/// query execution for one engine family (spec §4.2).
pub trait DbAdapter: Send + Sync {
    fn target_id(&self) -> &str;

    fn probe_capabilities<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
    ) -> BoxFuture<'a, Result<CapabilitySet, ClassifiedError>>;

    fn scrape_standard<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        capabilities: &'a CapabilitySet,
    ) -> BoxFuture<'a, Result<MetricBatch, ClassifiedError>>;

    fn scrape_query_intelligence<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        capabilities: &'a CapabilitySet,
        selected: &'a SelectedQueries,
    ) -> BoxFuture<'a, Result<MetricBatch, ClassifiedError>>;
}
