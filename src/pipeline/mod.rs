//! The processing pipeline (spec §2): every stage between a scraper's raw
//! batch and the OTLP exporter, run in strict order. Stages are synchronous
//! transforms over an owned [`crate::model::MetricBatch`] except the
//! batcher, which is genuinely async (it waits on a timeout).

pub mod adaptive_sampler;
pub mod batcher;
pub mod circuit_breaker;
pub mod cost_control;
pub mod error_monitor;
pub mod memory_limiter;
pub mod plan_extractor;
pub mod query_correlator;
pub mod resource_decorator;
pub mod verification;

use crate::config::Config;
use crate::model::MetricBatch;
use adaptive_sampler::AdaptiveSampler;
use circuit_breaker::CircuitBreaker;
use cost_control::CostControl;
use error_monitor::ErrorMonitor;
use memory_limiter::MemoryLimiter;
use plan_extractor::PlanExtractor;
use query_correlator::QueryCorrelator;
use resource_decorator::ResourceDecorator;
use std::sync::Arc;
use verification::Verification;

/// Owns every stage after the batcher and applies them in the exact §2
/// order: memory-limiter admission is checked by the caller at the batch
/// boundary before a batch ever reaches `process`; from there it's
/// resource-decorator, adaptive-sampler, circuit-breaker, plan-attribute
/// extraction, query-correlator, verification, cost-control, error-monitor.
pub struct Pipeline {
    pub breaker: Arc<CircuitBreaker>,
    pub memory_limiter: Arc<MemoryLimiter>,
    /// Shared with the adapters that publish session context (spec §4.11),
    /// so the cache `query_correlator.apply` reads from is actually fed.
    pub query_correlator: Arc<QueryCorrelator>,
    resource_decorator: ResourceDecorator,
    adaptive_sampler: AdaptiveSampler,
    plan_extractor: PlanExtractor,
    verification: Verification,
    cost_control: CostControl,
    error_monitor: ErrorMonitor,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new((&config.circuit_breaker).into())),
            memory_limiter: Arc::new(MemoryLimiter::new(&config.memory_limiter)),
            query_correlator: Arc::new(QueryCorrelator::new()),
            resource_decorator: ResourceDecorator::new(&config.resource),
            adaptive_sampler: AdaptiveSampler::new(&config.sampling),
            plan_extractor: PlanExtractor::new(),
            verification: Verification::new(config.verification.clone()),
            cost_control: CostControl::new(config.cost_control.clone()),
            error_monitor: ErrorMonitor::new(config.error_monitor.clone()),
        }
    }

    pub fn register(&self, registry: &prometheus::Registry) -> anyhow::Result<()> {
        self.breaker.register(registry)?;
        self.memory_limiter.register(registry)?;
        self.verification.register(registry)?;
        self.cost_control.register(registry)?;
        self.error_monitor.register(registry)?;
        Ok(())
    }

    /// Runs a batch through every stage after the batcher, returning `None`
    /// if the batch was fully consumed (dropped by the breaker, sampled
    /// away entirely, or stripped bare by verification).
    #[must_use]
    pub fn process(&self, mut batch: MetricBatch) -> Option<MetricBatch> {
        self.resource_decorator.apply(&mut batch);
        let under_pressure = self.cost_control.is_aggressive() || !self.memory_limiter.is_under_soft_limit();
        self.adaptive_sampler.set_pressure(under_pressure);
        self.adaptive_sampler.apply(&mut batch);

        let mut batch = self.breaker.process(batch)?;

        self.plan_extractor.apply(&mut batch);
        self.query_correlator.apply(&mut batch);
        self.verification.apply(&mut batch);
        if batch.is_empty() {
            return None;
        }

        self.cost_control.apply(&mut batch);
        if batch.is_empty() {
            return None;
        }

        self.error_monitor.apply(&batch);
        Some(batch)
    }
}
