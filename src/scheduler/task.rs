//! Per-target scrape task (spec §4.1): a background loop ticking at the
//! target's configured interval, staggered by a hash-derived offset so
//! many targets don't all scrape in the same instant.

use crate::adapters::{DbAdapter, ScrapeContext, SelectedQueries};
use crate::capability::detector::CapabilityStore;
use crate::config::{Driver, ScraperConfig};
use crate::errors::ClassifiedError;
use crate::model::MetricBatch;
use crate::pipeline::circuit_breaker::CircuitBreaker;
use crate::pipeline::memory_limiter::MemoryLimiter;
use crate::selector::{Probe, QuerySelector};
use prometheus::IntCounterVec;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, warn};

const ALL_PROBES: &[Probe] = &[
    Probe::SlowQueries,
    Probe::WaitEvents,
    Probe::BlockingSessions,
    Probe::ExecutionPlanSummaries,
    Probe::ActiveSessionHistory,
];

/// Computes a deterministic stagger offset within `[0, interval)` for a
/// target, so a fleet of targets sharing the same interval don't all scrape
/// on the same tick (spec §4.1).
fn stagger_offset(target_id: &str, interval: Duration) -> Duration {
    let mut hasher = DefaultHasher::new();
    target_id.hash(&mut hasher);
    let hash = hasher.finish();
    let interval_nanos = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX);
    if interval_nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(hash % interval_nanos)
}

/// Owns one target's recurring scrape loop.
pub struct ScrapeTask {
    cancellation: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ScrapeTask {
    #[must_use]
    pub fn spawn(
        target_id: String,
        driver: Driver,
        config: ScraperConfig,
        adapter: Arc<dyn DbAdapter>,
        capabilities: Arc<CapabilityStore>,
        breaker: Arc<CircuitBreaker>,
        memory_limiter: Arc<MemoryLimiter>,
        outbound: Sender<MetricBatch>,
        skipped_counter: IntCounterVec,
    ) -> Self {
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(stagger_offset(&target_id, config.interval())).await;
            let mut ticker = tokio::time::interval(config.interval());
            let running = Arc::new(tokio::sync::Mutex::new(()));

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !breaker.ready_for_tick(&target_id) {
                            continue;
                        }
                        let Ok(guard) = running.clone().try_lock_owned() else {
                            skipped_counter.with_label_values(&[&target_id]).inc();
                            warn!(target = %target_id, "skipping scrape: previous tick still running");
                            continue;
                        };
                        let target_id = target_id.clone();
                        let config = config.clone();
                        let adapter = Arc::clone(&adapter);
                        let capabilities = Arc::clone(&capabilities);
                        let breaker = Arc::clone(&breaker);
                        let memory_limiter = Arc::clone(&memory_limiter);
                        let outbound = outbound.clone();
                        tokio::spawn(async move {
                            let result = run_tick(
                                &target_id,
                                driver,
                                &config,
                                adapter.as_ref(),
                                &capabilities,
                                &memory_limiter,
                                &outbound,
                            )
                            .await;
                            breaker.observe(&target_id, result.is_ok());
                            if let Err(err) = result {
                                error!(target = %target_id, error = %err, "scrape failed");
                            }
                            drop(guard);
                        });
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
    }
}

impl Drop for ScrapeTask {
    fn drop(&mut self) {
        self.cancellation.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[instrument(skip(adapter, capabilities, memory_limiter, outbound, config), fields(target = %target_id))]
async fn run_tick(
    target_id: &str,
    driver: Driver,
    config: &ScraperConfig,
    adapter: &dyn DbAdapter,
    capabilities: &CapabilityStore,
    memory_limiter: &MemoryLimiter,
    outbound: &Sender<MetricBatch>,
) -> Result<(), ClassifiedError> {
    memory_limiter.admit(target_id)?;

    let ctx = ScrapeContext::new(target_id, config.deadline());

    if capabilities.should_refresh(target_id).await {
        capabilities.mark_in_progress(target_id).await;
        match adapter.probe_capabilities(&ctx).await {
            Ok(set) => capabilities.publish(set).await,
            Err(err) => {
                capabilities.mark_failed(target_id).await;
                return Err(err);
            }
        }
    }

    let Some(caps) = capabilities.get(target_id).await else {
        return Err(ClassifiedError::for_target(
            crate::errors::ErrorClass::TransientIo,
            target_id,
            anyhow::anyhow!("no capability set published yet for this target"),
        ));
    };

    let mut selected = SelectedQueries::default();
    for probe in ALL_PROBES {
        if let Some(template) = QuerySelector::select(driver, *probe, target_id, &caps) {
            selected.insert(*probe, template);
        }
    }

    let mut batch = adapter.scrape_standard(&ctx, &caps).await?;
    let intelligence = adapter.scrape_query_intelligence(&ctx, &caps, &selected).await?;
    merge_batches(&mut batch, intelligence);

    if outbound.send(batch).await.is_err() {
        warn!(target = target_id, "batcher channel closed, dropping scrape result");
    }

    Ok(())
}

fn merge_batches(base: &mut MetricBatch, addition: MetricBatch) {
    base.resources.extend(addition.resources);
}
