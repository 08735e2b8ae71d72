//! Batcher (spec §4.5): the first pipeline stage. Accumulates incoming
//! batches from scrapers until either `max_size` records have arrived or
//! `timeout` has elapsed since the last flush, whichever comes first, then
//! forwards one merged batch downstream. On shutdown, flushes whatever is
//! pending within a bounded grace period rather than discarding it.

use crate::model::MetricBatch;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Merges `addition` into `base` by resource; matching resources are
/// extended in place rather than duplicated, so a batcher flush doesn't
/// fragment a single resource's points across repeated `ResourceMetrics`
/// entries.
fn merge(base: &mut MetricBatch, addition: MetricBatch) {
    for incoming in addition.resources {
        if let Some(existing) = base
            .resources
            .iter_mut()
            .find(|rm| rm.resource == incoming.resource)
        {
            existing.scopes.extend(incoming.scopes);
        } else {
            base.resources.push(incoming);
        }
    }
}

/// Runs the accumulate-until-threshold loop. Call `spawn` to start it as a
/// background task; send incoming batches on the returned `mpsc::Sender`
/// and receive flushed, merged batches on the returned `mpsc::Receiver`.
pub struct Batcher {
    cancellation: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Batcher {
    #[must_use]
    pub fn spawn(
        max_size: usize,
        timeout: Duration,
        mut inbound: mpsc::Receiver<MetricBatch>,
        outbound: mpsc::Sender<MetricBatch>,
    ) -> Self {
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let handle = tokio::spawn(async move {
            let mut pending = MetricBatch::new();
            let mut ticker = tokio::time::interval(timeout);
            ticker.reset();

            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        if !pending.is_empty() {
                            flush_with_grace(&outbound, pending).await;
                        }
                        break;
                    }
                    _ = ticker.tick() => {
                        if !pending.is_empty() {
                            pending = flush_and_reset(&outbound, pending).await;
                        }
                    }
                    received = inbound.recv() => {
                        let Some(batch) = received else {
                            if !pending.is_empty() {
                                flush_with_grace(&outbound, pending).await;
                            }
                            break;
                        };
                        merge(&mut pending, batch);
                        if pending.point_count() >= max_size {
                            pending = flush_and_reset(&outbound, pending).await;
                            ticker.reset();
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
    }

    /// Waits for the background task to finish its shutdown flush, up to a
    /// bounded grace period, rather than hanging indefinitely.
    pub async fn join(&mut self) {
        self.cancellation.cancel();
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("batcher did not finish its shutdown flush within the grace period");
            }
        }
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        self.cancellation.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn flush_and_reset(outbound: &mpsc::Sender<MetricBatch>, pending: MetricBatch) -> MetricBatch {
    flush_with_grace(outbound, pending).await;
    MetricBatch::new()
}

async fn flush_with_grace(outbound: &mpsc::Sender<MetricBatch>, pending: MetricBatch) {
    if tokio::time::timeout(SHUTDOWN_GRACE, outbound.send(pending)).await.is_err() {
        warn!("batcher flush dropped: downstream stage did not accept the batch within the grace period");
    }
}
