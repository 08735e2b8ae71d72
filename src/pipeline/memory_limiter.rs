//! Memory limiter (spec §4.6): a batch-boundary admission check against the
//! process's resident set size. Soft threshold refuses new batches with a
//! retryable error (the scraper backs off to its next tick); hard threshold
//! drops the oldest in-flight batch outright. Checked only at batch
//! boundaries, never mid-batch.

use crate::errors::{ClassifiedError, ErrorClass};
use crate::model::MetricBatch;
use prometheus::IntGauge;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use sysinfo::{Pid, System};

pub struct MemoryLimiter {
    soft_bytes: u64,
    hard_bytes: u64,
    system: Mutex<System>,
    pid: Pid,
    last_observed_bytes: AtomicU64,
    gauge: IntGauge,
}

impl MemoryLimiter {
    #[must_use]
    pub fn new(config: &crate::config::MemoryLimiterConfig) -> Self {
        let system = System::new_all();
        #[allow(clippy::cast_possible_truncation)]
        let pid = Pid::from(std::process::id() as usize);
        let gauge = IntGauge::new("process_resident_memory_bytes", "Resident memory observed by the memory limiter")
            .unwrap_or_else(|_| unreachable!("static metric definition"));
        Self {
            soft_bytes: config.soft_mib.saturating_mul(1024 * 1024),
            hard_bytes: config.hard_mib.saturating_mul(1024 * 1024),
            system: Mutex::new(system),
            pid,
            last_observed_bytes: AtomicU64::new(0),
            gauge,
        }
    }

    pub fn register(&self, registry: &prometheus::Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.gauge.clone()))?;
        Ok(())
    }

    /// Refresh the resident-memory reading. Call once per check interval
    /// (the scheduler drives this; spec §4.6 "checked at batch boundaries
    /// only").
    pub fn refresh(&self) {
        let mut system = self.lock_system();
        system.refresh_all();
        let bytes = system.process(self.pid).map_or(0, sysinfo::Process::memory);
        drop(system);
        self.last_observed_bytes.store(bytes, Ordering::Relaxed);
        #[allow(clippy::cast_possible_wrap)]
        self.gauge.set(bytes as i64);
    }

    #[must_use]
    pub fn observed_bytes(&self) -> u64 {
        self.last_observed_bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_under_soft_limit(&self) -> bool {
        self.observed_bytes() < self.soft_bytes
    }

    #[must_use]
    pub fn is_over_hard_limit(&self) -> bool {
        self.observed_bytes() >= self.hard_bytes
    }

    /// Admit a new batch at the batch boundary, per spec §4.6: above the
    /// soft threshold, refuse with a retryable error; below it, accept.
    pub fn admit(&self, target_id: &str) -> Result<(), ClassifiedError> {
        if self.is_under_soft_limit() {
            return Ok(());
        }
        Err(ClassifiedError::for_target(
            ErrorClass::TransientIo,
            target_id,
            anyhow::anyhow!(
                "resident memory {} bytes at or above soft limit {} bytes",
                self.observed_bytes(),
                self.soft_bytes
            ),
        ))
    }

    /// Drop the given in-flight batch outright if the hard threshold has
    /// been crossed, returning `None` in that case; otherwise passes the
    /// batch through unchanged.
    #[must_use]
    pub fn shed_if_over_hard_limit(&self, batch: MetricBatch) -> Option<MetricBatch> {
        if self.is_over_hard_limit() {
            None
        } else {
            Some(batch)
        }
    }

    fn lock_system(&self) -> std::sync::MutexGuard<'_, System> {
        match self.system.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryLimiterConfig;

    fn config(soft_mib: u64, hard_mib: u64) -> MemoryLimiterConfig {
        MemoryLimiterConfig {
            soft_mib,
            hard_mib,
            check_interval_secs: 1,
        }
    }

    #[test]
    fn admits_when_unobserved() {
        let limiter = MemoryLimiter::new(&config(512, 768));
        assert!(limiter.admit("db-1").is_ok());
    }

    #[test]
    fn refuses_above_soft_threshold() {
        let limiter = MemoryLimiter::new(&config(0, 768));
        limiter.last_observed_bytes.store(1, Ordering::Relaxed);
        let result = limiter.admit("db-1");
        assert!(result.is_err());
        if let Err(e) = result {
            assert!(e.class().is_retryable());
        }
    }

    #[test]
    fn sheds_batch_above_hard_threshold() {
        let limiter = MemoryLimiter::new(&config(0, 0));
        limiter.last_observed_bytes.store(1, Ordering::Relaxed);
        let batch = MetricBatch::new();
        assert!(limiter.shed_if_over_hard_limit(batch).is_none());
    }
}
