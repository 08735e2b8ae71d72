//! Circuit breaker (spec §4.9): a per-target three-state FSM that halts
//! processing on sustained failures. State is read by the scheduler (via
//! `ready_for_tick`, to skip issuing scrapes against an open target while
//! still letting a due probe tick through) and by this stage (to drop any
//! batch that slipped through from one).

use crate::model::MetricBatch;
use prometheus::{IntGaugeVec, Opts, Registry};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    #[must_use]
    pub const fn as_gauge_label(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

struct TargetEntry {
    state: BreakerState,
    /// Failure timestamps within the sliding window, oldest first.
    failures: VecDeque<Instant>,
    attempts_in_window: u32,
    opened_at: Option<Instant>,
    consecutive_successes: u32,
}

impl TargetEntry {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            attempts_in_window: 0,
            opened_at: None,
            consecutive_successes: 0,
        }
    }
}

pub struct CircuitBreakerConfig {
    pub open_threshold: u32,
    pub error_ratio_threshold: f64,
    pub open_duration: Duration,
    pub probe_successes: u32,
    pub window: Duration,
}

impl From<&crate::config::CircuitBreakerConfig> for CircuitBreakerConfig {
    fn from(c: &crate::config::CircuitBreakerConfig) -> Self {
        Self {
            open_threshold: c.open_threshold,
            error_ratio_threshold: c.error_ratio_threshold,
            open_duration: c.open_duration(),
            probe_successes: c.probe_successes,
            window: c.window(),
        }
    }
}

/// Per-target breaker state table (spec §3 "Circuit state", §4.9).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    targets: Mutex<HashMap<String, TargetEntry>>,
    gauge: IntGaugeVec,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let gauge = IntGaugeVec::new(
            Opts::new("breaker_state", "Circuit breaker state per target (1=active state)"),
            &["target", "state"],
        )
        .unwrap_or_else(|_| unreachable!("static metric definition"));
        Self {
            config,
            targets: Mutex::new(HashMap::new()),
            gauge,
        }
    }

    pub fn register(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.gauge.clone()))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TargetEntry>> {
        match self.targets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Whether `target_id` currently allows scraping (called by the
    /// scheduler before issuing a tick).
    #[must_use]
    pub fn is_open(&self, target_id: &str) -> bool {
        let targets = self.lock();
        targets
            .get(target_id)
            .is_some_and(|e| e.state == BreakerState::Open)
    }

    /// Whether the scheduler should attempt a scrape tick for `target_id`
    /// this round. Unlike `is_open`, this also drives the `Open ->
    /// HalfOpen` transition once `open_duration` has elapsed: a skipped
    /// tick never calls `observe`, so gating the scheduler purely on
    /// `is_open` would leave the breaker stuck `Open` forever, since
    /// nothing would ever run the probe that's supposed to close it again.
    #[must_use]
    pub fn ready_for_tick(&self, target_id: &str) -> bool {
        let mut targets = self.lock();
        let Some(entry) = targets.get_mut(target_id) else {
            return true;
        };
        if entry.state != BreakerState::Open {
            return true;
        }
        match entry.opened_at {
            Some(opened_at) if Instant::now().duration_since(opened_at) >= self.config.open_duration => {
                entry.state = BreakerState::HalfOpen;
                entry.consecutive_successes = 0;
                self.publish_gauge(target_id, entry.state);
                true
            }
            _ => false,
        }
    }

    /// Record a scrape outcome for `target_id`, transitioning state per the
    /// §4.9 table.
    pub fn observe(&self, target_id: &str, success: bool) {
        let mut targets = self.lock();
        let entry = targets.entry(target_id.to_string()).or_insert_with(TargetEntry::new);
        let now = Instant::now();

        match entry.state {
            BreakerState::Closed => {
                entry.attempts_in_window += 1;
                if success {
                    prune_window(&mut entry.failures, now, self.config.window);
                } else {
                    entry.failures.push_back(now);
                    prune_window(&mut entry.failures, now, self.config.window);
                }
                let failure_count = u32::try_from(entry.failures.len()).unwrap_or(u32::MAX);
                let ratio = f64::from(failure_count) / f64::from(entry.attempts_in_window.max(1));
                if failure_count >= self.config.open_threshold || ratio >= self.config.error_ratio_threshold {
                    entry.state = BreakerState::Open;
                    entry.opened_at = Some(now);
                    warn!(target = target_id, "circuit breaker opened");
                }
            }
            BreakerState::Open => {
                if let Some(opened_at) = entry.opened_at {
                    if now.duration_since(opened_at) >= self.config.open_duration {
                        entry.state = BreakerState::HalfOpen;
                        entry.consecutive_successes = 0;
                    }
                }
            }
            BreakerState::HalfOpen => {
                if success {
                    entry.consecutive_successes += 1;
                    if entry.consecutive_successes >= self.config.probe_successes {
                        entry.state = BreakerState::Closed;
                        entry.failures.clear();
                        entry.attempts_in_window = 0;
                    }
                } else {
                    entry.state = BreakerState::Open;
                    entry.opened_at = Some(now);
                }
            }
        }

        self.publish_gauge(target_id, entry.state);
    }

    /// Snapshot every target's current state, for the health endpoint.
    #[must_use]
    pub fn states(&self) -> Vec<(String, BreakerState)> {
        let targets = self.lock();
        targets.iter().map(|(id, entry)| (id.clone(), entry.state)).collect()
    }

    fn publish_gauge(&self, target_id: &str, state: BreakerState) {
        for candidate in [BreakerState::Closed, BreakerState::Open, BreakerState::HalfOpen] {
            self.gauge
                .with_label_values(&[target_id, candidate.as_gauge_label()])
                .set(i64::from(candidate == state));
        }
    }

    /// Drop the batch if its `db.target.id` resource attribute names a
    /// currently-open target; otherwise pass it through unchanged. A batch
    /// spanning a half-open/closed target that also transitions a tick
    /// opens on this very observation (handled by the scheduler calling
    /// `observe` separately) still passes, matching the documented
    /// "may succeed while transitioning" read of §4.9.
    #[must_use]
    pub fn process(&self, batch: MetricBatch) -> Option<MetricBatch> {
        let mut open_targets = Vec::new();
        batch.for_each_point(|resource, _, _, _| {
            if let Some(crate::model::AttributeValue::String(target)) = resource.get("db.target.id") {
                if self.is_open(target) && !open_targets.contains(target) {
                    open_targets.push(target.clone());
                }
            }
        });
        if open_targets.is_empty() {
            return Some(batch);
        }

        let mut batch = batch;
        batch.retain_points(|resource, _, _, _| {
            !matches!(
                resource.get("db.target.id"),
                Some(crate::model::AttributeValue::String(t)) if open_targets.contains(t)
            )
        });
        if batch.is_empty() { None } else { Some(batch) }
    }
}

fn prune_window(failures: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = failures.front() {
        if now.duration_since(front) > window {
            failures.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            open_threshold: 5,
            error_ratio_threshold: 0.8,
            open_duration: Duration::from_millis(50),
            probe_successes: 3,
            window: Duration::from_secs(60),
        })
    }

    #[test]
    fn opens_at_exactly_threshold_failures() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.observe("db-1", false);
        }
        assert!(!breaker.is_open("db-1"));
        breaker.observe("db-1", false);
        assert!(breaker.is_open("db-1"));
    }

    #[tokio::test]
    async fn half_open_recovers_after_successes() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.observe("db-1", false);
        }
        assert!(breaker.is_open("db-1"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        breaker.observe("db-1", true);
        breaker.observe("db-1", true);
        assert!(!breaker.is_open("db-1"), "half-open probes are allowed through");
        breaker.observe("db-1", true);
        assert!(!breaker.is_open("db-1"));
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.observe("db-1", false);
        }
        std::thread::sleep(Duration::from_millis(60));
        breaker.observe("db-1", true);
        breaker.observe("db-1", false);
        assert!(breaker.is_open("db-1"));
    }

    #[test]
    fn ready_for_tick_blocks_while_open_and_allows_the_probe_once_due() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.observe("db-1", false);
        }
        assert!(breaker.is_open("db-1"));
        assert!(!breaker.ready_for_tick("db-1"), "still within open_duration");

        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.ready_for_tick("db-1"), "open_duration elapsed, probe tick should be let through");
        assert!(!breaker.is_open("db-1"), "ready_for_tick should have moved the breaker to half_open");
    }

    #[test]
    fn a_target_stuck_skipping_ticks_never_recovers_without_ready_for_tick() {
        // Regression guard for the bug where the scheduler gated every tick on
        // `is_open` alone: `observe` never ran, so the breaker could never
        // reach `half_open` no matter how long `open_duration` had elapsed.
        let breaker = breaker();
        for _ in 0..5 {
            breaker.observe("db-1", false);
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.is_open("db-1"), "is_open alone never transitions state");
        assert!(breaker.ready_for_tick("db-1"), "ready_for_tick is what lets the probe actually happen");
    }
}
