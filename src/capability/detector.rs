//! The feature detector's read-mostly capability store (spec §4.3, §5).
//!
//! Writes come from one place: whatever drives the refresh loop (the
//! scheduler) calling [`CapabilityStore::publish`] after a successful
//! probe. Reads come from many stages and the query selector. We use a
//! `tokio::sync::RwLock` around a plain `HashMap` rather than anything
//! fancier: a capability refresh every 10 minutes does not justify a
//! lock-free structure.

use crate::capability::{CapabilityEntry, CapabilitySet, Freshness};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub struct CapabilityStore {
    entries: RwLock<HashMap<String, CapabilityEntry>>,
    refresh_interval: Duration,
    in_progress: RwLock<std::collections::HashSet<String>>,
}

impl CapabilityStore {
    #[must_use]
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            refresh_interval,
            in_progress: RwLock::new(std::collections::HashSet::new()),
        }
    }

    /// Current freshness for a target, per the §4.15 FSM.
    pub async fn freshness(&self, target_id: &str) -> Freshness {
        if self.in_progress.read().await.contains(target_id) {
            return Freshness::InProgress;
        }
        let entries = self.entries.read().await;
        match entries.get(target_id) {
            None => Freshness::Never,
            Some(entry) => {
                if entry.detected_at.elapsed() < self.refresh_interval {
                    Freshness::Fresh
                } else {
                    Freshness::Stale
                }
            }
        }
    }

    /// Whether a probe should be kicked off for this target right now.
    pub async fn should_refresh(&self, target_id: &str) -> bool {
        !matches!(
            self.freshness(target_id).await,
            Freshness::Fresh | Freshness::InProgress
        )
    }

    /// Mark a target's probe as started, so concurrent callers don't launch
    /// a second probe for the same target before the first completes.
    pub async fn mark_in_progress(&self, target_id: &str) {
        self.in_progress.write().await.insert(target_id.to_string());
    }

    /// Publish a freshly-detected capability set atomically: readers either
    /// see the previous set or the new one, never a partial update.
    pub async fn publish(&self, set: CapabilitySet) {
        let target_id = set.target_id.clone();
        {
            let mut entries = self.entries.write().await;
            entries.insert(
                target_id.clone(),
                CapabilityEntry {
                    set,
                    detected_at: Instant::now(),
                },
            );
        }
        self.in_progress.write().await.remove(&target_id);
    }

    /// Clear the in-progress marker without publishing, for a failed probe.
    pub async fn mark_failed(&self, target_id: &str) {
        self.in_progress.write().await.remove(target_id);
    }

    pub async fn get(&self, target_id: &str) -> Option<CapabilitySet> {
        self.entries.read().await.get(target_id).map(|e| e.set.clone())
    }
}
