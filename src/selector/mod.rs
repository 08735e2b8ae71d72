//! Query selector (spec §4.4): given a capability set and a required probe,
//! picks the most capable SQL template from a static registry ordered by
//! preference, or silently disables the probe.

pub mod registry;

use crate::capability::CapabilitySet;
use crate::config::Driver;
use crate::selector::registry::QueryTemplate;
use prometheus::{IntGaugeVec, Opts, Registry};
use std::sync::OnceLock;

/// The set of query-intelligence probes named in spec §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Probe {
    SlowQueries,
    WaitEvents,
    BlockingSessions,
    ExecutionPlanSummaries,
    ActiveSessionHistory,
}

impl Probe {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SlowQueries => "slow_queries",
            Self::WaitEvents => "wait_events",
            Self::BlockingSessions => "blocking_sessions",
            Self::ExecutionPlanSummaries => "execution_plan_summaries",
            Self::ActiveSessionHistory => "active_session_history",
        }
    }
}

/// Tracks how often a probe has had to be disabled for lack of a capable
/// template, surfaced as the `probe.disabled` self-telemetry gauge (spec
/// §4.4, §6).
pub struct ProbeDisabledGauge {
    gauge: IntGaugeVec,
}

static GAUGE: OnceLock<ProbeDisabledGauge> = OnceLock::new();

impl ProbeDisabledGauge {
    fn global() -> &'static Self {
        GAUGE.get_or_init(|| {
            let gauge = IntGaugeVec::new(
                Opts::new(
                    "probe_disabled",
                    "Whether a query-intelligence probe is currently disabled for a target (1=disabled)",
                ),
                &["target", "probe"],
            )
            .unwrap_or_else(|_| unreachable!("static metric definition"));
            Self { gauge }
        })
    }

    /// Register with a `prometheus::Registry` for the health/self-telemetry
    /// endpoint (spec §6's "self-telemetry channel").
    pub fn register(registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(Self::global().gauge.clone()))?;
        Ok(())
    }

    fn set(target: &str, probe: Probe, disabled: bool) {
        Self::global()
            .gauge
            .with_label_values(&[target, probe.name()])
            .set(i64::from(disabled));
    }
}

/// Picks the most capable template for a probe, or reports the probe as
/// disabled for this target/capability combination.
pub struct QuerySelector;

impl QuerySelector {
    /// Select the most-preferred template whose prerequisites are met by
    /// `capabilities`, updating the `probe.disabled` gauge either way.
    #[must_use]
    pub fn select(
        driver: Driver,
        probe: Probe,
        target_id: &str,
        capabilities: &CapabilitySet,
    ) -> Option<&'static QueryTemplate> {
        let candidates = registry::templates_for(driver, probe);
        let chosen = candidates.iter().find(|t| (t.requires)(capabilities));

        ProbeDisabledGauge::set(target_id, probe, chosen.is_none());
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::DatabaseVariant;
    use std::collections::HashMap;

    fn capabilities_with(extensions: &[&str]) -> CapabilitySet {
        let mut map = HashMap::new();
        for ext in extensions {
            map.insert(
                (*ext).to_string(),
                crate::capability::FeatureStatus::available("1.0"),
            );
        }
        CapabilitySet {
            target_id: "db-1".to_string(),
            server_version: (16, 0, 0),
            extensions: map,
            can_read_performance_views: true,
            variant: DatabaseVariant::Standard,
        }
    }

    #[test]
    fn picks_best_available_template() {
        let caps = capabilities_with(&["pg_stat_statements"]);
        let chosen = QuerySelector::select(Driver::Postgres, Probe::SlowQueries, "db-1", &caps);
        assert!(chosen.is_some());
    }

    #[test]
    fn disables_when_nothing_qualifies() {
        let caps = capabilities_with(&[]);
        let chosen = QuerySelector::select(Driver::Postgres, Probe::WaitEvents, "db-1", &caps);
        assert!(chosen.is_none());
    }
}
