//! Static registry of templated SQL probes, ordered by preference (spec
//! §4.4). Each probe may have zero or more templates per driver; the
//! selector always picks the first whose `requires` predicate passes.

use crate::capability::CapabilitySet;
use crate::config::Driver;
use crate::selector::Probe;

pub struct QueryTemplate {
    pub id: &'static str,
    pub sql: &'static str,
    pub requires: fn(&CapabilitySet) -> bool,
}

fn has_ext(caps: &CapabilitySet, name: &str) -> bool {
    caps.extension_available(name)
}

fn can_read_perf_views(caps: &CapabilitySet) -> bool {
    caps.can_read_performance_views
}

fn always(_: &CapabilitySet) -> bool {
    true
}

const PG_SLOW_QUERIES: &[QueryTemplate] = &[
    QueryTemplate {
        id: "postgres.slow_queries.pg_stat_statements",
        sql: include_str!("sql/postgres_slow_queries_pg_stat_statements.sql"),
        requires: |c| has_ext(c, "pg_stat_statements"),
    },
    QueryTemplate {
        id: "postgres.slow_queries.pg_stat_activity",
        sql: include_str!("sql/postgres_slow_queries_activity.sql"),
        requires: can_read_perf_views,
    },
];

const PG_WAIT_EVENTS: &[QueryTemplate] = &[
    QueryTemplate {
        id: "postgres.wait_events.pg_wait_sampling",
        sql: include_str!("sql/postgres_wait_events_sampling.sql"),
        requires: |c| has_ext(c, "pg_wait_sampling"),
    },
    QueryTemplate {
        id: "postgres.wait_events.pg_stat_activity",
        sql: include_str!("sql/postgres_wait_events_activity.sql"),
        requires: can_read_perf_views,
    },
];

const PG_BLOCKING_SESSIONS: &[QueryTemplate] = &[QueryTemplate {
    id: "postgres.blocking_sessions.pg_locks",
    sql: include_str!("sql/postgres_blocking_sessions.sql"),
    requires: can_read_perf_views,
}];

const PG_EXECUTION_PLANS: &[QueryTemplate] = &[QueryTemplate {
    id: "postgres.execution_plans.explain",
    sql: include_str!("sql/postgres_execution_plan.sql"),
    requires: can_read_perf_views,
}];

const PG_ASH: &[QueryTemplate] = &[QueryTemplate {
    id: "postgres.ash.pg_stat_activity",
    sql: include_str!("sql/postgres_ash_sample.sql"),
    requires: can_read_perf_views,
}];

const MYSQL_SLOW_QUERIES: &[QueryTemplate] = &[QueryTemplate {
    id: "mysql.slow_queries.events_statements_summary",
    sql: include_str!("sql/mysql_slow_queries.sql"),
    requires: |c| has_ext(c, "performance_schema"),
}];

const MYSQL_WAIT_EVENTS: &[QueryTemplate] = &[QueryTemplate {
    id: "mysql.wait_events.events_waits_summary",
    sql: include_str!("sql/mysql_wait_events.sql"),
    requires: |c| has_ext(c, "performance_schema"),
}];

const MYSQL_BLOCKING_SESSIONS: &[QueryTemplate] = &[QueryTemplate {
    id: "mysql.blocking_sessions.data_locks",
    sql: include_str!("sql/mysql_blocking_sessions.sql"),
    requires: |c| has_ext(c, "performance_schema"),
}];

const MYSQL_EXECUTION_PLANS: &[QueryTemplate] = &[QueryTemplate {
    id: "mysql.execution_plans.explain",
    sql: include_str!("sql/mysql_execution_plan.sql"),
    requires: always,
}];

/// MySQL has no primitive equivalent to PostgreSQL's backend sampling;
/// active-session history is PostgreSQL-only (spec §4.2), so this is
/// intentionally empty — the probe always disables on MySQL targets.
const MYSQL_ASH: &[QueryTemplate] = &[];

#[must_use]
pub fn templates_for(driver: Driver, probe: Probe) -> &'static [QueryTemplate] {
    match (driver, probe) {
        (Driver::Postgres, Probe::SlowQueries) => PG_SLOW_QUERIES,
        (Driver::Postgres, Probe::WaitEvents) => PG_WAIT_EVENTS,
        (Driver::Postgres, Probe::BlockingSessions) => PG_BLOCKING_SESSIONS,
        (Driver::Postgres, Probe::ExecutionPlanSummaries) => PG_EXECUTION_PLANS,
        (Driver::Postgres, Probe::ActiveSessionHistory) => PG_ASH,
        (Driver::Mysql, Probe::SlowQueries) => MYSQL_SLOW_QUERIES,
        (Driver::Mysql, Probe::WaitEvents) => MYSQL_WAIT_EVENTS,
        (Driver::Mysql, Probe::BlockingSessions) => MYSQL_BLOCKING_SESSIONS,
        (Driver::Mysql, Probe::ExecutionPlanSummaries) => MYSQL_EXECUTION_PLANS,
        (Driver::Mysql, Probe::ActiveSessionHistory) => MYSQL_ASH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_ash_always_empty() {
        assert!(templates_for(Driver::Mysql, Probe::ActiveSessionHistory).is_empty());
    }

    #[test]
    fn postgres_slow_queries_has_fallback_chain() {
        assert_eq!(templates_for(Driver::Postgres, Probe::SlowQueries).len(), 2);
    }
}
