//! Plan attribute extractor (spec §4.10).
//!
//! For each data point carrying a `db.statement.plan` text field: parses a
//! documented subset of `EXPLAIN (FORMAT JSON)` output into structured
//! attributes (estimated cost, top node type, plan depth), then removes the
//! raw plan text to bound cardinality and avoid leaking query literals that
//! might appear in index conditions. Also anonymizes `db.statement` and
//! attaches its fingerprint.
//!
//! The source this was distilled from only simplifies plan text rather than
//! parsing it structurally (spec §9 open question); this implementation
//! takes the documented-subset option explicitly called out there, limited
//! to the top-level node's type, cost, and nesting depth rather than a full
//! recursive plan tree.

use crate::anonymize::anonymize_sql;
use crate::model::{AttributeValue, MetricBatch};
use serde_json::Value;

const PLAN_ATTRIBUTE: &str = "db.statement.plan";
const STATEMENT_ATTRIBUTE: &str = "db.statement";

/// Extracted structured fields from an `EXPLAIN (FORMAT JSON)` plan.
struct PlanSummary {
    node_type: String,
    total_cost: f64,
    depth: i64,
}

pub struct PlanExtractor;

impl PlanExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    pub fn apply(&self, batch: &mut MetricBatch) {
        for rm in &mut batch.resources {
            for sm in &mut rm.scopes {
                for metric in &mut sm.metrics {
                    for point in &mut metric.data_points {
                        Self::process_point(point);
                    }
                }
            }
        }
    }

    fn process_point(point: &mut crate::model::DataPoint) {
        if let Some(AttributeValue::String(statement)) = point.attributes.get(STATEMENT_ATTRIBUTE) {
            let anonymized = anonymize_sql(statement);
            point
                .attributes
                .insert(STATEMENT_ATTRIBUTE.to_string(), AttributeValue::from(anonymized.text));
            #[allow(clippy::cast_possible_wrap)]
            let fingerprint = anonymized.fingerprint as i64;
            point
                .attributes
                .insert("db.statement.fingerprint".to_string(), AttributeValue::from(fingerprint));
        }

        let plan_text = match point.attributes.get(PLAN_ATTRIBUTE) {
            Some(AttributeValue::String(text)) => Some(text.clone()),
            _ => None,
        };
        let Some(plan_text) = plan_text else {
            return;
        };

        if let Some(summary) = parse_plan(&plan_text) {
            point
                .attributes
                .insert("db.plan.node_type".to_string(), AttributeValue::from(summary.node_type));
            point
                .attributes
                .insert("db.plan.total_cost".to_string(), AttributeValue::from(summary.total_cost));
            point
                .attributes
                .insert("db.plan.depth".to_string(), AttributeValue::from(summary.depth));
        }
        point.attributes.remove(PLAN_ATTRIBUTE);
    }
}

impl Default for PlanExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses the top-level `Plan` object of a PostgreSQL `EXPLAIN (FORMAT
/// JSON)` array, or a MySQL `EXPLAIN FORMAT=JSON` `query_block`, into a
/// `PlanSummary`. Unrecognized shapes yield `None` rather than panicking.
fn parse_plan(text: &str) -> Option<PlanSummary> {
    let value: Value = serde_json::from_str(text).ok()?;

    let plan = value
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|v| v.get("Plan"))
        .or_else(|| value.get("query_block"))
        .unwrap_or(&value);

    let node_type = plan
        .get("Node Type")
        .and_then(Value::as_str)
        .or_else(|| plan.get("select_id").map(|_| "query_block"))
        .unwrap_or("unknown")
        .to_string();

    let total_cost = plan.get("Total Cost").and_then(Value::as_f64).unwrap_or(0.0);
    let depth = plan_depth(plan);

    Some(PlanSummary {
        node_type,
        total_cost,
        depth,
    })
}

fn plan_depth(plan: &Value) -> i64 {
    match plan.get("Plans").and_then(Value::as_array) {
        Some(children) if !children.is_empty() => {
            1 + children.iter().map(plan_depth).max().unwrap_or(0)
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataPoint, Metric, MetricBatch, MetricKind, Resource, ResourceMetrics, Scope, ScopeMetrics};

    fn single_point_batch(point: DataPoint) -> MetricBatch {
        let mut metric = Metric::new("db.query.count", MetricKind::Gauge);
        metric.push(point);
        MetricBatch {
            resources: vec![ResourceMetrics {
                resource: Resource::new(),
                scopes: vec![ScopeMetrics {
                    scope: Scope::new("dbtel"),
                    metrics: vec![metric],
                }],
            }],
        }
    }

    #[test]
    fn removes_raw_plan_and_extracts_summary() {
        let plan_json = r#"[{"Plan": {"Node Type": "Seq Scan", "Total Cost": 12.5, "Plans": []}}]"#;
        let point = DataPoint::new(1, 1_i64)
            .with_attribute("db.statement", "SELECT * FROM t WHERE id = 1")
            .with_attribute("db.statement.plan", plan_json);
        let mut batch = single_point_batch(point);

        PlanExtractor::new().apply(&mut batch);

        batch.for_each_point(|_, _, _, point| {
            assert!(point.get("db.statement.plan").is_none());
            assert_eq!(
                point.get("db.plan.node_type"),
                Some(&AttributeValue::from("Seq Scan"))
            );
        });
    }

    #[test]
    fn anonymizes_statement_even_without_plan() {
        let point = DataPoint::new(1, 1_i64).with_attribute("db.statement", "SELECT * FROM t WHERE id = 42");
        let mut batch = single_point_batch(point);
        PlanExtractor::new().apply(&mut batch);

        batch.for_each_point(|_, _, _, point| {
            assert_eq!(
                point.get("db.statement"),
                Some(&AttributeValue::from("SELECT * FROM t WHERE id = ?"))
            );
        });
    }
}
