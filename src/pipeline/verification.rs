//! Verification (spec §4.12): enforces OTel semantic-convention attribute
//! presence and redacts PII before data leaves the pipeline.
//!
//! Two independent passes, both driven by `VerificationConfig`:
//!   - Required-attribute enforcement: a point missing a key its metric
//!     family requires is dropped and counted, after a legacy-key
//!     canonicalization pass gives it one more chance to satisfy the
//!     requirement under its current name.
//!   - PII redaction: configured regex patterns are matched against string
//!     attribute values and `db.statement` only, never metric names
//!     (spec §4.12).

use crate::config::VerificationConfig;
use crate::model::{AttributeValue, MetricBatch};
use prometheus::{IntCounterVec, Opts, Registry};
use regex::Regex;
use std::collections::HashMap;

/// Legacy attribute keys that should be read as their canonical
/// replacement if the canonical key is absent. Mirrors the renames the
/// OTel semantic-convention project itself has made over time.
const LEGACY_KEY_ALIASES: &[(&str, &str)] = &[("db.instance", "db.name"), ("db.statement.text", "db.statement")];

/// Required attribute keys by metric-name prefix. The prefix "" matches
/// every metric (the baseline `db.system`/`db.name` requirement); more
/// specific prefixes add to it.
fn required_keys_for(metric_name: &str) -> &'static [&'static str] {
    if metric_name.starts_with("db.query") || metric_name.starts_with("db.ash") || metric_name.starts_with("db.wait_events") {
        &["db.system", "db.name", "db.operation"]
    } else {
        &["db.system", "db.name"]
    }
}

pub struct Verification {
    config: VerificationConfig,
    patterns: Vec<Regex>,
    dropped: IntCounterVec,
}

impl Verification {
    /// Compiles the configured PII patterns up front. An invalid pattern is
    /// a configuration error and should have been rejected at load time
    /// (spec §7); here it is simply skipped so a bad pattern never takes
    /// down the pipeline at runtime.
    #[must_use]
    pub fn new(config: VerificationConfig) -> Self {
        let patterns = config
            .pii_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        let dropped = IntCounterVec::new(
            Opts::new("points_dropped_verification_total", "Points dropped for missing required attributes"),
            &["reason"],
        )
        .unwrap_or_else(|_| unreachable!("static metric definition"));
        Self { config, patterns, dropped }
    }

    pub fn register(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.dropped.clone()))?;
        Ok(())
    }

    pub fn apply(&self, batch: &mut MetricBatch) {
        if self.config.enforce_conventions {
            self.enforce_required_attributes(batch);
        }
        if !self.patterns.is_empty() {
            self.redact_pii(batch);
        }
    }

    fn enforce_required_attributes(&self, batch: &mut MetricBatch) {
        batch.retain_points(|resource, _scope, metric, point| {
            let required = required_keys_for(&metric.name);
            let satisfied = required.iter().all(|key| {
                resource.get(key).is_some() || point.get(key).is_some() || canonicalized(point, key).is_some()
            });
            if !satisfied {
                self.dropped.with_label_values(&["missing_required_attribute"]).inc();
            }
            satisfied
        });

        for rm in &mut batch.resources {
            for sm in &mut rm.scopes {
                for metric in &mut sm.metrics {
                    for point in &mut metric.data_points {
                        canonicalize_point(point);
                    }
                }
            }
        }
    }

    fn redact_pii(&self, batch: &mut MetricBatch) {
        for rm in &mut batch.resources {
            for sm in &mut rm.scopes {
                for metric in &mut sm.metrics {
                    for point in &mut metric.data_points {
                        self.redact_point(point);
                    }
                }
            }
        }
    }

    fn redact_point(&self, point: &mut crate::model::DataPoint) {
        for value in point.attributes.values_mut() {
            if let AttributeValue::String(s) = value {
                *s = self.redact_str(s);
            }
        }
    }

    fn redact_str(&self, input: &str) -> String {
        let mut out = input.to_string();
        for pattern in &self.patterns {
            out = pattern.replace_all(&out, self.config.redaction_token.as_str()).into_owned();
        }
        out
    }
}

/// Looks up `key` on the point by trying each configured legacy alias that
/// maps onto it, without mutating anything. Used only to decide whether a
/// point satisfies the requirement before the canonicalization pass runs.
fn canonicalized<'a>(point: &'a crate::model::DataPoint, key: &str) -> Option<&'a AttributeValue> {
    LEGACY_KEY_ALIASES
        .iter()
        .find(|(_legacy, canonical)| *canonical == key)
        .and_then(|(legacy, _)| point.get(legacy))
}

/// Copies any present legacy key onto its canonical name, leaving an
/// already-present canonical key untouched. Idempotent (spec §8): running
/// this twice is a no-op the second time since the legacy key is never
/// removed but the canonical key, once set, is never overwritten.
fn canonicalize_point(point: &mut crate::model::DataPoint) {
    let mut additions: HashMap<String, AttributeValue> = HashMap::new();
    for (legacy, canonical) in LEGACY_KEY_ALIASES {
        if point.attributes.contains_key(*canonical) {
            continue;
        }
        if let Some(value) = point.attributes.get(*legacy) {
            additions.insert((*canonical).to_string(), value.clone());
        }
    }
    for (key, value) in additions {
        point.attributes.insert(key, value);
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::model::{DataPoint, Metric, MetricKind, Resource, ResourceMetrics, Scope, ScopeMetrics};

    fn batch_with(resource_attrs: &[(&str, &str)], point: DataPoint, metric_name: &str) -> MetricBatch {
        let mut resource = Resource::new();
        for (k, v) in resource_attrs {
            resource = resource.with_attribute(*k, *v);
        }
        let mut metric = Metric::new(metric_name, MetricKind::Gauge);
        metric.push(point);
        MetricBatch {
            resources: vec![ResourceMetrics {
                resource,
                scopes: vec![ScopeMetrics {
                    scope: Scope::new("dbtel"),
                    metrics: vec![metric],
                }],
            }],
        }
    }

    #[test]
    fn drops_point_missing_required_attribute() {
        let verification = Verification::new(VerificationConfig::default());
        let mut batch = batch_with(&[("db.system", "postgresql")], DataPoint::new(1, 1_i64), "db.connections");
        verification.apply(&mut batch);
        assert!(batch.is_empty());
    }

    #[test]
    fn legacy_key_canonicalizes_to_satisfy_requirement() {
        let verification = Verification::new(VerificationConfig::default());
        let point = DataPoint::new(1, 1_i64).with_attribute("db.instance", "orders");
        let mut batch = batch_with(&[("db.system", "postgresql")], point, "db.connections");
        verification.apply(&mut batch);
        assert_eq!(batch.point_count(), 1);
        batch.for_each_point(|_, _, _, p| {
            assert_eq!(p.get("db.name"), Some(&AttributeValue::from("orders")));
        });
    }

    #[test]
    fn redacts_email_in_statement_attribute_only() {
        let mut config = VerificationConfig::default();
        config.pii_patterns = vec![r"[\w.+-]+@[\w-]+\.[\w.-]+".to_string()];
        config.redaction_token = "[REDACTED]".to_string();
        let verification = Verification::new(config);

        let point = DataPoint::new(1, 1_i64)
            .with_attribute("db.statement", "SELECT * FROM users WHERE email = 'a@b.com'")
            .with_attribute("db.system", "postgresql")
            .with_attribute("db.name", "orders");
        let mut batch = batch_with(&[], point, "db.query.total_exec_time");
        verification.apply(&mut batch);

        batch.for_each_point(|_, _, _, p| {
            let Some(AttributeValue::String(statement)) = p.get("db.statement") else {
                unreachable!("db.statement attribute was set on this point");
            };
            assert!(!statement.contains("a@b.com"));
            assert!(statement.contains("[REDACTED]"));
        });
    }
}
