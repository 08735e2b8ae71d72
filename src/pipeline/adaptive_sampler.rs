//! Adaptive sampler (spec §4.8): drops low-value data points under load
//! using weighted, ordered rules. Sampling decisions are deterministic per
//! `(series_fingerprint, timestamp_bucket)` so repeated evaluation in the
//! same process always agrees (spec §8).

use crate::config::{SamplingConfig, SamplingRuleConfig};
use crate::model::fingerprint::{sampling_unit_interval, series_fingerprint};
use crate::model::{AttributeValue, MetricBatch};
use std::sync::atomic::{AtomicBool, Ordering};

/// A single compiled predicate: `key=value` (match) or `key!=value` (negated
/// match), or empty for "match everything" (spec §4.8's implicit catch-all).
enum Predicate {
    Any,
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
}

impl Predicate {
    fn compile(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::Any;
        }
        if let Some((key, value)) = raw.split_once("!=") {
            return Self::NotEquals {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            };
        }
        if let Some((key, value)) = raw.split_once('=') {
            return Self::Equals {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            };
        }
        Self::Any
    }

    fn matches(&self, attributes: &crate::model::AttributeMap) -> bool {
        match self {
            Self::Any => true,
            Self::Equals { key, value } => {
                attributes.get(key).map(AttributeValue::coerced_string).as_deref() == Some(value)
            }
            Self::NotEquals { key, value } => {
                attributes.get(key).map(AttributeValue::coerced_string).as_deref() != Some(value)
            }
        }
    }
}

struct CompiledRule {
    predicate: Predicate,
    probability: f64,
}

/// Rules ordered by priority (highest first), then declaration order, per
/// spec §4.8 ("first matching rule decides").
pub struct AdaptiveSampler {
    rules: Vec<CompiledRule>,
    pressure_floor_multiplier: f64,
    under_pressure: AtomicBool,
}

impl AdaptiveSampler {
    #[must_use]
    pub fn new(config: &SamplingConfig) -> Self {
        let mut rules: Vec<(i32, SamplingRuleConfig)> =
            config.rules.iter().cloned().map(|r| (r.priority, r)).collect();
        rules.sort_by(|a, b| b.0.cmp(&a.0));

        Self {
            rules: rules
                .into_iter()
                .map(|(_, r)| CompiledRule {
                    predicate: Predicate::compile(&r.predicate),
                    probability: r.probability,
                })
                .collect(),
            pressure_floor_multiplier: config.pressure_floor_multiplier,
            under_pressure: AtomicBool::new(false),
        }
    }

    /// Signal from memory-limiter/cost-control that sustained pressure is
    /// active; probabilities are globally scaled down until cleared.
    pub fn set_pressure(&self, active: bool) {
        self.under_pressure.store(active, Ordering::Relaxed);
    }

    fn probability_for(&self, attributes: &crate::model::AttributeMap) -> f64 {
        let base = self
            .rules
            .iter()
            .find(|r| r.predicate.matches(attributes))
            .map_or(1.0, |r| r.probability);
        if self.under_pressure.load(Ordering::Relaxed) {
            base * self.pressure_floor_multiplier
        } else {
            base
        }
    }

    /// Filter the batch in place using the deterministic decision rule
    /// `hash(series_fingerprint, timestamp_bucket) < probability`.
    pub fn apply(&self, batch: &mut MetricBatch) {
        batch.retain_points(|resource, scope, metric, point| {
            let probability = self.probability_for(&point.attributes);
            if probability >= 1.0 {
                return true;
            }
            if probability <= 0.0 {
                return false;
            }
            let fingerprint = series_fingerprint(resource, scope, &metric.name, &point.attributes);
            let bucket = point.timestamp_unix_nanos / 1_000_000_000;
            sampling_unit_interval(fingerprint, bucket) < probability
        });
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::model::{DataPoint, Metric, MetricKind, Resource, ResourceMetrics, Scope, ScopeMetrics};

    fn batch_with_point(attrs: &[(&str, &str)]) -> MetricBatch {
        let mut point = DataPoint::new(1, 1_i64);
        for (k, v) in attrs {
            point = point.with_attribute(*k, *v);
        }
        let mut metric = Metric::new("db.connections", MetricKind::Gauge);
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
    fn probability_one_keeps_everything() {
        let sampler = AdaptiveSampler::new(&SamplingConfig {
            rules: vec![SamplingRuleConfig {
                predicate: String::new(),
                probability: 1.0,
                priority: 0,
            }],
            pressure_floor_multiplier: 0.5,
        });
        let mut batch = batch_with_point(&[("state", "idle")]);
        sampler.apply(&mut batch);
        assert_eq!(batch.point_count(), 1);
    }

    #[test]
    fn probability_zero_drops_everything() {
        let sampler = AdaptiveSampler::new(&SamplingConfig {
            rules: vec![SamplingRuleConfig {
                predicate: String::new(),
                probability: 0.0,
                priority: 0,
            }],
            pressure_floor_multiplier: 0.5,
        });
        let mut batch = batch_with_point(&[("state", "idle")]);
        sampler.apply(&mut batch);
        assert!(batch.is_empty());
    }

    #[test]
    fn first_matching_rule_wins_by_priority() {
        let sampler = AdaptiveSampler::new(&SamplingConfig {
            rules: vec![
                SamplingRuleConfig {
                    predicate: "state=idle".to_string(),
                    probability: 0.0,
                    priority: 10,
                },
                SamplingRuleConfig {
                    predicate: String::new(),
                    probability: 1.0,
                    priority: 0,
                },
            ],
            pressure_floor_multiplier: 0.5,
        });
        let mut batch = batch_with_point(&[("state", "idle")]);
        sampler.apply(&mut batch);
        assert!(batch.is_empty());
    }

    #[test]
    fn pressure_scales_probability() {
        let sampler = AdaptiveSampler::new(&SamplingConfig {
            rules: vec![SamplingRuleConfig {
                predicate: String::new(),
                probability: 1.0,
                priority: 0,
            }],
            pressure_floor_multiplier: 0.0,
        });
        sampler.set_pressure(true);
        let mut batch = batch_with_point(&[("state", "idle")]);
        sampler.apply(&mut batch);
        assert!(batch.is_empty());
    }
}
