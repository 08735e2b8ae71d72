//! Resource decorator (spec §4.7): injects fixed resource attributes
//! (`service.name`, `deployment.environment`, operator-configured pairs)
//! into every batch. Idempotent unless a key is marked `upsert`.

use crate::config::ResourceConfig;
use crate::model::MetricBatch;

pub struct ResourceDecorator {
    attributes: Vec<(String, String)>,
    upsert: bool,
}

impl ResourceDecorator {
    #[must_use]
    pub fn new(config: &ResourceConfig) -> Self {
        Self {
            attributes: config.attributes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            upsert: config.upsert,
        }
    }

    /// Apply decoration in place. Idempotent when `upsert` is false: a key
    /// already present is left untouched on a second pass (spec §8).
    pub fn apply(&self, batch: &mut MetricBatch) {
        for rm in &mut batch.resources {
            for (key, value) in &self.attributes {
                if self.upsert || !rm.resource.attributes.contains_key(key) {
                    rm.resource.attributes.insert(key.clone(), value.clone().into());
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::model::{AttributeValue, Metric, MetricKind, Resource, ResourceMetrics, Scope, ScopeMetrics};
    use std::collections::HashMap;

    fn sample_batch() -> MetricBatch {
        MetricBatch {
            resources: vec![ResourceMetrics {
                resource: Resource::new(),
                scopes: vec![ScopeMetrics {
                    scope: Scope::new("dbtel"),
                    metrics: vec![Metric::new("db.connections", MetricKind::Gauge)],
                }],
            }],
        }
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let mut attrs = HashMap::new();
        attrs.insert("service.name".to_string(), "dbtel".to_string());
        let decorator = ResourceDecorator::new(&ResourceConfig {
            attributes: attrs,
            upsert: false,
        });

        let mut batch = sample_batch();
        decorator.apply(&mut batch);
        let once = batch.clone();
        decorator.apply(&mut batch);
        assert_eq!(once, batch);
    }

    #[test]
    fn preserves_existing_key_without_upsert() {
        let mut attrs = HashMap::new();
        attrs.insert("service.name".to_string(), "new-value".to_string());
        let decorator = ResourceDecorator::new(&ResourceConfig {
            attributes: attrs,
            upsert: false,
        });

        let mut batch = sample_batch();
        batch.resources[0].resource.attributes.insert(
            "service.name".to_string(),
            AttributeValue::from("existing-value"),
        );
        decorator.apply(&mut batch);
        assert_eq!(
            batch.resources[0].resource.get("service.name"),
            Some(&AttributeValue::from("existing-value"))
        );
    }

    #[test]
    fn upsert_overwrites_existing_key() {
        let mut attrs = HashMap::new();
        attrs.insert("service.name".to_string(), "new-value".to_string());
        let decorator = ResourceDecorator::new(&ResourceConfig {
            attributes: attrs,
            upsert: true,
        });

        let mut batch = sample_batch();
        batch.resources[0].resource.attributes.insert(
            "service.name".to_string(),
            AttributeValue::from("existing-value"),
        );
        decorator.apply(&mut batch);
        assert_eq!(
            batch.resources[0].resource.get("service.name"),
            Some(&AttributeValue::from("new-value"))
        );
    }
}
