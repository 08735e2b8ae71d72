use dbtel_pipeline::config::Config;
use dbtel_pipeline::model::{DataPoint, Metric, MetricBatch, MetricKind, Resource, ResourceMetrics, Scope, ScopeMetrics};
use dbtel_pipeline::pipeline::Pipeline;

fn sample_batch() -> MetricBatch {
    let mut metric = Metric::new("postgresql.backends", MetricKind::Gauge);
    metric.push(DataPoint::new(1, 7_i64));

    MetricBatch {
        resources: vec![ResourceMetrics {
            resource: Resource::new().with_attribute("db.target.id", "primary"),
            scopes: vec![ScopeMetrics {
                scope: Scope::new("dbtel"),
                metrics: vec![metric],
            }],
        }],
    }
}

#[test]
fn a_healthy_batch_survives_every_stage() {
    let config = Config::from_yaml_str(&crate::common::minimal_config_yaml()).expect("minimal config is valid");
    let pipeline = Pipeline::new(&config);

    let batch = pipeline.process(sample_batch()).expect("batch should survive with no breaker trips or sampling pressure");
    assert_eq!(batch.point_count(), 1);
}

#[test]
fn an_open_breaker_drops_the_target_entirely() {
    let config = Config::from_yaml_str(&crate::common::minimal_config_yaml()).expect("minimal config is valid");
    let pipeline = Pipeline::new(&config);

    pipeline.breaker.observe("primary", false);
    assert!(pipeline.breaker.is_open("primary"));

    let result = pipeline.process(sample_batch());
    assert!(result.is_none(), "an open breaker should consume the whole batch for that target");
}

#[test]
fn memory_pressure_feeds_into_the_adaptive_sampler_without_panicking() {
    let config = Config::from_yaml_str(&crate::common::minimal_config_yaml()).expect("minimal config is valid");
    let pipeline = Pipeline::new(&config);

    for i in 0..64 {
        let mut batch = sample_batch();
        batch.resources[0].resource.attributes.insert("iteration".to_string(), i.to_string().into());
        let _ = pipeline.process(batch);
    }
}
