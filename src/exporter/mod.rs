//! OTLP metrics export.
//!
//! Spec §1 treats the wire-level OTLP exporter as an external collaborator
//! to the core pipeline, specifying only the shape of what crosses the
//! boundary (§6: "OTLP-structured batches" satisfying the §3 data-model
//! invariants). This module is that collaborator: it converts a processed
//! [`MetricBatch`] into OpenTelemetry instrument recordings and ships them
//! over the same gRPC/tonic transport `cli::telemetry` already uses for
//! traces.
//!
//! Instruments are created lazily, one per `(scope name, metric name)` the
//! first time that metric is seen, and reused after that — matching
//! OpenTelemetry's own instrument-identity rule that unit and description
//! are fixed at creation.

use crate::config::ExporterConfig;
use crate::errors::{ClassifiedError, ErrorClass};
use crate::model::{AttributeValue, Metric, MetricBatch, MetricKind};
use opentelemetry::metrics::{Counter, Gauge, Histogram, UpDownCounter};
use opentelemetry::{KeyValue, Value, global};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider, Temporality};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

const METER_NAME: &str = "dbtel-pipeline";

enum Instrument {
    Counter(Counter<f64>),
    UpDownCounter(UpDownCounter<f64>),
    Gauge(Gauge<f64>),
    Histogram(Histogram<f64>),
}

/// Owns the OTel meter provider and the per-metric instrument cache.
/// Dropping it does not flush in-flight metrics; call [`Exporter::shutdown`]
/// first.
pub struct Exporter {
    provider: SdkMeterProvider,
    instruments: Mutex<HashMap<(String, String), Instrument>>,
}

impl Exporter {
    pub fn new(config: &ExporterConfig) -> Result<Self, ClassifiedError> {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| "http://localhost:4317".to_string());

        let otlp_exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(&endpoint)
            .with_temporality(Temporality::Cumulative)
            .with_timeout(config.export_timeout())
            .build()
            .map_err(|e| ClassifiedError::new(ErrorClass::Configuration, e.into()))?;

        let reader = PeriodicReader::builder(otlp_exporter)
            .with_interval(config.export_interval())
            .with_timeout(config.export_timeout())
            .build();

        let resource = Resource::builder()
            .with_attributes(vec![
                KeyValue::new("service.name", config.service_name.clone()),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ])
            .build();

        let provider = SdkMeterProvider::builder().with_resource(resource).with_reader(reader).build();

        global::set_meter_provider(provider.clone());

        Ok(Self {
            provider,
            instruments: Mutex::new(HashMap::new()),
        })
    }

    /// Record every point in `batch` through its instrument. Resource
    /// attributes are folded onto each point's attribute set: the SDK's
    /// meter provider binds one process-wide `Resource`, but our own model
    /// allows one resource per scrape target, so per-target identity
    /// (`db.target.id`, `server.address`, ...) has to travel as point
    /// attributes to survive export. Point attributes win on key collision.
    pub fn export(&self, batch: &MetricBatch) {
        batch.for_each_point(|resource, scope, metric, point| {
            let mut attrs: Vec<KeyValue> =
                resource.attributes.iter().map(|(k, v)| KeyValue::new(k.clone(), attribute_to_otel(v))).collect();
            attrs.extend(point.attributes.iter().map(|(k, v)| KeyValue::new(k.clone(), attribute_to_otel(v))));

            let value = point.value.as_f64();
            let mut instruments = self.lock_instruments();
            let key = (scope.name.clone(), metric.name.clone());
            let instrument = instruments.entry(key).or_insert_with(|| build_instrument(metric));

            match instrument {
                Instrument::Counter(c) => c.add(value, &attrs),
                Instrument::UpDownCounter(c) => c.add(value, &attrs),
                Instrument::Gauge(g) => g.record(value, &attrs),
                Instrument::Histogram(h) => h.record(value, &attrs),
            }
        });
    }

    /// Flush and stop the meter provider. Best-effort: a failure here is
    /// logged rather than propagated, matching spec §7's "the exporter
    /// decides" stance on downstream delivery.
    pub fn shutdown(&self) {
        if let Err(err) = self.provider.shutdown() {
            warn!(error = %err, "metrics exporter shutdown did not complete cleanly");
        }
    }

    fn lock_instruments(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Instrument>> {
        match self.instruments.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn build_instrument(metric: &Metric) -> Instrument {
    let meter = global::meter(METER_NAME);
    match metric.kind {
        MetricKind::Gauge => Instrument::Gauge(
            meter.f64_gauge(metric.name.clone()).with_description(metric.description.clone()).with_unit(metric.unit.clone()).build(),
        ),
        MetricKind::Sum { monotonic: true } => Instrument::Counter(
            meter
                .f64_counter(metric.name.clone())
                .with_description(metric.description.clone())
                .with_unit(metric.unit.clone())
                .build(),
        ),
        MetricKind::Sum { monotonic: false } => Instrument::UpDownCounter(
            meter
                .f64_up_down_counter(metric.name.clone())
                .with_description(metric.description.clone())
                .with_unit(metric.unit.clone())
                .build(),
        ),
        MetricKind::Histogram => Instrument::Histogram(
            meter
                .f64_histogram(metric.name.clone())
                .with_description(metric.description.clone())
                .with_unit(metric.unit.clone())
                .build(),
        ),
    }
}

fn attribute_to_otel(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::String(s) => Value::String(s.clone().into()),
        AttributeValue::Int(i) => Value::I64(*i),
        AttributeValue::Double(d) => Value::F64(*d),
        AttributeValue::Bool(b) => Value::Bool(*b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataPoint, ResourceMetrics, Scope, ScopeMetrics};

    #[test]
    fn builds_with_default_config() {
        let config = ExporterConfig::default();
        let exporter = Exporter::new(&config);
        assert!(exporter.is_ok());
    }

    #[test]
    fn export_creates_and_reuses_instrument_per_metric() {
        let exporter = Exporter::new(&ExporterConfig::default()).expect("default config builds");

        let mut metric = Metric::new("postgresql.backends", MetricKind::Gauge);
        metric.push(DataPoint::new(1, 3_i64));
        metric.push(DataPoint::new(2, 4_i64));
        let batch = MetricBatch {
            resources: vec![ResourceMetrics {
                resource: crate::model::Resource::new().with_attribute("db.target.id", "primary"),
                scopes: vec![ScopeMetrics {
                    scope: Scope::new("dbtel"),
                    metrics: vec![metric],
                }],
            }],
        };

        exporter.export(&batch);
        assert_eq!(exporter.lock_instruments().len(), 1);
    }
}
