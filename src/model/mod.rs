//! The in-memory metric record model described in spec §3.
//!
//! A [`MetricBatch`] is a forest of resources, each carrying one or more
//! scopes, each carrying one or more metrics, each carrying data points.
//! Attribute values are a closed sum type (§9 "reflection-based attribute
//! typing" redesign flag) rather than a dynamically-typed map, so stages
//! never need to introspect by name to guess a type.

pub mod fingerprint;

use std::collections::BTreeMap;
use std::fmt;

/// Maximum allowed length, in UTF-8 bytes, of a metric name (spec §3).
pub const MAX_METRIC_NAME_LEN: usize = 255;

/// Maximum allowed length, in UTF-8 bytes, of an attribute value after
/// string coercion (spec §3).
pub const MAX_ATTRIBUTE_VALUE_LEN: usize = 4096;

/// A single attribute value. Closed sum type: string, integer, float, or
/// boolean. Never introspected by name to guess an alternate representation.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl AttributeValue {
    /// Render the value the way it would be coerced to a string for length
    /// checks and PII pattern matching (spec §4.12, §8).
    #[must_use]
    pub fn coerced_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Double(d) => d.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }

    /// Length, in bytes, of the value after string coercion.
    #[must_use]
    pub fn coerced_len(&self) -> usize {
        match self {
            Self::String(s) => s.len(),
            other => other.coerced_string().len(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coerced_string())
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// String-keyed, primitive-valued attribute map. `BTreeMap` gives us
/// deterministic iteration (useful for stable fingerprints) while its
/// derived `PartialEq` already compares as an unordered multiset of pairs,
/// matching spec §3's equality rule.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// The entity emitting telemetry: a database instance plus the service
/// wrapping it. Attributes are immutable once constructed by the
/// resource-decorator (spec §4.7).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resource {
    pub attributes: AttributeMap,
}

impl Resource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

/// The emitting library / instrumentation scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub name: String,
    pub version: Option<String>,
}

impl Scope {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }
}

/// Metric kind, matching the four OTel kinds spec §3 calls out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Sum { monotonic: bool },
    Histogram,
}

/// A single point-in-time value in a series.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Unix nanoseconds. Using an integer (rather than a `chrono` type)
    /// keeps comparisons cheap on the hot path; conversion to/from
    /// `chrono::DateTime<Utc>` is a thin helper.
    pub timestamp_unix_nanos: u64,
    pub value: DataPointValue,
    pub attributes: AttributeMap,
}

impl DataPoint {
    #[must_use]
    pub fn new(timestamp_unix_nanos: u64, value: impl Into<DataPointValue>) -> Self {
        Self {
            timestamp_unix_nanos,
            value: value.into(),
            attributes: AttributeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataPointValue {
    Int(i64),
    Double(f64),
}

impl From<i64> for DataPointValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for DataPointValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl DataPointValue {
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => {
                // The cast is intentional: this is a display/estimation
                // helper (cost tracker byte estimation), not an exact value.
                #[allow(clippy::cast_precision_loss)]
                let f = i as f64;
                f
            }
            Self::Double(d) => d,
        }
    }
}

/// Validate a metric name against spec §3: ASCII, <= 255 chars, matching
/// `[a-zA-Z_][a-zA-Z0-9_.]*`.
#[must_use]
pub fn is_valid_metric_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_METRIC_NAME_LEN || !name.is_ascii() {
        return false;
    }
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// A metric: name, unit, description, kind, and its data points.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub unit: String,
    pub description: String,
    pub kind: MetricKind,
    pub data_points: Vec<DataPoint>,
}

impl Metric {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            unit: String::new(),
            description: String::new(),
            kind,
            data_points: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn push(&mut self, point: DataPoint) {
        self.data_points.push(point);
    }
}

/// One scope's worth of metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeMetrics {
    pub scope: Scope,
    pub metrics: Vec<Metric>,
}

/// One resource's worth of scoped metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceMetrics {
    pub resource: Resource,
    pub scopes: Vec<ScopeMetrics>,
}

/// The unit the pipeline moves between stages: a batch of resource-scoped
/// metrics. Owned exclusively by the stage currently processing it
/// (single-owner discipline, spec §3/§5) — Rust's move semantics make that
/// the natural, enforced default; a stage that wants to keep working on a
/// batch after handing it off has to clone it explicitly.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricBatch {
    pub resources: Vec<ResourceMetrics>,
}

impl MetricBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.iter().all(|r| {
            r.scopes
                .iter()
                .all(|s| s.metrics.iter().all(|m| m.data_points.is_empty()))
        })
    }

    /// Total number of data points across the whole batch.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.resources
            .iter()
            .flat_map(|r| &r.scopes)
            .flat_map(|s| &s.metrics)
            .map(|m| m.data_points.len())
            .sum()
    }

    /// Visit every data point together with its owning metric and resource,
    /// for stages that need read-only context (e.g. the breaker reading
    /// `db.target.id` off the resource).
    pub fn for_each_point<F: FnMut(&Resource, &Scope, &Metric, &DataPoint)>(&self, mut f: F) {
        for rm in &self.resources {
            for sm in &rm.scopes {
                for metric in &sm.metrics {
                    for point in &metric.data_points {
                        f(&rm.resource, &sm.scope, metric, point);
                    }
                }
            }
        }
    }

    /// Retain only the data points for which `keep` returns true, dropping
    /// metrics/scopes/resources that become empty as a result. Used by every
    /// filtering stage (sampler, verification, cost-control, breaker).
    pub fn retain_points<F: FnMut(&Resource, &Scope, &Metric, &DataPoint) -> bool>(&mut self, mut keep: F) {
        for rm in &mut self.resources {
            let resource = rm.resource.clone();
            for sm in &mut rm.scopes {
                let scope = sm.scope.clone();
                for metric in &mut sm.metrics {
                    let metric_snapshot_name = metric.name.clone();
                    let metric_unit = metric.unit.clone();
                    let metric_description = metric.description.clone();
                    let metric_kind = metric.kind;
                    metric.data_points.retain(|point| {
                        let probe = Metric {
                            name: metric_snapshot_name.clone(),
                            unit: metric_unit.clone(),
                            description: metric_description.clone(),
                            kind: metric_kind,
                            data_points: Vec::new(),
                        };
                        keep(&resource, &scope, &probe, point)
                    });
                }
                sm.metrics.retain(|m| !m.data_points.is_empty());
            }
            rm.scopes.retain(|s| !s.metrics.is_empty());
        }
        rm_empty_resources(self);
    }
}

fn rm_empty_resources(batch: &mut MetricBatch) {
    batch.resources.retain(|r| !r.scopes.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_name_validation() {
        assert!(is_valid_metric_name("db.connections"));
        assert!(is_valid_metric_name("_private"));
        assert!(!is_valid_metric_name("1leading_digit"));
        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("has space"));
        assert!(!is_valid_metric_name("héllo"));
        let too_long = "a".repeat(MAX_METRIC_NAME_LEN + 1);
        assert!(!is_valid_metric_name(&too_long));
    }

    #[test]
    fn attribute_equality_is_multiset() {
        let mut a = AttributeMap::new();
        a.insert("b".into(), AttributeValue::from("2"));
        a.insert("a".into(), AttributeValue::from("1"));

        let mut b = AttributeMap::new();
        b.insert("a".into(), AttributeValue::from("1"));
        b.insert("b".into(), AttributeValue::from("2"));

        assert_eq!(a, b);
    }

    #[test]
    fn retain_points_drops_empty_containers() {
        let mut batch = MetricBatch::new();
        let mut metric = Metric::new("db.connections", MetricKind::Gauge);
        metric.push(DataPoint::new(1, 1_i64).with_attribute("state", "idle"));
        metric.push(DataPoint::new(2, 2_i64).with_attribute("state", "active"));
        batch.resources.push(ResourceMetrics {
            resource: Resource::new(),
            scopes: vec![ScopeMetrics {
                scope: Scope::new("dbtel"),
                metrics: vec![metric],
            }],
        });

        batch.retain_points(|_, _, _, p| p.get("state") == Some(&AttributeValue::from("active")));
        assert_eq!(batch.point_count(), 1);

        batch.retain_points(|_, _, _, _| false);
        assert!(batch.is_empty());
        assert!(batch.resources.is_empty());
    }
}
