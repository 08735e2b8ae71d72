//! Series and SQL fingerprinting.
//!
//! A series fingerprint identifies `(resource attributes + scope name +
//! metric name + data point attribute map)`, used by the adaptive sampler
//! (§4.8) and cost control (§4.13) to make deterministic, repeatable
//! decisions without carrying the whole attribute map around as a key.

use crate::model::{AttributeMap, Resource, Scope};
use std::hash::{Hash, Hasher};

/// Opaque, stable identity of a series within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesFingerprint(u64);

impl SeriesFingerprint {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Fingerprint a series. Attribute maps are `BTreeMap`s so iteration order
/// is already canonical; we still sort explicitly at the call site to make
/// the canonicalization visible rather than relying on the map's internal
/// layout.
#[must_use]
pub fn series_fingerprint(
    resource: &Resource,
    scope: &Scope,
    metric_name: &str,
    attributes: &AttributeMap,
) -> SeriesFingerprint {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    hash_attribute_map(&resource.attributes, &mut hasher);
    scope.name.hash(&mut hasher);
    metric_name.hash(&mut hasher);
    hash_attribute_map(attributes, &mut hasher);
    SeriesFingerprint(hasher.finish())
}

fn hash_attribute_map(map: &AttributeMap, hasher: &mut impl Hasher) {
    // BTreeMap iterates in key order already; sorting again would be
    // redundant but we keep the intent explicit in the name below.
    for (k, v) in map {
        k.hash(hasher);
        v.coerced_string().hash(hasher);
    }
}

/// Fingerprint an already-normalized SQL string (post-anonymization). Used
/// by the plan-attribute extractor (§4.10) and exercised by spec §8's
/// "two statements differing only in literals produce identical
/// fingerprints" law.
#[must_use]
pub fn sql_fingerprint(normalized_sql: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    normalized_sql.hash(&mut hasher);
    hasher.finish()
}

/// Deterministic sampling decision per spec §4.8 / §8: `hash(fingerprint,
/// bucket) < probability`, expressed as a value in `[0, 1)` derived from the
/// hash so callers compare directly against a probability threshold.
#[must_use]
pub fn sampling_unit_interval(fingerprint: SeriesFingerprint, timestamp_bucket: u64) -> f64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    fingerprint.0.hash(&mut hasher);
    timestamp_bucket.hash(&mut hasher);
    let bits = hasher.finish();
    // Map u64 -> [0, 1) using the full mantissa-bearing range.
    #[allow(clippy::cast_precision_loss)]
    let unit = (bits >> 11) as f64 / (1u64 << 53) as f64;
    unit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttributeValue;

    #[test]
    fn same_inputs_produce_same_fingerprint() {
        let resource = Resource::new().with_attribute("service.name", "db");
        let scope = Scope::new("dbtel");
        let mut attrs = AttributeMap::new();
        attrs.insert("db.name".into(), AttributeValue::from("orders"));

        let a = series_fingerprint(&resource, &scope, "db.connections", &attrs);
        let b = series_fingerprint(&resource, &scope, "db.connections", &attrs);
        assert_eq!(a, b);
    }

    #[test]
    fn attribute_order_does_not_matter() {
        let resource = Resource::new();
        let scope = Scope::new("dbtel");

        let mut a = AttributeMap::new();
        a.insert("z".into(), AttributeValue::from("1"));
        a.insert("a".into(), AttributeValue::from("2"));

        let mut b = AttributeMap::new();
        b.insert("a".into(), AttributeValue::from("2"));
        b.insert("z".into(), AttributeValue::from("1"));

        assert_eq!(
            series_fingerprint(&resource, &scope, "m", &a),
            series_fingerprint(&resource, &scope, "m", &b)
        );
    }

    #[test]
    fn sampling_decision_is_deterministic() {
        let fp = SeriesFingerprint(42);
        let a = sampling_unit_interval(fp, 100);
        let b = sampling_unit_interval(fp, 100);
        assert!((a - b).abs() < f64::EPSILON);
        assert!((0.0..1.0).contains(&a));
    }
}
