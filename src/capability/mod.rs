//! Capability sets (spec §3, §4.3): detected server features governing
//! which probes are safe to run against a target.

pub mod detector;

use std::collections::HashMap;
use std::time::Instant;

/// One detected (or attempted-and-failed) extension/feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureStatus {
    pub available: bool,
    pub version: Option<String>,
    /// Populated when `available` is false and detection failed rather than
    /// cleanly determined the feature absent (spec §4.3).
    pub error_reason: Option<String>,
}

impl FeatureStatus {
    #[must_use]
    pub fn available(version: impl Into<String>) -> Self {
        Self {
            available: true,
            version: Some(version.into()),
            error_reason: None,
        }
    }

    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            available: false,
            version: None,
            error_reason: None,
        }
    }

    #[must_use]
    pub fn probe_failed(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            version: None,
            error_reason: Some(reason.into()),
        }
    }
}

/// Server variant, as distinguished in spec §4.3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseVariant {
    Standard,
    ManagedCloud(String),
    Fork(String),
}

/// Immutable snapshot of a target's detected capabilities. Stages read it;
/// only the feature detector ever produces a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitySet {
    pub target_id: String,
    pub server_version: (u32, u32, u32),
    pub extensions: HashMap<String, FeatureStatus>,
    pub can_read_performance_views: bool,
    pub variant: DatabaseVariant,
}

impl CapabilitySet {
    #[must_use]
    pub fn extension_available(&self, name: &str) -> bool {
        self.extensions.get(name).is_some_and(|f| f.available)
    }

    #[must_use]
    pub fn is_at_least(&self, major: u32, minor: u32) -> bool {
        (self.server_version.0, self.server_version.1) >= (major, minor)
    }
}

/// Per-target detection freshness, spec §4.15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Never,
    InProgress,
    Fresh,
    Stale,
}

/// Wall-clock bookkeeping paired with a published `CapabilitySet`.
#[derive(Debug, Clone)]
pub struct CapabilityEntry {
    pub set: CapabilitySet,
    pub detected_at: Instant,
}
