//! Typed configuration tree for spec §6.
//!
//! Parsing the operator-facing document (file discovery, env overlay,
//! secret resolution) is the launcher's job and stays external per spec
//! §1; this module only defines the shapes the pipeline constructor
//! consumes and the one load-time validation pass spec §8 requires
//! ("a PII pattern matching the empty string is rejected at configuration
//! load"). Every struct derives `Deserialize` with `deny_unknown_fields` so
//! an unrecognized option is a load error, not a silently-ignored typo —
//! the §9 redesign flag for "dynamic configuration dispatch".

pub mod validate;

use crate::errors::{ClassifiedError, ErrorClass};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Postgres,
    Mysql,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScraperConfig {
    pub driver: Driver,
    pub endpoint: String,
    #[serde(default, skip_serializing)]
    pub credentials: Option<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_deadline_factor")]
    pub deadline_factor: f64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_idle_connections")]
    pub idle_connections: u32,
}

const fn default_interval_secs() -> u64 {
    10
}
const fn default_deadline_factor() -> f64 {
    0.8
}
const fn default_max_connections() -> u32 {
    5
}
const fn default_idle_connections() -> u32 {
    2
}

impl ScraperConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs as f64 * self.deadline_factor)
    }

    /// Credentials as a secret, defaulting to empty (anonymous / trust auth)
    /// rather than panicking when the section omits them.
    #[must_use]
    pub fn credentials_secret(&self) -> SecretString {
        SecretString::from(self.credentials.clone().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingRuleConfig {
    /// Simple `key=value` or `key!=value` predicate over data-point
    /// attributes. An empty string means "match everything" (the implicit
    /// catch-all rule, spec §4.8).
    #[serde(default)]
    pub predicate: String,
    pub probability: f64,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingConfig {
    #[serde(default)]
    pub rules: Vec<SamplingRuleConfig>,
    #[serde(default = "default_pressure_floor_multiplier")]
    pub pressure_floor_multiplier: f64,
}

const fn default_pressure_floor_multiplier() -> f64 {
    0.5
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            pressure_floor_multiplier: default_pressure_floor_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_open_threshold")]
    pub open_threshold: u32,
    #[serde(default = "default_error_ratio_threshold")]
    pub error_ratio_threshold: f64,
    #[serde(default = "default_open_duration_secs")]
    pub open_duration_secs: u64,
    #[serde(default = "default_probe_successes")]
    pub probe_successes: u32,
    /// Sliding failure-counting window backing §4.9's "5 failures in 60s"
    /// rule.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

const fn default_open_threshold() -> u32 {
    5
}
const fn default_error_ratio_threshold() -> f64 {
    0.8
}
const fn default_open_duration_secs() -> u64 {
    30
}
const fn default_probe_successes() -> u32 {
    3
}
const fn default_window_secs() -> u64 {
    60
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            open_threshold: default_open_threshold(),
            error_ratio_threshold: default_error_ratio_threshold(),
            open_duration_secs: default_open_duration_secs(),
            probe_successes: default_probe_successes(),
            window_secs: default_window_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn open_duration(&self) -> Duration {
        Duration::from_secs(self.open_duration_secs)
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostControlConfig {
    #[serde(default = "default_cardinality_limit")]
    pub metric_cardinality_limit: usize,
    #[serde(default)]
    pub high_cardinality_dimensions: Vec<String>,
    #[serde(default = "default_monthly_budget")]
    pub monthly_budget: f64,
    #[serde(default)]
    pub aggressive_mode_enabled: bool,
    #[serde(default = "default_bytes_per_datapoint")]
    pub bytes_per_datapoint: f64,
}

const fn default_cardinality_limit() -> usize {
    10_000
}
const fn default_monthly_budget() -> f64 {
    1000.0
}
const fn default_bytes_per_datapoint() -> f64 {
    8.0
}

impl Default for CostControlConfig {
    fn default() -> Self {
        Self {
            metric_cardinality_limit: default_cardinality_limit(),
            high_cardinality_dimensions: Vec::new(),
            monthly_budget: default_monthly_budget(),
            aggressive_mode_enabled: false,
            bytes_per_datapoint: default_bytes_per_datapoint(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationConfig {
    #[serde(default)]
    pub pii_patterns: Vec<String>,
    #[serde(default = "default_redaction_token")]
    pub redaction_token: String,
    #[serde(default = "default_true")]
    pub enforce_conventions: bool,
}

fn default_redaction_token() -> String {
    "[REDACTED]".to_string()
}
const fn default_true() -> bool {
    true
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            pii_patterns: Vec::new(),
            redaction_token: default_redaction_token(),
            enforce_conventions: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorMonitorConfig {
    #[serde(default = "default_max_attribute_length")]
    pub max_attribute_length: usize,
    #[serde(default = "default_max_metric_name_length")]
    pub max_metric_name_length: usize,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u64,
    #[serde(default = "default_error_suppression_secs")]
    pub error_suppression_secs: u64,
    #[serde(default = "default_max_attribute_keys")]
    pub max_attribute_keys_per_metric: usize,
}

const fn default_max_attribute_length() -> usize {
    4096
}
const fn default_max_metric_name_length() -> usize {
    255
}
const fn default_alert_threshold() -> u64 {
    1
}
const fn default_error_suppression_secs() -> u64 {
    300
}
const fn default_max_attribute_keys() -> usize {
    32
}

impl Default for ErrorMonitorConfig {
    fn default() -> Self {
        Self {
            max_attribute_length: default_max_attribute_length(),
            max_metric_name_length: default_max_metric_name_length(),
            alert_threshold: default_alert_threshold(),
            error_suppression_secs: default_error_suppression_secs(),
            max_attribute_keys_per_metric: default_max_attribute_keys(),
        }
    }
}

impl ErrorMonitorConfig {
    #[must_use]
    pub fn error_suppression_duration(&self) -> Duration {
        Duration::from_secs(self.error_suppression_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub upsert: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryLimiterConfig {
    #[serde(default = "default_soft_mib")]
    pub soft_mib: u64,
    #[serde(default = "default_hard_mib")]
    pub hard_mib: u64,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

const fn default_soft_mib() -> u64 {
    512
}
const fn default_hard_mib() -> u64 {
    768
}
const fn default_check_interval_secs() -> u64 {
    1
}

impl Default for MemoryLimiterConfig {
    fn default() -> Self {
        Self {
            soft_mib: default_soft_mib(),
            hard_mib: default_hard_mib(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl MemoryLimiterConfig {
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatcherConfig {
    #[serde(default = "default_batcher_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_batcher_max_size")]
    pub max_size: usize,
}

const fn default_batcher_timeout_secs() -> u64 {
    5
}
const fn default_batcher_max_size() -> usize {
    1000
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_batcher_timeout_secs(),
            max_size: default_batcher_max_size(),
        }
    }
}

impl BatcherConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The OTLP metrics exporter (spec §1/§6: the wire-level exporter is an
/// external collaborator; this is its configuration surface). `endpoint`
/// follows the same `OTEL_EXPORTER_OTLP_*` convention `cli::telemetry`
/// uses for traces, defaulting to the standard local collector address
/// when unset.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_export_interval_secs")]
    pub export_interval_secs: u64,
    #[serde(default = "default_export_timeout_secs")]
    pub export_timeout_secs: u64,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

const fn default_export_interval_secs() -> u64 {
    60
}
const fn default_export_timeout_secs() -> u64 {
    10
}
fn default_service_name() -> String {
    "dbtel-pipeline".to_string()
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            export_interval_secs: default_export_interval_secs(),
            export_timeout_secs: default_export_timeout_secs(),
            service_name: default_service_name(),
        }
    }
}

impl ExporterConfig {
    #[must_use]
    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export_interval_secs)
    }

    #[must_use]
    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }
}

/// The top-level configuration document (spec §6's table, one field per
/// section).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub scrapers: HashMap<String, ScraperConfig>,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub cost_control: CostControlConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub error_monitor: ErrorMonitorConfig,
    #[serde(default)]
    pub resource: ResourceConfig,
    #[serde(default)]
    pub memory_limiter: MemoryLimiterConfig,
    #[serde(default)]
    pub batcher: BatcherConfig,
    #[serde(default)]
    pub exporter: ExporterConfig,
}

impl Config {
    /// Parse a YAML document into a `Config`, then run the load-time
    /// validation pass. Any failure here is a configuration error (spec
    /// §7): fatal, the process should not start.
    pub fn from_yaml_str(document: &str) -> Result<Self, ClassifiedError> {
        let config: Self = serde_yaml::from_str(document)
            .map_err(|e| ClassifiedError::new(ErrorClass::Configuration, e.into()))?;
        validate::validate(&config).map_err(|e| ClassifiedError::new(ErrorClass::Configuration, e))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let yaml = r"
scrapers:
  primary:
    driver: postgres
    endpoint: localhost:5432
";
        let config = Config::from_yaml_str(yaml).expect("valid config");
        assert_eq!(config.scrapers.len(), 1);
        let scraper = &config.scrapers["primary"];
        assert_eq!(scraper.driver, Driver::Postgres);
        assert_eq!(scraper.interval_secs, 10);
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = r"
scrapers:
  primary:
    driver: postgres
    endpoint: localhost:5432
    bogus_option: true
";
        assert!(Config::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn rejects_empty_pii_pattern() {
        let yaml = r#"
verification:
  pii_patterns: [""]
"#;
        let err = Config::from_yaml_str(yaml).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }
}
