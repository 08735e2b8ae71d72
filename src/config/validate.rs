//! Load-time configuration validation (spec §8's boundary cases).

use super::Config;
use anyhow::{Result, bail};

pub fn validate(config: &Config) -> Result<()> {
    for pattern in &config.verification.pii_patterns {
        if pattern.is_empty() {
            bail!("verification.pii_patterns contains an empty pattern, which would match everything");
        }
        if regex::Regex::new(pattern).is_err() {
            bail!("verification.pii_patterns contains an invalid regex: {pattern}");
        }
    }

    if config.verification.redaction_token.is_empty() {
        bail!("verification.redaction_token must not be empty");
    }

    for rule in &config.sampling.rules {
        if !(0.0..=1.0).contains(&rule.probability) {
            bail!(
                "sampling rule with predicate {:?} has out-of-range probability {}",
                rule.predicate,
                rule.probability
            );
        }
    }

    if !(0.0..=1.0).contains(&config.sampling.pressure_floor_multiplier) {
        bail!("sampling.pressure_floor_multiplier must be in [0, 1]");
    }

    if !(0.0..=1.0).contains(&config.circuit_breaker.error_ratio_threshold) {
        bail!("circuit_breaker.error_ratio_threshold must be in [0, 1]");
    }

    if config.circuit_breaker.open_threshold == 0 {
        bail!("circuit_breaker.open_threshold must be >= 1");
    }

    if config.cost_control.metric_cardinality_limit == 0 {
        bail!("cost_control.metric_cardinality_limit must be >= 1");
    }

    if config.memory_limiter.soft_mib > config.memory_limiter.hard_mib {
        bail!("memory_limiter.soft_mib must be <= hard_mib");
    }

    if config.batcher.max_size == 0 {
        bail!("batcher.max_size must be >= 1");
    }

    for (id, scraper) in &config.scrapers {
        if !(0.0..=1.0).contains(&scraper.deadline_factor) {
            bail!("scrapers.{id}.deadline_factor must be in [0, 1]");
        }
        if scraper.interval_secs == 0 {
            bail!("scrapers.{id}.interval_secs must be >= 1");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn rejects_out_of_range_probability() {
        let yaml = r"
sampling:
  rules:
    - predicate: ''
      probability: 1.5
      priority: 0
";
        assert!(Config::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn rejects_inverted_memory_thresholds() {
        let yaml = r"
memory_limiter:
  soft_mib: 900
  hard_mib: 100
";
        assert!(Config::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn accepts_defaults() {
        assert!(validate(&Config::default()).is_ok());
    }
}
