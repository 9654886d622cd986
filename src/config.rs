// src/config.rs

use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;
use tracing::info;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        let mut config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables win over the file for deployment-specific values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("PROCTOR_SUBJECT_ID") {
            info!("Subject id overridden from environment: {}", id);
            self.subject.id = id;
        }
        if let Ok(url) = std::env::var("EVIDENCE_API_URL") {
            info!("Evidence API URL overridden from environment: {}", url);
            self.evidence.api_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.subject.id.trim().is_empty() {
            bail!("subject.id must not be empty");
        }
        if !(self.episode.cooldown_ms > 0.0) {
            bail!("episode.cooldown_ms must be positive");
        }
        if self.escalation.violation_ceiling == 0 || self.escalation.alert_ceiling == 0 {
            bail!("escalation ceilings must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.escalation.alert_probability) {
            bail!(
                "escalation.alert_probability must be within [0, 1], got {}",
                self.escalation.alert_probability
            );
        }
        if !(self.escalation.alert_interval_ms > 0.0) {
            bail!("escalation.alert_interval_ms must be positive");
        }
        if !(self.verification.success_duration_ms > 0.0)
            || self.verification.success_duration_ms >= self.verification.timeout_ms
        {
            bail!(
                "verification.success_duration_ms ({}) must be positive and shorter than timeout_ms ({})",
                self.verification.success_duration_ms,
                self.verification.timeout_ms
            );
        }
        if self.evidence.jpeg_quality == 0 || self.evidence.jpeg_quality > 100 {
            bail!(
                "evidence.jpeg_quality must be within 1..=100, got {}",
                self.evidence.jpeg_quality
            );
        }
        if !(self.media.frame_rate > 0.0) {
            bail!("media.frame_rate must be positive");
        }
        if !(0.0..=1.0).contains(&self.detector.min_object_confidence) {
            bail!("detector.min_object_confidence must be within [0, 1]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "subject:\n  id: SE000001\nescalation:\n  violation_ceiling: 3\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.subject.id, "SE000001");
        assert_eq!(config.escalation.violation_ceiling, 3);
        assert_eq!(config.escalation.alert_ceiling, 5);
        assert_eq!(config.episode.cooldown_ms, 3500.0);
        assert_eq!(config.evidence.jpeg_quality, 80);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unreachable_verification() {
        let mut config = Config::default();
        config.verification.success_duration_ms = 12_000.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_quality_and_probability() {
        let mut config = Config::default();
        config.evidence.jpeg_quality = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.escalation.alert_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_denied_policy_parses_lowercase() {
        let yaml = "media:\n  on_denied: degrade\n  backend: camera\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.media.on_denied,
            crate::types::DeniedMediaPolicy::Degrade
        );
        assert_eq!(config.media.backend, crate::types::MediaBackend::Camera);
    }
}
