//! Runtime configuration.
//!
//! ```yaml
//! policy:
//!   mode: strict
//!   max_attempts: 2
//! escalation_timeout: 5m
//! execution_timeout: 10m
//! cancel_grace: 5s
//! max_output_bytes: 1048576
//! protection_mode: always_on
//! correction_strategy: auto_fix_simple
//! confirm_warnings: false
//! queue_capacity: 64
//! audit_retention: 10000
//! channel_breaker:
//!   failure_threshold: 3
//!   recovery_timeout: 30s
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use guardian_core::config::validate_policy_schema;
use guardian_core::{ConfigError, PolicyConfig};
use serde::{Deserialize, Serialize};

use crate::protection::{CorrectionStrategy, ProtectionMode};
use crate::resilience::BreakerConfig;

/// Configuration for the coordinator and the protection service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Policy configuration shared with guardian-core
    pub policy: PolicyConfig,

    /// How long an escalation waits for a human before resolving to REJECT
    #[serde(with = "duration_human")]
    pub escalation_timeout: Duration,

    /// Wall-clock budget for the execution phase of one cycle
    #[serde(with = "duration_human")]
    pub execution_timeout: Duration,

    /// How long an interrupted callback gets to observe cancellation
    #[serde(with = "duration_human")]
    pub cancel_grace: Duration,

    /// Output size ceiling reported through the attempt reporter
    pub max_output_bytes: Option<u64>,

    pub protection_mode: ProtectionMode,
    pub correction_strategy: CorrectionStrategy,

    /// Confirm APPROVE_WITH_WARNING through the human channel
    pub confirm_warnings: bool,

    /// Bounded submission queue size of the protection service
    pub queue_capacity: usize,

    /// Maximum number of events kept by the in-memory audit log
    pub audit_retention: Option<usize>,

    /// Circuit breaker around the human channel
    pub channel_breaker: BreakerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            escalation_timeout: Duration::from_secs(5 * 60),
            execution_timeout: Duration::from_secs(10 * 60),
            cancel_grace: Duration::from_secs(5),
            max_output_bytes: None,
            protection_mode: ProtectionMode::AlwaysOn,
            correction_strategy: CorrectionStrategy::RejectOnly,
            confirm_warnings: false,
            queue_capacity: 64,
            audit_retention: None,
            channel_breaker: BreakerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a runtime config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a runtime config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a runtime config from a file; `.json` files are read as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        if let Some(policy) = value.get("policy") {
            validate_policy_schema(policy).map_err(|errors| {
                ConfigError::SchemaError(errors.into_iter().map(|e| format!("policy: {}", e)).collect())
            })?;
        }
        let config: RuntimeConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate()?;

        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.execution_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "execution_timeout must be positive".to_string(),
            ));
        }
        if self.audit_retention == Some(0) {
            return Err(ConfigError::ValidationError(
                "audit_retention must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serde adapter for durations written as human-readable strings ("5m", "30s").
pub(crate) mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.escalation_timeout, Duration::from_secs(300));
        assert_eq!(config.policy.max_attempts, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let config = RuntimeConfig::from_yaml(
            r#"
policy:
  mode: soft
  max_attempts: 3
escalation_timeout: 30s
cancel_grace: 250ms
protection_mode: on_demand
correction_strategy: suggest_and_wait
audit_retention: 100
"#,
        )
        .unwrap();

        assert_eq!(config.policy.max_attempts, 3);
        assert_eq!(config.escalation_timeout, Duration::from_secs(30));
        assert_eq!(config.cancel_grace, Duration::from_millis(250));
        assert_eq!(config.protection_mode, ProtectionMode::OnDemand);
        assert_eq!(config.correction_strategy, CorrectionStrategy::SuggestAndWait);
        assert_eq!(config.execution_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_policy_section_is_schema_checked() {
        let result = RuntimeConfig::from_yaml("policy:\n  max_atempts: 3\n");
        assert!(matches!(result, Err(ConfigError::SchemaError(_))));
    }

    #[test]
    fn test_unknown_runtime_key_rejected() {
        let result = RuntimeConfig::from_yaml("escalation_timout: 30s\n");
        assert!(matches!(result, Err(ConfigError::JsonError(_))));
    }

    #[test]
    fn test_bad_duration_rejected() {
        assert!(RuntimeConfig::from_yaml("escalation_timeout: soon\n").is_err());
    }

    #[test]
    fn test_zero_queue_rejected() {
        let result = RuntimeConfig::from_yaml("queue_capacity: 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_json_roundtrip_keeps_durations_readable() {
        let json = serde_json::to_value(RuntimeConfig::default()).unwrap();
        assert_eq!(json["escalation_timeout"], "5m");
        assert_eq!(json["cancel_grace"], "5s");
    }
}
