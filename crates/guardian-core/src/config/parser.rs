//! Policy configuration parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::schema::validate_policy_schema;
use crate::types::{EnforcementMode, Severity};

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Completeness validator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletenessConfig {
    /// Lazy markers per 100 non-empty lines above which the payload is CRITICAL
    pub density_threshold: f64,
}

impl Default for CompletenessConfig {
    fn default() -> Self {
        Self {
            density_threshold: 5.0,
        }
    }
}

/// API-validity validator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// API names that have been hallucinated before
    pub deny_list: Vec<String>,

    /// Modules and symbols known to resolve. Empty disables the resolution check.
    pub known_symbols: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            deny_list: [
                "requests.get_json",
                "os.path.exists_file",
                "json.parse_file",
                "pandas.read_parquet_fast",
                "std::fs::read_file",
                "serde_json::parse",
                "tokio::spawn_async",
                "String::from_utf8_safe",
                "fs.readFileAsync",
                "Array.prototype.flatten_deep",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            known_symbols: Vec::new(),
        }
    }
}

/// An additional misconception catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MisconceptionSpec {
    pub id: String,
    pub pattern: String,
    pub severity: Severity,
    pub message: String,
}

/// Skepticism validator settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SkepticismConfig {
    pub extra: Vec<MisconceptionSpec>,
}

/// Policy configuration shared by the classifier and the validators.
///
/// Every list replaces its default wholesale when it is present in a
/// configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    pub mode: EnforcementMode,

    /// Attempt ceiling for one action (at least 1)
    pub max_attempts: u32,

    /// Glob patterns matched against the file name and the full path
    pub critical_file_patterns: Vec<String>,

    /// File extensions, without the leading dot
    pub protected_extensions: Vec<String>,

    /// Path prefixes of system directories
    pub system_paths: Vec<String>,

    /// Path prefixes under an external reversibility mechanism (e.g. version control)
    pub tracked_roots: Vec<String>,

    pub completeness: CompletenessConfig,
    pub api: ApiConfig,
    pub skepticism: SkepticismConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: EnforcementMode::Strict,
            max_attempts: 2,
            critical_file_patterns: [
                ".env",
                ".env.*",
                "*.pem",
                "*.key",
                "id_rsa*",
                "id_ed25519*",
                "credentials*",
                "secrets.*",
                ".npmrc",
                ".pypirc",
                ".netrc",
                "*.tfstate",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            protected_extensions: ["pem", "key", "p12", "pfx", "jks", "keystore", "kdbx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            system_paths: [
                "/etc", "/usr", "/bin", "/sbin", "/boot", "/lib", "/lib64", "/sys", "/proc",
                "/dev", "/var/lib", "/System", "/Library", "C:/Windows", "C:/Program Files",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            tracked_roots: Vec::new(),
            completeness: CompletenessConfig::default(),
            api: ApiConfig::default(),
            skepticism: SkepticismConfig::default(),
        }
    }
}

impl PolicyConfig {
    /// Parse a policy config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a policy config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a policy config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a policy config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Schema-check, deserialize and validate an already parsed document.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        validate_policy_schema(&value).map_err(ConfigError::SchemaError)?;
        let config: PolicyConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the semantic invariants the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if !(self.completeness.density_threshold > 0.0) {
            return Err(ConfigError::ValidationError(
                "completeness.density_threshold must be positive".to_string(),
            ));
        }

        for pattern in &self.critical_file_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "critical_file_patterns: '{}' is not a valid glob: {}",
                    pattern, e
                ))
            })?;
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.skepticism.extra {
            if !seen.insert(&entry.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate misconception id: {}",
                    entry.id
                )));
            }
            regex::Regex::new(&entry.pattern).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "skepticism.extra[{}]: invalid pattern: {}",
                    entry.id, e
                ))
            })?;
        }

        Ok(())
    }
}
