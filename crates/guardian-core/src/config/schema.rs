//! JSON Schema validation for policy configuration.
//!
//! Configuration documents are validated against
//! schema/policy-config.schema.json before they are deserialized, so a
//! misspelled key fails loudly instead of silently falling back to a default.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded policy configuration schema (loaded at compile time).
const POLICY_SCHEMA_JSON: &str = include_str!("../../../../schema/policy-config.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(POLICY_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        match jsonschema::options().build(&schema_value) {
            Ok(v) => Ok(v),
            Err(e) => Err(format!("Failed to compile schema: {}", e)),
        }
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// Validate a policy configuration document against the schema.
///
/// Returns every validation error, each suffixed with its instance path.
pub fn validate_policy_schema(config_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(config_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_valid() {
        assert!(validate_policy_schema(&serde_json::json!({})).is_ok());
    }

    #[test]
    fn test_full_document_is_valid() {
        let value = serde_json::json!({
            "mode": "soft",
            "max_attempts": 3,
            "critical_file_patterns": [".env", "*.pem"],
            "protected_extensions": ["key"],
            "system_paths": ["/etc"],
            "tracked_roots": ["/project"],
            "completeness": { "density_threshold": 2.5 },
            "api": { "deny_list": ["requests.get_json"], "known_symbols": ["serde"] },
            "skepticism": {
                "extra": [{
                    "id": "no_sleep_sync",
                    "pattern": "Thread\\.sleep",
                    "severity": "MEDIUM",
                    "message": "Sleeping is not synchronization"
                }]
            }
        });
        assert!(validate_policy_schema(&value).is_ok());
    }

    #[test]
    fn test_zero_attempts_fails() {
        let result = validate_policy_schema(&serde_json::json!({ "max_attempts": 0 }));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_key_fails() {
        let result = validate_policy_schema(&serde_json::json!({ "max_atempts": 2 }));
        let errors = result.unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_unknown_mode_fails() {
        assert!(validate_policy_schema(&serde_json::json!({ "mode": "lenient" })).is_err());
    }

    #[test]
    fn test_bad_severity_fails() {
        let value = serde_json::json!({
            "skepticism": {
                "extra": [{ "id": "x", "pattern": "y", "severity": "severe", "message": "z" }]
            }
        });
        assert!(validate_policy_schema(&value).is_err());
    }
}
