//! Policy configuration parsing and validation.
//!
//! Configuration documents are YAML or JSON, checked against an embedded
//! JSON Schema and then against the semantic rules in [`PolicyConfig::validate`].

mod parser;
mod schema;

pub use parser::{
    ApiConfig, CompletenessConfig, ConfigError, MisconceptionSpec, PolicyConfig,
    SkepticismConfig,
};
pub use schema::validate_policy_schema;
