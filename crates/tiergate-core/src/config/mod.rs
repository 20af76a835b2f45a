//! Router configuration.
//!
//! Tier chains are described declaratively in YAML or JSON, checked against
//! an embedded JSON Schema, then validated for the constraints a schema
//! cannot express (unique names, positive thresholds, known tiers).

mod parser;
mod schema;

pub use parser::{BackendSpec, ConfigurationError, RouterConfig, TierConfig, TierDefaults};
pub use schema::validate_config_schema;
