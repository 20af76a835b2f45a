//! JSON Schema validation for router configuration.
//!
//! Configuration documents are checked structurally against
//! `schema/router.schema.json` before they are deserialized, so typos in
//! field names are reported with their location instead of being ignored.

use std::sync::OnceLock;

/// Embedded router schema (loaded at compile time).
const ROUTER_SCHEMA_JSON: &str = include_str!("../../schema/router.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, String> {
    COMPILED_SCHEMA
        .get_or_init(|| {
            let schema_value: serde_json::Value = serde_json::from_str(ROUTER_SCHEMA_JSON)
                .map_err(|e| format!("Invalid schema JSON: {}", e))?;

            jsonschema::options()
                .build(&schema_value)
                .map_err(|e| format!("Failed to compile schema: {}", e))
        })
        .as_ref()
        .map_err(Clone::clone)
}

/// Validate a configuration document against the schema.
///
/// Returns every violation found, each with its instance path.
pub fn validate_config_schema(config_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e])?;

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
