//! Router configuration parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::schema::validate_config_schema;
use crate::breaker::{duration_serde, BreakerConfig, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT};
use crate::preference::{PreferenceRule, TierPreferences};

/// Errors raised while assembling a router. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Tier chain is empty")]
    EmptyChain,

    #[error("Tier '{tier}': failure_threshold must be greater than zero")]
    InvalidThreshold { tier: String },

    #[error("Tier '{tier}': recovery_timeout must be greater than zero")]
    InvalidRecoveryTimeout { tier: String },

    #[error("Tier '{tier}': timeout must be greater than zero")]
    InvalidTimeout { tier: String },

    #[error("Duplicate tier name: {0}")]
    DuplicateTier(String),

    #[error("Preference '{pattern}' names unknown tier '{tier}'")]
    UnknownPreferenceTier { pattern: String, tier: String },

    #[error("Invalid preference pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Configuration does not match schema: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Breaker and timeout settings applied to tiers that do not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDefaults {
    /// Consecutive failures before a tier's circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time an open circuit waits before a recovery trial
    #[serde(default = "default_recovery_timeout", with = "duration_serde")]
    pub recovery_timeout: Duration,

    /// Per-attempt timeout for backend calls
    #[serde(default, with = "duration_serde::option")]
    pub timeout: Option<Duration>,

    /// Admit a single recovery trial at a time
    #[serde(default)]
    pub exclusive_probe: bool,
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_recovery_timeout() -> Duration {
    DEFAULT_RECOVERY_TIMEOUT
}

impl Default for TierDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            timeout: None,
            exclusive_probe: false,
        }
    }
}

/// Which backend serves a tier and how to build it.
///
/// `type` selects the backend factory; every other key is passed to that
/// factory untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Backend type (e.g., "static", "http")
    #[serde(rename = "type")]
    pub kind: String,

    /// Backend-specific settings
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl BackendSpec {
    /// Backend settings as a JSON object.
    pub fn settings_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.settings.clone())
    }
}

/// One tier in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Unique tier name
    pub name: String,

    /// Backend serving this tier
    pub backend: BackendSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration_serde::option"
    )]
    pub recovery_timeout: Option<Duration>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration_serde::option"
    )]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_probe: Option<bool>,
}

impl TierConfig {
    /// Breaker settings for this tier, falling back to `defaults`.
    pub fn breaker_config(&self, defaults: &TierDefaults) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            recovery_timeout: self.recovery_timeout.unwrap_or(defaults.recovery_timeout),
            exclusive_probe: self.exclusive_probe.unwrap_or(defaults.exclusive_probe),
        }
    }

    /// Per-attempt timeout for this tier, falling back to `defaults`.
    pub fn attempt_timeout(&self, defaults: &TierDefaults) -> Option<Duration> {
        self.timeout.or(defaults.timeout)
    }
}

/// A complete tier chain description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Settings shared by all tiers
    #[serde(default)]
    pub defaults: TierDefaults,

    /// Tiers in priority order, most preferred first
    pub tiers: Vec<TierConfig>,

    /// Prompt patterns that reorder tiers per request
    #[serde(default)]
    pub preferences: Vec<PreferenceRule>,
}

impl RouterConfig {
    /// Parse a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse a configuration file, picking the format from its extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            Some("json") => Self::from_json_file(path),
            other => Err(ConfigurationError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Schema-check, deserialize, and validate a parsed document.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigurationError> {
        validate_config_schema(&value).map_err(ConfigurationError::Schema)?;
        let config: RouterConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Tier names in priority order.
    pub fn tier_names(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.name.as_str()).collect()
    }

    /// Compile the configured preference rules.
    pub fn compile_preferences(&self) -> Result<TierPreferences, ConfigurationError> {
        TierPreferences::compile(&self.preferences)
    }

    /// Check the semantic constraints the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.tiers.is_empty() {
            return Err(ConfigurationError::EmptyChain);
        }

        let mut seen = HashSet::new();
        for tier in &self.tiers {
            if !seen.insert(tier.name.as_str()) {
                return Err(ConfigurationError::DuplicateTier(tier.name.clone()));
            }
            tier.breaker_config(&self.defaults).validate(&tier.name)?;
            if tier
                .attempt_timeout(&self.defaults)
                .is_some_and(|t| t.is_zero())
            {
                return Err(ConfigurationError::InvalidTimeout {
                    tier: tier.name.clone(),
                });
            }
        }

        for rule in &self.preferences {
            if let Some(unknown) = rule.order.iter().find(|name| !seen.contains(name.as_str())) {
                return Err(ConfigurationError::UnknownPreferenceTier {
                    pattern: rule.pattern.clone(),
                    tier: unknown.clone(),
                });
            }
        }
        self.compile_preferences()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
defaults:
  failure_threshold: 3
  recovery_timeout: 5m
  timeout: 20s
tiers:
  - name: primary
    backend:
      type: http
      url: "https://llm.internal/query"
    failure_threshold: 5
  - name: secondary
    backend:
      type: http
      url: "https://search.internal/query"
    recovery_timeout: 90
  - name: fallback
    backend:
      type: static
      response: "Service is degraded, please retry later."
    timeout: null
preferences:
  - pattern: "(?i)\\b(price|cost)\\b"
    order: [secondary]
"#;

    #[test]
    fn test_parse_valid_config() {
        let config = RouterConfig::from_yaml(VALID_CONFIG).unwrap();
        assert_eq!(config.tier_names(), vec!["primary", "secondary", "fallback"]);
        assert_eq!(config.defaults.recovery_timeout, Duration::from_secs(300));
        assert_eq!(config.tiers[0].backend.kind, "http");
        assert_eq!(
            config.tiers[0].backend.settings["url"],
            "https://llm.internal/query"
        );
        assert_eq!(config.preferences.len(), 1);
    }

    #[test]
    fn test_tier_overrides_and_defaults() {
        let config = RouterConfig::from_yaml(VALID_CONFIG).unwrap();

        let primary = config.tiers[0].breaker_config(&config.defaults);
        assert_eq!(primary.failure_threshold, 5);
        assert_eq!(primary.recovery_timeout, Duration::from_secs(300));

        let secondary = config.tiers[1].breaker_config(&config.defaults);
        assert_eq!(secondary.failure_threshold, 3);
        assert_eq!(secondary.recovery_timeout, Duration::from_secs(90));

        assert_eq!(
            config.tiers[0].attempt_timeout(&config.defaults),
            Some(Duration::from_secs(20))
        );
    }

    #[test]
    fn test_builtin_defaults() {
        let config = RouterConfig::from_yaml(
            r#"
tiers:
  - name: only
    backend: { type: static }
"#,
        )
        .unwrap();
        let breaker = config.tiers[0].breaker_config(&config.defaults);
        assert_eq!(breaker, BreakerConfig::default());
        assert_eq!(config.tiers[0].attempt_timeout(&config.defaults), None);
    }

    #[test]
    fn test_json_config() {
        let json = r#"{"tiers": [{"name": "a", "backend": {"type": "static"}}]}"#;
        let config = RouterConfig::from_json(json).unwrap();
        assert_eq!(config.tier_names(), vec!["a"]);
    }

    #[test]
    fn test_empty_chain_rejected() {
        let result = RouterConfig::from_yaml("tiers: []");
        assert!(matches!(result, Err(ConfigurationError::EmptyChain)));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let yaml = r#"
tiers:
  - name: primary
    backend: { type: static }
    failure_threshold: 0
"#;
        assert!(matches!(
            RouterConfig::from_yaml(yaml),
            Err(ConfigurationError::InvalidThreshold { tier }) if tier == "primary"
        ));
    }

    #[test]
    fn test_zero_recovery_timeout_rejected() {
        let yaml = r#"
defaults:
  recovery_timeout: 0
tiers:
  - name: primary
    backend: { type: static }
"#;
        assert!(matches!(
            RouterConfig::from_yaml(yaml),
            Err(ConfigurationError::InvalidRecoveryTimeout { .. })
        ));
    }

    #[test]
    fn test_zero_attempt_timeout_rejected() {
        let yaml = r#"
tiers:
  - name: primary
    backend: { type: static }
    timeout: 0s
"#;
        assert!(matches!(
            RouterConfig::from_yaml(yaml),
            Err(ConfigurationError::InvalidTimeout { .. })
        ));
    }

    #[test]
    fn test_duplicate_tiers_rejected() {
        let yaml = r#"
tiers:
  - name: primary
    backend: { type: static }
  - name: primary
    backend: { type: static }
"#;
        assert!(matches!(
            RouterConfig::from_yaml(yaml),
            Err(ConfigurationError::DuplicateTier(name)) if name == "primary"
        ));
    }

    #[test]
    fn test_unknown_preference_tier_rejected() {
        let yaml = r#"
tiers:
  - name: primary
    backend: { type: static }
preferences:
  - pattern: "weather"
    order: [forecast]
"#;
        assert!(matches!(
            RouterConfig::from_yaml(yaml),
            Err(ConfigurationError::UnknownPreferenceTier { tier, .. }) if tier == "forecast"
        ));
    }

    #[test]
    fn test_schema_violation_reported() {
        let yaml = r#"
tiers:
  - name: primary
    backend: { type: static }
    threshold: 3
"#;
        assert!(matches!(
            RouterConfig::from_yaml(yaml),
            Err(ConfigurationError::Schema(_))
        ));
    }

    #[test]
    fn test_unparseable_duration_rejected() {
        let yaml = r#"
tiers:
  - name: primary
    backend: { type: static }
    recovery_timeout: "eventually"
"#;
        assert!(matches!(
            RouterConfig::from_yaml(yaml),
            Err(ConfigurationError::JsonError(_))
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            RouterConfig::from_path("tiers.toml"),
            Err(ConfigurationError::UnsupportedFormat(ext)) if ext == "toml"
        ));
    }
}
