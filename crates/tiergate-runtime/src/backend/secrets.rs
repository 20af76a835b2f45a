//! Credential handling for remote backends.
//!
//! Credentials are wrapped in [`ApiCredential`] as soon as they are read, so
//! they never show up in `Debug`/`Display` output or in tracing fields.
//!
//! A backend's JSON settings may carry either a literal `api_key` or an
//! `api_key_env` naming the environment variable to read it from:
//!
//! ```json
//! { "type": "http", "url": "https://...", "api_key_env": "PRIMARY_API_KEY" }
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::BackendError;

/// Settings key holding a literal credential.
pub const API_KEY_FIELD: &str = "api_key";

/// Settings key naming the environment variable that holds the credential.
pub const API_KEY_ENV_FIELD: &str = "api_key_env";

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Literal value in the configuration file
    Config,
    /// Environment variable named by the configuration
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Config => "config",
            Self::Environment => "environment",
            Self::Programmatic => "programmatic",
        })
    }
}

/// A backend credential that is redacted everywhere except [`expose`](Self::expose).
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
}

impl ApiCredential {
    /// Wrap a credential value.
    pub fn new(value: impl Into<String>, source: CredentialSource) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
        }
    }

    /// Load the credential described by a backend's settings.
    ///
    /// Returns `Ok(None)` when the settings name no credential at all, and
    /// an error when they name an environment variable that is not set.
    pub fn from_settings(settings: &JsonValue, tier: &str) -> Result<Option<Self>, BackendError> {
        if let Some(value) = settings[API_KEY_FIELD].as_str() {
            return Ok(Some(Self::new(value, CredentialSource::Config)));
        }

        match settings[API_KEY_ENV_FIELD].as_str() {
            Some(env_var) => std::env::var(env_var)
                .map(|v| Some(Self::new(v, CredentialSource::Environment)))
                .map_err(|_| {
                    BackendError::NotConfigured(format!(
                        "tier '{}': environment variable '{}' is not set",
                        tier, env_var
                    ))
                }),
            None => Ok(None),
        }
    }

    /// Raw value, for the request header only.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// True for an empty value, e.g. an env var set to "".
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

const REDACTED: &str = "[REDACTED]";

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiCredential")
            .field(&self.source)
            .field(&REDACTED)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} credential)", REDACTED, self.source)
    }
}
