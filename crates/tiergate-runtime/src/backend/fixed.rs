//! Static-response backend.
//!
//! Answers every prompt with a configured template. Typically the last tier
//! in a chain ("service degraded, try again later"), and a convenient stand-in
//! for real backends in demos.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use super::{Backend, BackendError, BackendFactory};

/// Placeholder replaced with the prompt in a response template.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

const DEFAULT_RESPONSE: &str = "The service is temporarily degraded. Please try again later.";

/// Backend that returns a fixed response.
#[derive(Debug, Clone)]
pub struct StaticBackend {
    response: String,
    healthy: bool,
}

impl StaticBackend {
    /// Create a healthy backend answering with `response`.
    ///
    /// Occurrences of `{prompt}` in the template are replaced with the prompt.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            healthy: true,
        }
    }

    /// Mark the backend as down; every query fails with `Unavailable`.
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }
}

#[async_trait]
impl Backend for StaticBackend {
    async fn query(&self, prompt: &str) -> Result<String, BackendError> {
        if !self.healthy {
            return Err(BackendError::Unavailable(
                "static backend is marked unhealthy".to_string(),
            ));
        }
        Ok(self.response.replace(PROMPT_PLACEHOLDER, prompt))
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn kind(&self) -> &str {
        "static"
    }
}

/// Factory for `type: static` backends.
///
/// ## Configuration Format
/// ```json
/// {
///   "response": "Echo: {prompt}",   // Optional, defaults to a degraded-service notice
///   "healthy": true                 // Optional, false makes every query fail
/// }
/// ```
pub struct StaticBackendFactory;

impl BackendFactory for StaticBackendFactory {
    fn backend_type(&self) -> &'static str {
        "static"
    }

    fn create(&self, _tier: &str, settings: &JsonValue) -> Result<Arc<dyn Backend>, BackendError> {
        self.validate_config(settings)?;

        let response = settings["response"].as_str().unwrap_or(DEFAULT_RESPONSE);
        let mut backend = StaticBackend::new(response);
        if !settings["healthy"].as_bool().unwrap_or(true) {
            backend = backend.unhealthy();
        }
        Ok(Arc::new(backend))
    }

    fn validate_config(&self, settings: &JsonValue) -> Result<(), BackendError> {
        if settings.get("response").is_some_and(|v| !v.is_string()) {
            return Err(BackendError::NotConfigured(
                "static backend: 'response' must be a string".to_string(),
            ));
        }
        if settings.get("healthy").is_some_and(|v| !v.is_boolean()) {
            return Err(BackendError::NotConfigured(
                "static backend: 'healthy' must be a boolean".to_string(),
            ));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Fixed response template"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_template_substitution() {
        let backend = StaticBackend::new("You asked: {prompt}");
        assert_eq!(
            backend.query("where is my order?").await.unwrap(),
            "You asked: where is my order?"
        );
        assert!(backend.health_check().await);
    }

    #[tokio::test]
    async fn test_unhealthy_backend_fails() {
        let backend = StaticBackend::new("ok").unhealthy();
        assert!(matches!(
            backend.query("hi").await,
            Err(BackendError::Unavailable(_))
        ));
        assert!(!backend.health_check().await);
    }

    #[tokio::test]
    async fn test_factory_defaults() {
        let backend = StaticBackendFactory
            .create("fallback", &serde_json::json!({}))
            .unwrap();
        assert_eq!(backend.query("x").await.unwrap(), DEFAULT_RESPONSE);
        assert_eq!(backend.kind(), "static");
    }

    #[tokio::test]
    async fn test_factory_unhealthy_flag() {
        let settings = serde_json::json!({ "response": "ok", "healthy": false });
        let backend = StaticBackendFactory.create("fallback", &settings).unwrap();
        assert!(backend.query("x").await.is_err());
    }

    #[test]
    fn test_factory_rejects_bad_types() {
        let factory = StaticBackendFactory;
        assert!(factory
            .validate_config(&serde_json::json!({ "response": 42 }))
            .is_err());
        assert!(factory
            .validate_config(&serde_json::json!({ "healthy": "yes" }))
            .is_err());
    }
}
