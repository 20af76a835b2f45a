//! Backend factory pattern for building tiers from configuration.
//!
//! Each backend type registers a factory under its `type` name. The tier
//! chain looks the factory up by the `type` field of a tier's `backend`
//! section and hands it the remaining settings.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = BackendRegistry::with_defaults();
//! let backend = registry.create("static", "fallback", &json!({"response": "busy"}))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{Backend, BackendError};

/// Factory for creating backends from configuration.
pub trait BackendFactory: Send + Sync {
    /// Unique identifier for this backend type (the `type` field in config).
    fn backend_type(&self) -> &'static str;

    /// Create a backend for `tier` from its JSON settings.
    fn create(&self, tier: &str, settings: &JsonValue) -> Result<Arc<dyn Backend>, BackendError>;

    /// Validate settings without creating a backend.
    fn validate_config(&self, settings: &JsonValue) -> Result<(), BackendError>;

    /// Human-readable description of this backend type.
    fn description(&self) -> &'static str {
        "Backend"
    }
}

/// Registry of available backend factories.
#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, Arc<dyn BackendFactory>>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in `static` and `http` backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::StaticBackendFactory));
        registry.register(Arc::new(super::HttpBackendFactory));
        registry
    }

    /// Register a backend factory.
    ///
    /// If a factory with the same type already exists, it will be replaced.
    pub fn register(&mut self, factory: Arc<dyn BackendFactory>) {
        self.factories
            .insert(factory.backend_type().to_string(), factory);
    }

    /// Create a backend for `tier` from type name and settings.
    pub fn create(
        &self,
        backend_type: &str,
        tier: &str,
        settings: &JsonValue,
    ) -> Result<Arc<dyn Backend>, BackendError> {
        self.factory(backend_type)?.create(tier, settings)
    }

    /// Validate settings for a backend type.
    pub fn validate(&self, backend_type: &str, settings: &JsonValue) -> Result<(), BackendError> {
        self.factory(backend_type)?.validate_config(settings)
    }

    /// List available backend types.
    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Check if a backend type is registered.
    pub fn has_backend(&self, backend_type: &str) -> bool {
        self.factories.contains_key(backend_type)
    }

    /// Description of a registered backend type.
    pub fn description(&self, backend_type: &str) -> Option<&'static str> {
        self.factories.get(backend_type).map(|f| f.description())
    }

    fn factory(&self, backend_type: &str) -> Result<&Arc<dyn BackendFactory>, BackendError> {
        self.factories.get(backend_type).ok_or_else(|| {
            BackendError::NotConfigured(format!(
                "Unknown backend type: '{}'. Available: {:?}",
                backend_type,
                self.available_types()
            ))
        })
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.available_types())
            .finish()
    }
}
