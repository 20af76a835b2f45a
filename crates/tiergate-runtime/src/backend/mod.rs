//! Backend abstractions for tiergate-runtime.
//!
//! A backend is whatever answers a prompt for one tier: a language model
//! API, a search index, a canned response. The router only needs two
//! capabilities from it, [`Backend::query`] and [`Backend::health_check`].
//!
//! Backends are built from configuration through the [`BackendRegistry`];
//! `static` is always available, `http` requires the `http` feature.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

mod factory;
mod fixed;
mod http;
pub mod secrets;

pub use factory::{BackendFactory, BackendRegistry};
pub use fixed::{StaticBackend, StaticBackendFactory};
pub use http::{HttpBackend, HttpBackendFactory};
pub use secrets::{ApiCredential, CredentialSource};

/// Errors from a single backend call.
///
/// The router treats every variant the same way (the tier failed); the
/// distinction exists for logs and for the error reported when every tier
/// is exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),
}

/// Backend abstraction; one instance serves one tier.
///
/// Implementations must be stateless across calls apart from their static
/// configuration, since many requests call the same backend concurrently.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Answer a prompt.
    async fn query(&self, prompt: &str) -> Result<String, BackendError>;

    /// Best-effort liveness probe. Returns false on any failure.
    async fn health_check(&self) -> bool;

    /// Backend kind for logs (e.g., "http", "static").
    fn kind(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BackendError::Status {
            status: 503,
            message: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "Backend returned 503: overloaded");

        let err = BackendError::Timeout(Duration::from_secs(2));
        assert_eq!(err.to_string(), "Timeout after 2s");
    }
}
