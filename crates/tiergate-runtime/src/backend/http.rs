//! HTTP JSON backend.
//!
//! POSTs `{"prompt": "..."}` to a configured URL and reads the answer from a
//! string field of the JSON reply. Requires the `http` feature; without it
//! the backend can still be configured but every query fails with
//! `NotConfigured`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

use super::{secrets::ApiCredential, Backend, BackendError, BackendFactory};

/// Reply field holding the answer, unless configured otherwise.
pub const DEFAULT_RESPONSE_FIELD: &str = "response";

/// Client-level request timeout, unless configured otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for health probes.
#[cfg_attr(not(feature = "http"), allow(dead_code))]
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on error body text kept in `BackendError::Status`.
#[cfg_attr(not(feature = "http"), allow(dead_code))]
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
#[cfg_attr(not(feature = "http"), allow(dead_code))]
struct QueryRequest<'a> {
    prompt: &'a str,
}

/// Backend calling a JSON-over-HTTP endpoint.
pub struct HttpBackend {
    url: String,
    health_url: Option<String>,
    response_field: String,
    credential: Option<ApiCredential>,
    request_timeout: Duration,
    #[cfg(feature = "http")]
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("url", &self.url)
            .field("health_url", &self.health_url)
            .field("response_field", &self.response_field)
            .field("credential", &self.credential)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl HttpBackend {
    /// Create a backend for `url` with the given client timeout.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, BackendError> {
        Ok(Self {
            url: url.into(),
            health_url: None,
            response_field: DEFAULT_RESPONSE_FIELD.to_string(),
            credential: None,
            request_timeout,
            #[cfg(feature = "http")]
            client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .map_err(|e| BackendError::HttpError(e.to_string()))?,
        })
    }

    /// Build from a tier's backend settings.
    pub fn from_settings(tier: &str, settings: &JsonValue) -> Result<Self, BackendError> {
        let url = settings["url"].as_str().ok_or_else(|| {
            BackendError::NotConfigured(format!("tier '{}': http backend requires 'url'", tier))
        })?;
        let request_timeout = settings["request_timeout_secs"]
            .as_u64()
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let mut backend = Self::new(url, request_timeout)?;
        if let Some(health_url) = settings["health_url"].as_str() {
            backend = backend.with_health_url(health_url);
        }
        if let Some(field) = settings["response_field"].as_str() {
            backend = backend.with_response_field(field);
        }
        if let Some(credential) = ApiCredential::from_settings(settings, tier)? {
            backend = backend.with_credential(credential);
        }
        Ok(backend)
    }

    /// Probe this URL with GET in `health_check`.
    pub fn with_health_url(mut self, url: impl Into<String>) -> Self {
        self.health_url = Some(url.into());
        self
    }

    /// Read the answer from this reply field.
    pub fn with_response_field(mut self, field: impl Into<String>) -> Self {
        self.response_field = field.into();
        self
    }

    /// Send this credential as a bearer token.
    pub fn with_credential(mut self, credential: ApiCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Endpoint this backend posts to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Pull the answer string out of a JSON reply.
fn extract_answer(body: &JsonValue, field: &str) -> Result<String, BackendError> {
    match body.get(field) {
        Some(JsonValue::String(answer)) => Ok(answer.clone()),
        Some(other) => Err(BackendError::Malformed(format!(
            "field '{}' is not a string: {}",
            field, other
        ))),
        None => Err(BackendError::Malformed(format!(
            "reply has no '{}' field",
            field
        ))),
    }
}

#[cfg_attr(not(feature = "http"), allow(dead_code))]
fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[async_trait]
impl Backend for HttpBackend {
    #[cfg(feature = "http")]
    async fn query(&self, prompt: &str) -> Result<String, BackendError> {
        let mut request = self.client.post(&self.url).json(&QueryRequest { prompt });

        // Only expose the credential here, at the point of use
        if let Some(credential) = &self.credential {
            request = request.bearer_auth(credential.expose());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(self.request_timeout)
            } else {
                BackendError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: truncate_body(message),
            });
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        extract_answer(&body, &self.response_field)
    }

    #[cfg(not(feature = "http"))]
    async fn query(&self, _prompt: &str) -> Result<String, BackendError> {
        Err(BackendError::NotConfigured(
            "http backend requires the 'http' feature".to_string(),
        ))
    }

    #[cfg(feature = "http")]
    async fn health_check(&self) -> bool {
        match &self.health_url {
            Some(url) => match self
                .client
                .get(url)
                .timeout(HEALTH_CHECK_TIMEOUT)
                .send()
                .await
            {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "Health probe failed");
                    false
                }
            },
            // Without a probe URL, report whether the backend is usable at all
            None => self.credential.as_ref().map_or(true, |c| !c.is_empty()),
        }
    }

    #[cfg(not(feature = "http"))]
    async fn health_check(&self) -> bool {
        false
    }

    fn kind(&self) -> &str {
        "http"
    }
}

/// Factory for `type: http` backends.
///
/// ## Configuration Format
/// ```json
/// {
///   "url": "https://llm.internal/query",    // Required
///   "health_url": "https://llm.internal/up", // Optional GET probe
///   "response_field": "response",            // Optional, reply field with the answer
///   "request_timeout_secs": 30,              // Optional client timeout
///   "api_key": "...",                        // Optional literal bearer token
///   "api_key_env": "PRIMARY_API_KEY"         // Optional env var holding the token
/// }
/// ```
pub struct HttpBackendFactory;

fn check_url(settings: &JsonValue, key: &str, required: bool) -> Result<(), BackendError> {
    match settings.get(key) {
        None if required => Err(BackendError::NotConfigured(format!(
            "http backend requires '{}'",
            key
        ))),
        None => Ok(()),
        Some(JsonValue::String(url))
            if url.starts_with("http://") || url.starts_with("https://") =>
        {
            Ok(())
        }
        Some(_) => Err(BackendError::NotConfigured(format!(
            "'{}' must start with http:// or https://",
            key
        ))),
    }
}

impl BackendFactory for HttpBackendFactory {
    fn backend_type(&self) -> &'static str {
        "http"
    }

    fn create(&self, tier: &str, settings: &JsonValue) -> Result<Arc<dyn Backend>, BackendError> {
        self.validate_config(settings)?;
        Ok(Arc::new(HttpBackend::from_settings(tier, settings)?))
    }

    fn validate_config(&self, settings: &JsonValue) -> Result<(), BackendError> {
        check_url(settings, "url", true)?;
        check_url(settings, "health_url", false)?;

        if settings.get("response_field").is_some_and(|v| !v.is_string()) {
            return Err(BackendError::NotConfigured(
                "'response_field' must be a string".to_string(),
            ));
        }
        if settings
            .get("request_timeout_secs")
            .is_some_and(|v| v.as_u64().map_or(true, |secs| secs == 0))
        {
            return Err(BackendError::NotConfigured(
                "'request_timeout_secs' must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "JSON over HTTP endpoint"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_answer() {
        let body = serde_json::json!({ "response": "42", "backend": "llm" });
        assert_eq!(extract_answer(&body, "response").unwrap(), "42");

        assert!(matches!(
            extract_answer(&body, "answer"),
            Err(BackendError::Malformed(_))
        ));

        let body = serde_json::json!({ "response": { "text": "nested" } });
        assert!(matches!(
            extract_answer(&body, "response"),
            Err(BackendError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let long = "é".repeat(MAX_ERROR_BODY);
        let cut = truncate_body(long);
        assert!(cut.len() <= MAX_ERROR_BODY);
        assert!(cut.chars().all(|c| c == 'é'));

        assert_eq!(truncate_body("short".to_string()), "short");
    }

    #[test]
    fn test_from_settings() {
        let settings = serde_json::json!({
            "url": "https://llm.internal/query",
            "health_url": "https://llm.internal/up",
            "response_field": "answer",
            "api_key": "sk-test",
            "request_timeout_secs": 5
        });
        let backend = HttpBackend::from_settings("primary", &settings).unwrap();
        assert_eq!(backend.url(), "https://llm.internal/query");
        assert_eq!(backend.response_field, "answer");
        assert_eq!(backend.request_timeout, Duration::from_secs(5));
        assert!(backend.credential.is_some());

        let debug = format!("{:?}", backend);
        assert!(!debug.contains("sk-test"));
    }

    #[test]
    fn test_factory_validation() {
        let factory = HttpBackendFactory;
        assert!(factory
            .validate_config(&serde_json::json!({ "url": "https://x" }))
            .is_ok());
        assert!(factory.validate_config(&serde_json::json!({})).is_err());
        assert!(factory
            .validate_config(&serde_json::json!({ "url": "ftp://x" }))
            .is_err());
        assert!(factory
            .validate_config(&serde_json::json!({ "url": "https://x", "health_url": 7 }))
            .is_err());
        assert!(factory
            .validate_config(&serde_json::json!({ "url": "https://x", "request_timeout_secs": 0 }))
            .is_err());
    }

    #[cfg(feature = "http")]
    mod wire {
        use super::*;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        /// Serve every connection with the same canned reply, after `delay`.
        async fn serve(status: &'static str, body: &'static str, delay: Duration) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                loop {
                    let Ok((mut socket, _)) = listener.accept().await else {
                        return;
                    };
                    tokio::spawn(async move {
                        read_request(&mut socket).await;
                        tokio::time::sleep(delay).await;
                        let reply = format!(
                            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                            status,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(reply.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
            });
            format!("http://{}", addr)
        }

        /// Drain headers and a content-length body.
        async fn read_request(socket: &mut tokio::net::TcpStream) {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    return;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length {
                        return;
                    }
                }
            }
        }

        async fn backend_for(status: &'static str, body: &'static str) -> HttpBackend {
            let url = serve(status, body, Duration::ZERO).await;
            HttpBackend::new(format!("{}/query", url), DEFAULT_REQUEST_TIMEOUT).unwrap()
        }

        #[tokio::test]
        async fn test_query_reads_response_field() {
            let backend = backend_for("200 OK", r#"{"response": "42"}"#).await;
            assert_eq!(backend.query("meaning of life").await.unwrap(), "42");
        }

        #[tokio::test]
        async fn test_non_success_status() {
            let backend = backend_for("503 Service Unavailable", r#"{"error": "overloaded"}"#).await;
            match backend.query("hi").await {
                Err(BackendError::Status { status, message }) => {
                    assert_eq!(status, 503);
                    assert!(message.contains("overloaded"));
                }
                other => panic!("expected Status, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_missing_response_field() {
            let backend = backend_for("200 OK", r#"{"answer": "42"}"#).await;
            assert!(matches!(
                backend.query("hi").await,
                Err(BackendError::Malformed(_))
            ));

            let backend = backend_for("200 OK", r#"{"answer": "42"}"#)
                .await
                .with_response_field("answer");
            assert_eq!(backend.query("hi").await.unwrap(), "42");
        }

        #[tokio::test]
        async fn test_non_json_body() {
            let backend = backend_for("200 OK", "<html>gateway</html>").await;
            assert!(matches!(
                backend.query("hi").await,
                Err(BackendError::Malformed(_))
            ));
        }

        #[tokio::test]
        async fn test_request_timeout() {
            let url = serve("200 OK", r#"{"response": "late"}"#, Duration::from_secs(5)).await;
            let backend = HttpBackend::new(url, Duration::from_millis(200)).unwrap();
            assert_eq!(
                backend.query("hi").await,
                Err(BackendError::Timeout(Duration::from_millis(200)))
            );
        }

        #[tokio::test]
        async fn test_health_check_uses_health_url() {
            let up = serve("200 OK", "{}", Duration::ZERO).await;
            let down = serve("500 Internal Server Error", "{}", Duration::ZERO).await;

            let backend = HttpBackend::new(up.clone(), DEFAULT_REQUEST_TIMEOUT)
                .unwrap()
                .with_health_url(format!("{}/healthz", up));
            assert!(backend.health_check().await);

            let backend = HttpBackend::new(down.clone(), DEFAULT_REQUEST_TIMEOUT)
                .unwrap()
                .with_health_url(format!("{}/healthz", down));
            assert!(!backend.health_check().await);
        }
    }

    #[cfg(not(feature = "http"))]
    #[tokio::test]
    async fn test_query_without_feature() {
        let backend = HttpBackend::new("http://localhost", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert!(matches!(
            backend.query("hi").await,
            Err(BackendError::NotConfigured(_))
        ));
        assert!(!backend.health_check().await);
    }
}
