//! HTTP client abstraction for provider APIs.
//!
//! Provider adapters only ever POST a JSON body and read back the status and
//! text, so that is all the trait exposes. Tests inject canned responses
//! through it instead of standing up a server.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Status code and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for HTTP communication with external APIs.
///
/// # Example
///
/// ```ignore
/// use aiterm::http_client::{HttpClient, ReqwestHttpClient};
///
/// let client = ReqwestHttpClient::new();
/// let response = client.post_json(
///     "http://localhost:11434/api/generate",
///     &[("Content-Type", "application/json")],
///     &serde_json::json!({"model": "llama3.1", "prompt": "hi", "stream": false}),
///     std::time::Duration::from_secs(30),
/// ).await?;
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails, the timeout elapses, or the
    /// body cannot be read. Non-2xx statuses are not errors here; callers
    /// inspect [`HttpResponse::status`].
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpResponse>;
}

/// HTTP client implementation using reqwest.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let mut request = self.client.post(url).timeout(timeout);

        for (key, value) in headers {
            request = request.header(*key, *value);
        }

        let response = request.json(body).send().await?;
        let status = response.status().as_u16();
        Ok(HttpResponse {
            status,
            body: response.text().await?,
        })
    }
}
