//! Anthropic messages API adapter.

use crate::error::ProviderError;
use crate::http_client::HttpClient;
use crate::providers::{
    AdapterSettings, ContextRequest, LlmProvider, insert_optional, keyword_context_probe, snippet,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Appended to every prompt; the messages API has no JSON output mode.
const JSON_ONLY_SUFFIX: &str = "\n\nIMPORTANT: Respond with valid JSON only.";

pub struct AnthropicProvider {
    http: Arc<dyn HttpClient>,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u64,
    temperature: Option<f64>,
    top_p: Option<f64>,
    top_k: Option<u64>,
}

impl AnthropicProvider {
    pub fn new(settings: &AdapterSettings, http: Arc<dyn HttpClient>) -> Result<Self, ProviderError> {
        Ok(Self {
            http,
            api_key: settings.require_api_key()?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: settings.model.clone(),
            max_tokens: settings.u64_option("max_tokens")?.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: settings.f64_option("temperature")?,
            top_p: settings.f64_option("top_p")?,
            top_k: settings.u64_option("top_k")?,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(self.model));
        body.insert("max_tokens".into(), json!(self.max_tokens));
        body.insert(
            "messages".into(),
            json!([{"role": "user", "content": format!("{prompt}{JSON_ONLY_SUFFIX}")}]),
        );
        insert_optional(&mut body, "temperature", self.temperature);
        insert_optional(&mut body, "top_p", self.top_p);
        insert_optional(&mut body, "top_k", self.top_k);
        Value::Object(body)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn needs_context(&self, query: &str) -> Result<ContextRequest, ProviderError> {
        Ok(keyword_context_probe(query))
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let headers = [
            ("x-api-key", self.api_key.as_str()),
            ("content-type", "application/json"),
            ("anthropic-version", API_VERSION),
        ];

        let response = self
            .http
            .post_json(&url, &headers, &self.request_body(prompt), REQUEST_TIMEOUT)
            .await
            .map_err(|e| ProviderError::request("anthropic", e.to_string()))?;
        debug!("Anthropic API response status {}", response.status);

        if !response.is_success() {
            return Err(ProviderError::request(
                "anthropic",
                format!("HTTP {} - {}", response.status, snippet(&response.body)),
            ));
        }

        let parsed: Value = serde_json::from_str(&response.body)
            .map_err(|e| ProviderError::request("anthropic", format!("unexpected response: {e}")))?;
        parsed
            .get("content")
            .and_then(Value::as_array)
            .and_then(|blocks| blocks.first())
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::request("anthropic", format!("no text content in {}", snippet(&response.body)))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::tests::MockHttpClient;

    const KEY: &str = "sk-ant-REDACTED";

    fn settings(options: Value) -> AdapterSettings {
        AdapterSettings {
            provider: "anthropic".into(),
            model: "claude-3-sonnet-20240229".into(),
            api_key: Some(KEY.into()),
            base_url: None,
            options: options.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn test_generate_sends_headers_and_suffix() {
        let http = Arc::new(MockHttpClient::new(
            200,
            r#"{"content":[{"type":"text","text":"{\"suggestions\":[]}"}]}"#,
        ));
        let provider = AnthropicProvider::new(&settings(Value::Null), http.clone()).unwrap();

        let reply = provider.generate("find big files").await.unwrap();

        assert_eq!(reply, r#"{"suggestions":[]}"#);
        let request = http.last_request();
        assert_eq!(request.url, "https://api.anthropic.com/v1/messages");
        assert!(request.headers.contains(&("x-api-key".into(), KEY.into())));
        assert!(request.headers.contains(&("anthropic-version".into(), API_VERSION.into())));
        assert_eq!(request.body["max_tokens"], DEFAULT_MAX_TOKENS);
        let content = request.body["messages"][0]["content"].as_str().unwrap();
        assert!(content.starts_with("find big files"));
        assert!(content.ends_with("Respond with valid JSON only."));
        assert!(request.body.get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_options_are_forwarded() {
        let http = Arc::new(MockHttpClient::new(200, r#"{"content":[{"text":"x"}]}"#));
        let provider =
            AnthropicProvider::new(&settings(json!({"max_tokens": 256, "top_k": 5})), http.clone()).unwrap();
        provider.generate("p").await.unwrap();
        let body = http.last_request().body;
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["top_k"], 5);
    }

    #[tokio::test]
    async fn test_missing_content_is_request_error() {
        let http = Arc::new(MockHttpClient::new(200, r#"{"type":"error"}"#));
        let provider = AnthropicProvider::new(&settings(Value::Null), http).unwrap();
        assert!(matches!(
            provider.generate("p").await,
            Err(ProviderError::Request { .. })
        ));
    }
}
