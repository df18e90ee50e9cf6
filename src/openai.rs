//! OpenAI chat completions adapter.

use crate::error::ProviderError;
use crate::http_client::HttpClient;
use crate::providers::{
    AdapterSettings, ContextRequest, LlmProvider, insert_optional, keyword_context_probe, snippet,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const SYSTEM_MESSAGE: &str =
    "You are a helpful terminal assistant. Always respond with valid JSON containing command suggestions.";

/// Models known to accept `response_format: json_object`.
const JSON_MODE_MODELS: [&str; 5] = ["gpt-4o", "gpt-4o-mini", "gpt-4", "gpt-4-turbo", "gpt-3.5-turbo"];

pub struct OpenAiProvider {
    http: Arc<dyn HttpClient>,
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
    top_p: Option<f64>,
    frequency_penalty: Option<f64>,
    presence_penalty: Option<f64>,
    seed: Option<u64>,
}

impl OpenAiProvider {
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
            temperature: settings.f64_option("temperature")?,
            max_tokens: settings.u64_option("max_tokens")?,
            top_p: settings.f64_option("top_p")?,
            frequency_penalty: settings.f64_option("frequency_penalty")?,
            presence_penalty: settings.f64_option("presence_penalty")?,
            seed: settings.u64_option("seed")?,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(self.model));
        body.insert(
            "messages".into(),
            json!([
                {"role": "system", "content": SYSTEM_MESSAGE},
                {"role": "user", "content": prompt}
            ]),
        );
        insert_optional(&mut body, "temperature", self.temperature);
        insert_optional(&mut body, "max_tokens", self.max_tokens);
        insert_optional(&mut body, "top_p", self.top_p);
        insert_optional(&mut body, "frequency_penalty", self.frequency_penalty);
        insert_optional(&mut body, "presence_penalty", self.presence_penalty);
        insert_optional(&mut body, "seed", self.seed);

        if JSON_MODE_MODELS.contains(&self.model.as_str()) {
            body.insert("response_format".into(), json!({"type": "json_object"}));
        }
        Value::Object(body)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn needs_context(&self, query: &str) -> Result<ContextRequest, ProviderError> {
        Ok(keyword_context_probe(query))
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let authorization = format!("Bearer {}", self.api_key);
        let headers = [
            ("Authorization", authorization.as_str()),
            ("Content-Type", "application/json"),
        ];

        let response = self
            .http
            .post_json(&url, &headers, &self.request_body(prompt), REQUEST_TIMEOUT)
            .await
            .map_err(|e| ProviderError::request("openai", e.to_string()))?;

        if !response.is_success() {
            return Err(ProviderError::request(
                "openai",
                format!("HTTP {} - {}", response.status, snippet(&response.body)),
            ));
        }

        let parsed: Value = serde_json::from_str(&response.body)
            .map_err(|e| ProviderError::request("openai", format!("unexpected response: {e}")))?;
        parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::request("openai", format!("no message content in {}", snippet(&response.body)))
            })
    }
}
