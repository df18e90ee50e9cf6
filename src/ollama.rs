//! Local Ollama service adapter.
//!
//! Talks to `POST {base_url}/api/generate` with streaming disabled. Unlike the
//! hosted providers, Ollama is cheap to ask twice, so the context probe is a
//! real model call that returns the commands it wants run.

use crate::error::ProviderError;
use crate::http_client::HttpClient;
use crate::providers::{AdapterSettings, ContextRequest, LlmProvider, insert_optional, snippet};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TEMPERATURE: f64 = 0.1;

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct ProbeReply {
    #[serde(default)]
    needs_context: bool,
    #[serde(default)]
    commands: Vec<String>,
}

pub struct OllamaProvider {
    http: Arc<dyn HttpClient>,
    base_url: String,
    model: String,
    temperature: Option<f64>,
    top_p: Option<f64>,
    top_k: Option<u64>,
    num_ctx: Option<u64>,
    seed: Option<u64>,
}

impl OllamaProvider {
    pub fn new(settings: &AdapterSettings, http: Arc<dyn HttpClient>) -> Result<Self, ProviderError> {
        Ok(Self {
            http,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: settings.model.clone(),
            temperature: settings.f64_option("temperature")?,
            top_p: settings.f64_option("top_p")?,
            top_k: settings.u64_option("top_k")?,
            num_ctx: settings.u64_option("num_ctx")?,
            seed: settings.u64_option("seed")?,
        })
    }

    fn request_body(&self, prompt: &str, temperature_override: Option<f64>) -> Value {
        let mut options = Map::new();
        insert_optional(&mut options, "temperature", temperature_override.or(self.temperature));
        insert_optional(&mut options, "top_p", self.top_p);
        insert_optional(&mut options, "top_k", self.top_k);
        insert_optional(&mut options, "num_ctx", self.num_ctx);
        insert_optional(&mut options, "seed", self.seed);

        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }
        body
    }

    async fn request(&self, prompt: &str, temperature_override: Option<f64>) -> Result<String, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = self.request_body(prompt, temperature_override);

        let response = self
            .http
            .post_json(&url, &[("Content-Type", "application/json")], &body, REQUEST_TIMEOUT)
            .await
            .map_err(|e| ProviderError::request("ollama", format!("connection error: {e}")))?;

        if !response.is_success() {
            return Err(ProviderError::request(
                "ollama",
                format!("HTTP {} - {}", response.status, snippet(&response.body)),
            ));
        }

        let parsed: GenerateResponse = serde_json::from_str(&response.body)
            .map_err(|e| ProviderError::request("ollama", format!("unexpected response: {e}")))?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn needs_context(&self, query: &str) -> Result<ContextRequest, ProviderError> {
        let check_prompt = format!(
            r#"Analyze this user request for terminal commands:
"{query}"

Determine if we need extra context to generate accurate commands.
Reply with JSON in this format:
{{
    "needs_context": true/false,
    "commands": ["list", "of", "commands", "to", "run"]
}}

Common context commands include: pwd, ls, uname -a, git status, etc.
Only request context if truly needed for the specific task."#
        );

        let reply = self.request(&check_prompt, Some(PROBE_TEMPERATURE)).await?;
        debug!("Ollama context probe reply: {}", reply);

        match serde_json::from_str::<ProbeReply>(reply.trim()) {
            Ok(probe) if probe.needs_context => Ok(ContextRequest::commands(probe.commands)),
            Ok(_) => Ok(ContextRequest::none()),
            Err(e) => {
                warn!("Could not parse Ollama context probe, assuming no context: {}", e);
                Ok(ContextRequest::none())
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.request(prompt, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpResponse;
    use crate::http_client::tests::MockHttpClient;

    fn settings(options: Value) -> AdapterSettings {
        AdapterSettings {
            provider: "ollama".into(),
            model: "llama3.1".into(),
            api_key: None,
            base_url: Some("http://gpu-box:11434/".into()),
            options: options.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn test_generate_posts_to_api_generate() {
        let http = Arc::new(MockHttpClient::new(200, r#"{"response": "{\"suggestions\": []}"}"#));
        let provider =
            OllamaProvider::new(&settings(json!({"temperature": 0.4, "num_ctx": 4096})), http.clone()).unwrap();

        let reply = provider.generate("hello").await.unwrap();

        assert_eq!(reply, r#"{"suggestions": []}"#);
        let request = http.last_request();
        assert_eq!(request.url, "http://gpu-box:11434/api/generate");
        assert_eq!(request.body["model"], "llama3.1");
        assert_eq!(request.body["stream"], false);
        assert_eq!(request.body["options"]["temperature"], 0.4);
        assert_eq!(request.body["options"]["num_ctx"], 4096);
    }

    #[tokio::test]
    async fn test_no_options_omits_options_object() {
        let http = Arc::new(MockHttpClient::new(200, r#"{"response": "ok"}"#));
        let provider = OllamaProvider::new(&settings(Value::Null), http.clone()).unwrap();
        provider.generate("hello").await.unwrap();
        assert!(http.last_request().body.get("options").is_none());
    }

    #[tokio::test]
    async fn test_http_error_becomes_request_error() {
        let http = Arc::new(MockHttpClient::new(500, "model not found"));
        let provider = OllamaProvider::new(&settings(Value::Null), http).unwrap();
        let err = provider.generate("hello").await.unwrap_err();
        assert!(matches!(err, ProviderError::Request { .. }));
        assert!(err.to_string().contains("model not found"));
    }

    #[tokio::test]
    async fn test_connection_failure_becomes_request_error() {
        let http = Arc::new(MockHttpClient::failing("connection refused"));
        let provider = OllamaProvider::new(&settings(Value::Null), http).unwrap();
        let err = provider.needs_context("list files").await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_probe_returns_requested_commands() {
        let inner = r#"{"needs_context": true, "commands": ["pwd", "git status"]}"#;
        let body = json!({ "response": inner }).to_string();
        let http = Arc::new(MockHttpClient::with_responses(vec![Ok(HttpResponse { status: 200, body })]));
        let provider = OllamaProvider::new(&settings(Value::Null), http.clone()).unwrap();

        let probe = provider.needs_context("what branch am I on").await.unwrap();

        assert_eq!(probe, ContextRequest::commands(["pwd", "git status"]));
        assert_eq!(http.last_request().body["options"]["temperature"], PROBE_TEMPERATURE);
    }

    #[tokio::test]
    async fn test_unparseable_probe_means_no_context() {
        let http = Arc::new(MockHttpClient::new(200, r#"{"response": "sure, run ls"}"#));
        let provider = OllamaProvider::new(&settings(Value::Null), http).unwrap();
        assert_eq!(provider.needs_context("x").await.unwrap(), ContextRequest::none());
    }

    #[test]
    fn test_bad_option_type_fails_construction() {
        let http = Arc::new(MockHttpClient::new(200, "{}"));
        let result = OllamaProvider::new(&settings(json!({"num_ctx": "big"})), http);
        assert!(matches!(result, Err(ProviderError::Construction { .. })));
    }
}
