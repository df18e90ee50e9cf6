//! Provider capability shared by every language-model backend.
//!
//! A provider answers two questions: does it want extra system context before
//! suggesting commands, and what is its raw reply to a prompt. Concrete
//! backends live in [`crate::ollama`], [`crate::openai`] and
//! [`crate::anthropic`]; [`TestProvider`] is a deterministic stand-in used by
//! the `test` provider profile and in tests.

use crate::error::ProviderError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

/// Placeholder credential handed to providers that need none.
pub const NO_CREDENTIAL_REQUIRED: &str = "not-required";

/// A provider's answer to "do you need context for this query?".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextRequest {
    pub needed: bool,
    pub commands: Vec<String>,
}

impl ContextRequest {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn commands<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            needed: true,
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }
}

/// Capability every backend satisfies.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name, e.g. `"openai"`.
    fn name(&self) -> &str;

    /// Asks whether context commands should run before the main request.
    async fn needs_context(&self, query: &str) -> Result<ContextRequest, ProviderError>;

    /// Sends a fully assembled prompt and returns the raw reply text.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Merged configuration handed to a provider constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSettings {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Remaining custom options (temperature, max_tokens, ...).
    pub options: Map<String, Value>,
}

impl AdapterSettings {
    /// Reads a numeric option, rejecting values of the wrong type.
    pub fn f64_option(&self, key: &str) -> Result<Option<f64>, ProviderError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_f64().map(Some).ok_or_else(|| {
                ProviderError::construction(&self.provider, format!("option '{key}' must be a number"))
            }),
        }
    }

    /// Reads a non-negative integer option, rejecting values of the wrong type.
    pub fn u64_option(&self, key: &str) -> Result<Option<u64>, ProviderError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                ProviderError::construction(
                    &self.provider,
                    format!("option '{key}' must be a non-negative integer"),
                )
            }),
        }
    }

    /// The credential, or a construction error if none was resolved.
    pub fn require_api_key(&self) -> Result<String, ProviderError> {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() && key != NO_CREDENTIAL_REQUIRED => Ok(key.to_string()),
            _ => Err(ProviderError::construction(
                &self.provider,
                format!(
                    "no API key found (set {} or api_key in the config file)",
                    env_key_name(&self.provider)
                ),
            )),
        }
    }
}

/// Environment variable consulted for a provider's credential.
pub fn env_key_name(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"))
}

/// Context probe used by hosted providers: a keyword check instead of a
/// second paid round-trip.
pub fn keyword_context_probe(query: &str) -> ContextRequest {
    let lowered = query.to_lowercase();
    let mentions_here = ["current", "this", "here", "show"]
        .iter()
        .any(|word| lowered.contains(word));
    if mentions_here {
        ContextRequest::commands(["pwd", "ls -la"])
    } else {
        ContextRequest::none()
    }
}

/// Sets `key` in `body` when `value` is present.
pub(crate) fn insert_optional<T: Into<Value>>(body: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        body.insert(key.to_string(), value.into());
    }
}

/// Trims a response body for inclusion in an error message.
pub(crate) fn snippet(body: &str) -> String {
    const MAX: usize = 300;
    match body.char_indices().nth(MAX) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

/// Deterministic provider for offline runs and tests.
///
/// Always asks for `pwd` and `ls -la` as context, logs the prompt it
/// receives, and answers with fixed suggestions.
pub struct TestProvider {
    model: String,
}

impl TestProvider {
    pub fn new(settings: &AdapterSettings) -> Self {
        Self {
            model: settings.model.clone(),
        }
    }
}

#[async_trait]
impl LlmProvider for TestProvider {
    fn name(&self) -> &str {
        "test"
    }

    async fn needs_context(&self, query: &str) -> Result<ContextRequest, ProviderError> {
        info!("[test:{}] checking context for: {}", self.model, query);
        Ok(ContextRequest::commands(["pwd", "ls -la"]))
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        info!("[test:{}] received prompt:\n{}", self.model, prompt);

        let lowered = latest_user_text(prompt).to_lowercase();
        let reply = if lowered.contains("python") && (lowered.contains("list") || lowered.contains("find")) {
            serde_json::json!({
                "suggestions": [
                    {"command": "find . -name '*.py' -type f", "description": "Find all Python files recursively"},
                    {"command": "find . -name '*.py' -type f | head -20", "description": "Find Python files (first 20)"},
                    {"command": "ls -la *.py", "description": "List Python files in current directory"}
                ]
            })
        } else {
            serde_json::json!({
                "suggestions": [
                    {"command": "echo 'Test command 1'", "description": "First test command"},
                    {"command": "ls -la", "description": "List all files with details"},
                    {"command": "date", "description": "Show current date and time"}
                ]
            })
        };
        Ok(reply.to_string())
    }
}

/// Text of the last `<user>` section, or the whole prompt if there is none.
fn latest_user_text(prompt: &str) -> &str {
    match prompt.rfind("<user>") {
        Some(start) => {
            let rest = &prompt[start + "<user>".len()..];
            rest.split("</user>").next().unwrap_or(rest).trim()
        }
        None => prompt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(options: Value) -> AdapterSettings {
        AdapterSettings {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            api_key: None,
            base_url: None,
            options: options.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_numeric_options_are_typed() {
        let s = settings(serde_json::json!({"temperature": 0.3, "max_tokens": 512, "top_p": "high"}));
        assert_eq!(s.f64_option("temperature").unwrap(), Some(0.3));
        assert_eq!(s.u64_option("max_tokens").unwrap(), Some(512));
        assert_eq!(s.f64_option("missing").unwrap(), None);
        assert!(matches!(
            s.f64_option("top_p"),
            Err(ProviderError::Construction { .. })
        ));
    }

    #[test]
    fn test_require_api_key_rejects_sentinel() {
        let mut s = settings(Value::Null);
        assert!(s.require_api_key().is_err());
        s.api_key = Some(NO_CREDENTIAL_REQUIRED.into());
        assert!(s.require_api_key().is_err());
        s.api_key = Some("sk-live-abcdefghijklmnopqrstuvwxyz".into());
        assert_eq!(s.require_api_key().unwrap(), "sk-live-abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn test_env_key_name() {
        assert_eq!(env_key_name("openai"), "OPENAI_API_KEY");
        assert_eq!(env_key_name("my-proxy"), "MY_PROXY_API_KEY");
    }

    #[test]
    fn test_keyword_context_probe() {
        let probe = keyword_context_probe("Show me the biggest files HERE");
        assert!(probe.needed);
        assert_eq!(probe.commands, vec!["pwd", "ls -la"]);
        assert_eq!(keyword_context_probe("compress a folder"), ContextRequest::none());
    }

    #[test]
    fn test_snippet_truncates_long_bodies() {
        let long = "x".repeat(1000);
        assert_eq!(snippet(&long).len(), 303);
        assert_eq!(snippet("short"), "short");
    }

    #[tokio::test]
    async fn test_test_provider_is_deterministic() {
        let provider = TestProvider::new(&settings(Value::Null));
        let probe = provider.needs_context("anything").await.unwrap();
        assert_eq!(probe.commands, vec!["pwd", "ls -la"]);

        let python = provider.generate("<user>\nlist all python files\n</user>").await.unwrap();
        assert!(python.contains("find . -name '*.py' -type f"));

        let other = provider
            .generate("<available_commands>\npython3, find\n</available_commands>\n\n<user>\ncheck disk\n</user>")
            .await
            .unwrap();
        assert!(other.contains("echo 'Test command 1'"));
    }
}
