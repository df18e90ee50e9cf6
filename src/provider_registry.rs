//! Name-keyed provider constructors and fallback candidate selection.
//!
//! The registry owns the mapping from a provider name (`"openai"`,
//! `"ollama"`, ...) to a constructor. Building an adapter merges the
//! provider profile, the model profile and the environment into one
//! [`AdapterSettings`]. Candidate selection decides which models are worth
//! trying before any network call is made.

use crate::anthropic::AnthropicProvider;
use crate::config::{Config, ModelProfile, ProviderProfile};
use crate::error::{CandidateFailure, ProviderError};
use crate::http_client::HttpClient;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;
use crate::providers::{AdapterSettings, LlmProvider, NO_CREDENTIAL_REQUIRED, TestProvider, env_key_name};
use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Builds a provider from merged settings.
pub type ProviderConstructor =
    Arc<dyn Fn(AdapterSettings) -> Result<Box<dyn LlmProvider>, ProviderError> + Send + Sync>;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

const MIN_CREDENTIAL_LEN: usize = 20;

const PLACEHOLDER_CREDENTIALS: [&str; 11] = [
    "your_api_key_here",
    "your-api-key",
    "sk-...",
    "sk-xxx",
    "test",
    "demo",
    "placeholder",
    "changeme",
    "xxx",
    "none",
    "null",
];

static CREDENTIAL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-.]+$").expect("valid regex"));

struct Registration {
    requires_credential: bool,
    constructor: ProviderConstructor,
}

pub struct ProviderRegistry {
    registrations: IndexMap<String, Registration>,
    env_lookup: EnvLookup,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry that reads credentials from the process
    /// environment.
    pub fn new() -> Self {
        Self {
            registrations: IndexMap::new(),
            env_lookup: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Creates a registry with the built-in `ollama`, `openai`, `anthropic`
    /// and `test` providers, all sharing `http`.
    pub fn with_defaults(http: Arc<dyn HttpClient>) -> Self {
        let mut registry = Self::new();

        let client = http.clone();
        registry.register("ollama", false, move |settings| {
            Ok(Box::new(OllamaProvider::new(&settings, client.clone())?) as Box<dyn LlmProvider>)
        });
        let client = http.clone();
        registry.register("openai", true, move |settings| {
            Ok(Box::new(OpenAiProvider::new(&settings, client.clone())?) as Box<dyn LlmProvider>)
        });
        let client = http;
        registry.register("anthropic", true, move |settings| {
            Ok(Box::new(AnthropicProvider::new(&settings, client.clone())?) as Box<dyn LlmProvider>)
        });
        registry.register("test", false, |settings| {
            Ok(Box::new(TestProvider::new(&settings)) as Box<dyn LlmProvider>)
        });

        registry
    }

    /// Replaces the environment lookup used for `<PROVIDER>_API_KEY`.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env_lookup = Arc::new(lookup);
        self
    }

    /// Registers (or replaces) the constructor for a provider name.
    pub fn register<F>(&mut self, name: &str, requires_credential: bool, constructor: F)
    where
        F: Fn(AdapterSettings) -> Result<Box<dyn LlmProvider>, ProviderError> + Send + Sync + 'static,
    {
        self.registrations.insert(
            name.to_string(),
            Registration {
                requires_credential,
                constructor: Arc::new(constructor),
            },
        );
    }

    /// Whether `provider` needs a credential, or `None` if it is unknown.
    pub fn requires_credential(&self, provider: &str) -> Option<bool> {
        self.registrations.get(provider).map(|r| r.requires_credential)
    }

    /// Resolves the credential for a model.
    ///
    /// Priority: model `api_key`, provider `api_key`, `<PROVIDER>_API_KEY`,
    /// then the "not required" sentinel for providers that need none.
    pub fn resolve_credential(&self, model: &ModelProfile, provider: &ProviderProfile) -> Option<String> {
        let non_empty = |key: &Option<String>| key.clone().filter(|k| !k.trim().is_empty());

        non_empty(&model.api_key)
            .or_else(|| non_empty(&provider.api_key))
            .or_else(|| (self.env_lookup)(&env_key_name(&provider.name)).filter(|k| !k.trim().is_empty()))
            .or_else(|| match self.requires_credential(&provider.name) {
                Some(false) => Some(NO_CREDENTIAL_REQUIRED.to_string()),
                _ => None,
            })
    }

    /// Merges profiles into adapter settings.
    ///
    /// Options are layered base URL, provider options, model options, with
    /// later layers winning. A `base_url` option overrides the provider URL.
    pub fn settings(&self, model: &ModelProfile, provider: &ProviderProfile) -> AdapterSettings {
        let mut options = provider.custom_options.clone();
        for (key, value) in &model.custom_options {
            options.insert(key.clone(), value.clone());
        }

        let mut base_url = provider.base_url.clone();
        if let Some(value) = options.remove("base_url") {
            match value {
                Value::String(url) => base_url = Some(url),
                other => debug!("Ignoring non-string base_url option: {}", other),
            }
        }

        AdapterSettings {
            provider: provider.name.clone(),
            model: model.model.clone(),
            api_key: self.resolve_credential(model, provider),
            base_url,
            options,
        }
    }

    /// Builds the adapter for a model.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Construction`] when the provider name is not
    /// registered, a required credential is missing, or an option has the
    /// wrong type.
    pub fn construct(
        &self,
        model: &ModelProfile,
        provider: &ProviderProfile,
    ) -> Result<Box<dyn LlmProvider>, ProviderError> {
        let registration = self
            .registrations
            .get(&provider.name)
            .ok_or_else(|| ProviderError::construction(&provider.name, "unknown provider"))?;

        let settings = self.settings(model, provider);
        debug!(
            "Constructing {} adapter for model '{}' ({})",
            provider.name, model.name, settings.model
        );
        (registration.constructor)(settings)
    }

    /// Lists the models to try, in order, with ineligible ones already
    /// marked as failures.
    ///
    /// The requested model comes first, followed by the configured defaults;
    /// repeated names keep their first position.
    pub fn candidates(&self, config: &Config, requested: Option<&str>) -> Vec<Result<String, CandidateFailure>> {
        let names: IndexSet<&str> = requested
            .into_iter()
            .chain(config.default_models.iter().map(String::as_str))
            .collect();

        names
            .into_iter()
            .map(|name| self.check_eligible(config, name).map(|()| name.to_string()))
            .collect()
    }

    fn check_eligible(&self, config: &Config, name: &str) -> Result<(), CandidateFailure> {
        let failure = |reason: String| CandidateFailure {
            model: name.to_string(),
            reason,
        };

        let model = config
            .model(name)
            .ok_or_else(|| failure("model is not configured".to_string()))?;
        let provider = config
            .provider(&model.provider)
            .ok_or_else(|| failure(format!("provider '{}' is not configured", model.provider)))?;
        let requires_credential = self
            .requires_credential(&provider.name)
            .ok_or_else(|| failure(format!("unknown provider '{}'", provider.name)))?;

        if !requires_credential {
            return Ok(());
        }
        match self.resolve_credential(model, provider) {
            None => Err(failure(format!(
                "no API key found (set {} or api_key in the config file)",
                env_key_name(&provider.name)
            ))),
            Some(key) if !is_plausible_credential(&key) => {
                Err(failure("API key looks like a placeholder or is malformed".to_string()))
            }
            Some(_) => Ok(()),
        }
    }
}

/// Heuristic check that a credential could be real.
pub fn is_plausible_credential(key: &str) -> bool {
    let key = key.trim();
    if key.len() < MIN_CREDENTIAL_LEN {
        return false;
    }
    let lowered = key.to_lowercase();
    if PLACEHOLDER_CREDENTIALS.contains(&lowered.as_str()) {
        return false;
    }
    CREDENTIAL_PATTERN.is_match(key)
}
