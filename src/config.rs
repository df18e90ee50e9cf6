//! Configuration: typed model and provider profiles loaded from TOML.
//!
//! The on-disk file is parsed into a loose raw shape first and then turned
//! into [`Config`] by a pure function that fills defaults and rejects
//! incomplete entries with [`ConfigError`]. Unknown keys inside a model or
//! provider table are kept as opaque custom options and forwarded to the
//! provider adapter.

use crate::error::ConfigError;
use dirs::config_dir;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable that points at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "AITERM_CONFIG";

const DEFAULT_HISTORY_CONTEXT_SIZE: usize = 500;
const DEFAULT_MAX_CONTINUATIONS: usize = 20;

/// Providers that always exist, even when the file does not mention them.
const BUILTIN_PROVIDERS: [(&str, Option<&str>); 4] = [
    ("ollama", Some("http://localhost:11434")),
    ("openai", None),
    ("anthropic", None),
    ("test", None),
];

const DEFAULT_ALLOWED_COMMANDS: [&str; 17] = [
    "pwd", "ls", "echo", "date", "cat", "grep", "find", "which", "whoami", "hostname", "uname",
    "df", "du", "ps", "top", "free", "uptime",
];

/// Named bundle selecting a provider, a model identifier and per-model behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelProfile {
    pub name: String,
    pub provider: String,
    pub model: String,
    pub instructions: Option<String>,
    pub include_path_commands: bool,
    pub include_history_context: bool,
    pub history_context_size: usize,
    pub api_key: Option<String>,
    pub custom_options: Map<String, Value>,
}

/// Connection, credential and default settings for one backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderProfile {
    pub name: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub custom_options: Map<String, Value>,
}

/// Size caps for gathered context and the subprocess timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextLimits {
    pub path_command_limit: usize,
    pub recent_history_limit: usize,
    pub older_history_limit: usize,
    pub prompt_history_limit: usize,
    pub exec_timeout_secs: u64,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            path_command_limit: 1000,
            recent_history_limit: 100,
            older_history_limit: 200,
            prompt_history_limit: 20,
            exec_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub default_models: Vec<String>,
    pub allowed_commands: Vec<String>,
    /// Upper bound on continuation turns within one session.
    pub max_continuations: usize,
    pub limits: ContextLimits,
    pub providers: IndexMap<String, ProviderProfile>,
    pub models: IndexMap<String, ModelProfile>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_models: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allowed_commands: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_continuations: Option<usize>,
    #[serde(default)]
    context: ContextLimits,
    #[serde(default)]
    providers: IndexMap<String, RawProvider>,
    #[serde(default)]
    models: IndexMap<String, RawModel>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawProvider {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(flatten)]
    extra: IndexMap<String, toml::Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    include_path_commands: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    include_history_context: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    history_context_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(flatten)]
    extra: IndexMap<String, toml::Value>,
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = IndexMap::new();
        for (name, base_url) in BUILTIN_PROVIDERS {
            providers.insert(
                name.to_string(),
                ProviderProfile {
                    name: name.to_string(),
                    base_url: base_url.map(str::to_string),
                    ..ProviderProfile::default()
                },
            );
        }

        let mut temperature = Map::new();
        temperature.insert("temperature".to_string(), Value::from(0.7));

        let models = [
            model_profile("gpt4", "openai", "gpt-4o", false, 500, temperature),
            model_profile("gpt3", "openai", "gpt-3.5-turbo", false, 500, Map::new()),
            model_profile("claude", "anthropic", "claude-3-sonnet-20240229", false, 500, Map::new()),
            model_profile("ollama", "ollama", "llama3.1", true, 500, Map::new()),
            model_profile("test", "test", "test-model", true, 200, Map::new()),
        ];

        Self {
            default_models: vec!["gpt4".into(), "claude".into(), "ollama".into()],
            allowed_commands: DEFAULT_ALLOWED_COMMANDS.iter().map(|c| c.to_string()).collect(),
            max_continuations: DEFAULT_MAX_CONTINUATIONS,
            limits: ContextLimits::default(),
            providers,
            models: models.into_iter().map(|m| (m.name.clone(), m)).collect(),
        }
    }
}

fn model_profile(
    name: &str,
    provider: &str,
    model: &str,
    extended_context: bool,
    history_context_size: usize,
    custom_options: Map<String, Value>,
) -> ModelProfile {
    ModelProfile {
        name: name.to_string(),
        provider: provider.to_string(),
        model: model.to_string(),
        instructions: None,
        include_path_commands: extended_context,
        include_history_context: extended_context,
        history_context_size,
        api_key: None,
        custom_options,
    }
}

impl Config {
    /// Parses TOML text into a validated configuration.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut providers = IndexMap::new();
        for (name, raw_provider) in raw.providers {
            let profile = ProviderProfile {
                name: name.clone(),
                base_url: raw_provider.base_url,
                api_key: raw_provider.api_key,
                custom_options: toml_options_to_json(raw_provider.extra)?,
            };
            providers.insert(name, profile);
        }
        for (name, base_url) in BUILTIN_PROVIDERS {
            providers.entry(name.to_string()).or_insert_with(|| ProviderProfile {
                name: name.to_string(),
                base_url: base_url.map(str::to_string),
                ..ProviderProfile::default()
            });
        }

        let mut models = IndexMap::new();
        if raw.models.is_empty() {
            models = defaults.models;
        }
        for (name, raw_model) in raw.models {
            let provider = raw_model.provider.ok_or_else(|| ConfigError::MissingField {
                model: name.clone(),
                field: "provider",
            })?;
            let model = raw_model.model.ok_or_else(|| ConfigError::MissingField {
                model: name.clone(),
                field: "model",
            })?;
            if !providers.contains_key(&provider) {
                return Err(ConfigError::UnknownProvider { model: name, provider });
            }
            let profile = ModelProfile {
                name: name.clone(),
                provider,
                model,
                instructions: raw_model.instructions,
                include_path_commands: raw_model.include_path_commands.unwrap_or(false),
                include_history_context: raw_model.include_history_context.unwrap_or(false),
                history_context_size: raw_model
                    .history_context_size
                    .unwrap_or(DEFAULT_HISTORY_CONTEXT_SIZE),
                api_key: raw_model.api_key,
                custom_options: toml_options_to_json(raw_model.extra)?,
            };
            models.insert(name, profile);
        }

        let default_models = match raw.default_models {
            Some(names) => {
                if let Some(unknown) = names.iter().find(|name| !models.contains_key(*name)) {
                    return Err(ConfigError::UnknownDefaultModel(unknown.clone()));
                }
                names
            }
            None => defaults
                .default_models
                .into_iter()
                .filter(|name| models.contains_key(name))
                .collect(),
        };

        Ok(Self {
            default_models,
            allowed_commands: raw.allowed_commands.unwrap_or(defaults.allowed_commands),
            max_continuations: raw.max_continuations.unwrap_or(DEFAULT_MAX_CONTINUATIONS),
            limits: raw.context,
            providers,
            models,
        })
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let mut raw = RawConfig {
            default_models: Some(self.default_models.clone()),
            allowed_commands: Some(self.allowed_commands.clone()),
            max_continuations: Some(self.max_continuations),
            context: self.limits.clone(),
            ..RawConfig::default()
        };
        for (name, provider) in &self.providers {
            raw.providers.insert(
                name.clone(),
                RawProvider {
                    base_url: provider.base_url.clone(),
                    api_key: provider.api_key.clone(),
                    extra: json_options_to_toml(&provider.custom_options)?,
                },
            );
        }
        for (name, model) in &self.models {
            raw.models.insert(
                name.clone(),
                RawModel {
                    provider: Some(model.provider.clone()),
                    model: Some(model.model.clone()),
                    instructions: model.instructions.clone(),
                    include_path_commands: Some(model.include_path_commands),
                    include_history_context: Some(model.include_history_context),
                    history_context_size: Some(model.history_context_size),
                    api_key: model.api_key.clone(),
                    extra: json_options_to_toml(&model.custom_options)?,
                },
            );
        }
        Ok(toml::to_string_pretty(&raw)?)
    }

    /// Loads the configuration file, writing a default one if none exists.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        if !path.exists() {
            info!("No config file found, writing defaults to {}", path.display());
            let config = Self::default();
            config.save_to(&path)?;
            return Ok(config);
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::parse(&content)?;
        info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(path, self.to_toml()?).map_err(write_error)?;
        info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// `$AITERM_CONFIG`, or `config.toml` in the platform config directory.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Directory holding the config file and the persisted ignore set.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let path = Self::config_path()?;
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
            _ => Ok(PathBuf::from(".")),
        }
    }

    fn default_config_dir() -> Result<PathBuf, ConfigError> {
        let base = config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(base.join("aiterm"))
    }

    pub fn model(&self, name: &str) -> Option<&ModelProfile> {
        self.models.get(name)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderProfile> {
        self.providers.get(name)
    }

    pub fn show_config_info() -> Result<(), ConfigError> {
        let config_path = Self::config_path()?;
        println!("Configuration file: {}", config_path.display());

        if config_path.exists() {
            println!("Status: Found");
            let config = Self::load_from(&config_path)?;
            println!("Default models: {}", config.default_models.join(", "));
            println!("Allowed commands: {}", config.allowed_commands.join(", "));
            println!("Models:");
            for model in config.models.values() {
                let key_state = if model.api_key.is_some() { " (api key set)" } else { "" };
                println!("  {} -> {}/{}{}", model.name, model.provider, model.model, key_state);
            }
        } else {
            println!("Status: Not found (defaults are written on first run)");
        }

        println!("\nTo set API keys:");
        println!("  export OPENAI_API_KEY=<your-key>");
        println!("  export ANTHROPIC_API_KEY=<your-key>");
        println!("\nOr add api_key under [providers.<name>] in the config file.");

        Ok(())
    }
}

fn toml_options_to_json(extra: IndexMap<String, toml::Value>) -> Result<Map<String, Value>, ConfigError> {
    let mut options = Map::new();
    for (key, value) in extra {
        let json = serde_json::to_value(&value).map_err(|e| ConfigError::InvalidOption {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        options.insert(key, json);
    }
    Ok(options)
}

fn json_options_to_toml(options: &Map<String, Value>) -> Result<IndexMap<String, toml::Value>, ConfigError> {
    options
        .iter()
        .map(|(key, value)| {
            toml::Value::try_from(value)
                .map(|v| (key.clone(), v))
                .map_err(|e| ConfigError::InvalidOption {
                    key: key.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}
