//! Error taxonomy shared across the crate.
//!
//! Response parsing has no error type of its own: the parser recovers from
//! malformed input internally and never surfaces a failure.

use std::time::Duration;
use thiserror::Error;

/// Missing or invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the configuration directory")]
    NoConfigDir,
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config syntax: {0}")]
    Syntax(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("model '{model}' is missing required field '{field}'")]
    MissingField { model: String, field: &'static str },
    #[error("model '{model}' uses provider '{provider}', which is not configured")]
    UnknownProvider { model: String, provider: String },
    #[error("default model '{0}' is not configured")]
    UnknownDefaultModel(String),
    #[error("invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },
}

/// Failures raised by a provider adapter.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Bad credential, unknown provider or malformed parameters.
    #[error("cannot construct {provider} provider: {reason}")]
    Construction { provider: String, reason: String },
    /// Network, timeout or remote failure.
    #[error("{provider} request failed: {reason}")]
    Request { provider: String, reason: String },
}

impl ProviderError {
    pub fn construction(provider: &str, reason: impl Into<String>) -> Self {
        Self::Construction {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn request(provider: &str, reason: impl Into<String>) -> Self {
        Self::Request {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failures raised by the allow-list gate.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("command '{0}' is not in the allow-list and requires confirmation")]
    PermissionDenied(String),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to run command: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reading or writing the persisted ignore set.
#[derive(Debug, Error)]
pub enum IgnoreSetError {
    #[error("ignore set data is truncated ({0} bytes)")]
    Truncated(usize),
    #[error("ignore set header is inconsistent: {0}")]
    BadHeader(String),
    #[error("ignore set I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a candidate model could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    pub model: String,
    pub reason: String,
}

impl std::fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.model, self.reason)
    }
}

/// Terminal failures of a conversation session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no working model found ({} attempt(s) failed)", .0.len())]
    Exhausted(Vec<CandidateFailure>),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("terminal I/O failed: {0}")]
    Presenter(#[from] std::io::Error),
}
