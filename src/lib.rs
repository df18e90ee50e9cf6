//! aiterm - shell command suggestions from plain-language descriptions.
//!
//! This library provides the core of the `aiterm` CLI. It supports:
//!
//! - **Several model backends** (Ollama, OpenAI, Anthropic) behind one trait
//! - **Model fallback** across a configured list of candidates
//! - **Context gathering** from `$PATH`, shell history and probe commands
//! - **Guarded execution** through a command allow-list
//! - **Follow-up refinement** with the conversation so far
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Model and provider profiles loaded from TOML
//! - [`conversation`] - Session driver: fallback, turn loop, execution
//! - [`provider_registry`] - Provider constructors and candidate selection
//! - [`providers`] - The provider trait and the deterministic test provider
//! - [`ollama`], [`openai`], [`anthropic`] - Backend adapters
//! - [`http_client`] - HTTP client abstraction
//! - [`context_gatherer`] - PATH, history and probe context
//! - [`prompt_builder`] - Tagged-section prompt assembly
//! - [`response_parser`] - Tolerant suggestion extraction
//! - [`executor`] - Allow-list gate and command execution
//! - [`ignore_set`] - Bloom filter of noise commands hidden from prompts
//! - [`presenter`] - Terminal interaction
//! - [`suggestion`] - Suggestions and conversation turns
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```ignore
//! use aiterm::config::Config;
//! use aiterm::conversation::ConversationOrchestrator;
//! use aiterm::http_client::ReqwestHttpClient;
//! use aiterm::presenter::TerminalPresenter;
//! use aiterm::provider_registry::ProviderRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let registry = ProviderRegistry::with_defaults(Arc::new(ReqwestHttpClient::new()));
//!     let session = ConversationOrchestrator::new(config, registry, Arc::new(TerminalPresenter::new()));
//!
//!     session.run(Some("ollama"), "find files larger than 100MB").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Follow-ups
//!
//! Instead of picking a number, type a refinement at the prompt:
//!
//! ```bash
//! aiterm find large files
//! #   [1] find . -size +100M - Files over 100MB
//! #   Select a number to run, type to refine, or press Enter to quit: only in /var/log
//! ```
//!
//! The refinement is sent with the original request and the previous
//! suggestions, so the model can adjust rather than start over.

pub mod anthropic;
pub mod config;
pub mod context_gatherer;
pub mod conversation;
pub mod error;
pub mod executor;
pub mod http_client;
pub mod ignore_set;
pub mod ollama;
pub mod openai;
pub mod presenter;
pub mod prompt_builder;
pub mod provider_registry;
pub mod providers;
pub mod response_parser;
pub mod suggestion;
