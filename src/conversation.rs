//! Session driver: model fallback, the turn loop and execution hand-off.
//!
//! A session first walks the candidate models until one completes a turn
//! with at least one suggestion. From then on that model is fixed: the user
//! can refine the request (another turn with the history so far), pick a
//! suggestion to run, or quit.

use crate::config::{Config, ModelProfile};
use crate::context_gatherer::{ContextGatherer, ContextSource, SystemContextSource};
use crate::error::{CandidateFailure, ProviderError, SessionError};
use crate::executor::{AllowListGate, ExecutionResult};
use crate::ignore_set::{self, IgnoreSet};
use crate::presenter::{Choice, Presenter};
use crate::prompt_builder::{PromptBuilder, PromptRequest};
use crate::provider_registry::ProviderRegistry;
use crate::providers::LlmProvider;
use crate::response_parser::parse_response;
use crate::suggestion::{ConversationTurn, Suggestion};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a session ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Quit,
    Executed { command: String, result: ExecutionResult },
    /// The user declined to run a command outside the allow-list.
    Declined,
    /// The user kept refining past `max_continuations`.
    LimitReached,
}

pub struct ConversationOrchestrator {
    config: Config,
    registry: ProviderRegistry,
    gate: AllowListGate,
    gatherer: ContextGatherer,
    prompts: PromptBuilder,
    presenter: Arc<dyn Presenter>,
}

impl ConversationOrchestrator {
    /// Creates an orchestrator wired to the real system.
    ///
    /// Initializes the process-wide ignore set from the config directory on
    /// first use.
    pub fn new(config: Config, registry: ProviderRegistry, presenter: Arc<dyn Presenter>) -> Self {
        let ignore_set = ignore_set::initialize(|| match Config::config_dir() {
            Ok(dir) => IgnoreSet::load_or_build(&dir),
            Err(e) => {
                warn!("No config directory ({}), using the built-in ignore list", e);
                IgnoreSet::embedded_default()
            }
        });
        let gate = AllowListGate::new(
            config.allowed_commands.iter().cloned(),
            Duration::from_secs(config.limits.exec_timeout_secs),
        );
        Self::with_parts(config, registry, gate, Arc::new(SystemContextSource), ignore_set, presenter)
    }

    /// Creates an orchestrator from injected parts (for testing).
    pub fn with_parts(
        config: Config,
        registry: ProviderRegistry,
        gate: AllowListGate,
        source: Arc<dyn ContextSource>,
        ignore_set: Arc<IgnoreSet>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        let gatherer = ContextGatherer::new(source, config.limits.clone(), ignore_set.clone());
        let prompts = PromptBuilder::new(config.limits.clone(), ignore_set);
        Self {
            config,
            registry,
            gate,
            gatherer,
            prompts,
            presenter,
        }
    }

    /// Runs one session for `query`.
    ///
    /// # Arguments
    ///
    /// * `requested_model` - Model to try before the configured defaults
    /// * `query` - The user's description of what they want to do
    ///
    /// # Errors
    ///
    /// - [`SessionError::Exhausted`] if no candidate produced suggestions
    /// - [`SessionError::Provider`] if the chosen model fails on a later turn
    /// - [`SessionError::Execution`] if the selected command could not run
    /// - [`SessionError::Presenter`] if terminal I/O fails
    pub async fn run(&self, requested_model: Option<&str>, query: &str) -> Result<SessionOutcome, SessionError> {
        info!("Starting session: {}", query);
        let (model, provider, suggestions) = self.select_model(requested_model, query).await?;
        self.converse(&model, provider.as_ref(), query, suggestions).await
    }

    /// Tries candidates in order until one completes a first turn.
    async fn select_model(
        &self,
        requested_model: Option<&str>,
        query: &str,
    ) -> Result<(ModelProfile, Box<dyn LlmProvider>, Vec<Suggestion>), SessionError> {
        let mut failures: Vec<CandidateFailure> = Vec::new();

        for candidate in self.registry.candidates(&self.config, requested_model) {
            let name = match candidate {
                Ok(name) => name,
                Err(failure) => {
                    self.record_failure(&mut failures, failure);
                    continue;
                }
            };
            let Some((model, profile)) = self
                .config
                .model(&name)
                .and_then(|m| self.config.provider(&m.provider).map(|p| (m, p)))
            else {
                self.record_failure(&mut failures, CandidateFailure {
                    model: name,
                    reason: "model is not configured".to_string(),
                });
                continue;
            };

            self.presenter.status(&format!("Trying {} ({}/{})...", name, model.provider, model.model));
            let provider = match self.registry.construct(model, profile) {
                Ok(provider) => provider,
                Err(e) => {
                    self.record_failure(&mut failures, CandidateFailure {
                        model: name,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match self.run_turn(model, provider.as_ref(), query, &[]).await {
                Ok(suggestions) if !suggestions.is_empty() => {
                    info!("Using model '{}'", name);
                    return Ok((model.clone(), provider, suggestions));
                }
                Ok(_) => self.record_failure(&mut failures, CandidateFailure {
                    model: name,
                    reason: "returned no suggestions".to_string(),
                }),
                Err(e) => self.record_failure(&mut failures, CandidateFailure {
                    model: name,
                    reason: e.to_string(),
                }),
            }
        }

        Err(SessionError::Exhausted(failures))
    }

    fn record_failure(&self, failures: &mut Vec<CandidateFailure>, failure: CandidateFailure) {
        warn!("Model unavailable: {}", failure);
        self.presenter.warning(&failure.to_string());
        failures.push(failure);
    }

    /// One full turn: context, probe, prompt, generate, parse.
    async fn run_turn(
        &self,
        model: &ModelProfile,
        provider: &dyn LlmProvider,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<Vec<Suggestion>, ProviderError> {
        let context = self.gatherer.gather_static(model).await;
        let exec_results = self.gatherer.probe(provider, query, &self.gate).await;

        let prompt = self.prompts.build(&PromptRequest {
            instructions: model.instructions.as_deref(),
            context: &context,
            exec_results: &exec_results,
            history,
            user_input: query,
        });
        debug!("Prompt for {}:\n{}", model.name, prompt);

        let reply = provider.generate(&prompt).await?;
        debug!("Reply from {}:\n{}", model.name, reply);
        Ok(parse_response(&reply))
    }

    /// Presents suggestions until the user selects, quits or hits the limit.
    async fn converse(
        &self,
        model: &ModelProfile,
        provider: &dyn LlmProvider,
        initial_query: &str,
        initial_suggestions: Vec<Suggestion>,
    ) -> Result<SessionOutcome, SessionError> {
        let mut history: Vec<ConversationTurn> = Vec::new();
        let mut query = initial_query.to_string();
        let mut suggestions = initial_suggestions;
        let mut continuations = 0;

        loop {
            match self.presenter.display_suggestions(&suggestions)? {
                Choice::Quit => return Ok(SessionOutcome::Quit),
                Choice::Selected(suggestion) => return self.execute(suggestion).await,
                Choice::Continue(text) => {
                    if continuations >= self.config.max_continuations {
                        self.presenter.warning(&format!(
                            "Reached the limit of {} follow-ups; start a new session to keep going.",
                            self.config.max_continuations
                        ));
                        return Ok(SessionOutcome::LimitReached);
                    }
                    continuations += 1;

                    history.push(ConversationTurn::user(query));
                    history.push(ConversationTurn::assistant(&suggestions));
                    query = text;
                    suggestions = self.run_turn(model, provider, &query, &history).await?;
                }
            }
        }
    }

    async fn execute(&self, suggestion: Suggestion) -> Result<SessionOutcome, SessionError> {
        let command = suggestion.command;

        if !self.gate.is_allowed(&command) && !self.presenter.confirm_execution(&command)? {
            self.presenter.info("Command not executed.");
            return Ok(SessionOutcome::Declined);
        }

        self.presenter.status(&format!("Running: {}", command));
        match self.gate.execute(&command, false).await {
            Ok(result) => {
                self.presenter.display_result(&result)?;
                Ok(SessionOutcome::Executed { command, result })
            }
            Err(e) => {
                self.presenter.error(&format!("Failed to run '{}': {}", command, e));
                Err(e.into())
            }
        }
    }
}
