//! Context gathering for prompt assembly.
//!
//! Two channels feed a prompt:
//! - **Static** context, gated by the model profile: executables on `$PATH`
//!   and the user's shell history.
//! - **Dynamic** context: commands the provider asks for through its probe,
//!   run through the [`AllowListGate`].
//!
//! Gathering never fails a turn. Anything that goes wrong is logged and
//! contributes nothing.

use crate::config::{ContextLimits, ModelProfile};
use crate::executor::AllowListGate;
use crate::ignore_set::IgnoreSet;
use crate::providers::LlmProvider;
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const HISTORY_TIMEOUT: Duration = Duration::from_secs(3);

/// Leading entry number printed by `history`, e.g. `  42  ` or `  42* `.
static HISTORY_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d+\*?\s+").expect("valid regex"));

/// Static context collected for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticContext {
    pub available_commands: Vec<String>,
    /// Most recent first.
    pub recent_history: Vec<String>,
    /// Older entries not in `recent_history`, deduplicated.
    pub older_history: Vec<String>,
}

// =============================================================================
// Traits for Dependency Injection
// =============================================================================

/// Access to the system facts static context is built from.
#[async_trait]
pub trait ContextSource: Send + Sync {
    /// Executable names found on `$PATH`, sorted and deduplicated.
    fn path_executables(&self) -> std::io::Result<Vec<String>>;

    /// Raw output of the user's shell `history` builtin.
    async fn shell_history(&self) -> std::io::Result<String>;
}

/// Reads `$PATH` and runs the user's shell.
pub struct SystemContextSource;

impl SystemContextSource {
    fn shell_program() -> PathBuf {
        if let Some(shell) = std::env::var_os("SHELL").filter(|s| !s.is_empty()) {
            return PathBuf::from(shell);
        }
        which::which("bash").unwrap_or_else(|_| PathBuf::from("/bin/sh"))
    }
}

#[async_trait]
impl ContextSource for SystemContextSource {
    fn path_executables(&self) -> std::io::Result<Vec<String>> {
        let path = std::env::var_os("PATH")
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "PATH is not set"))?;

        let mut names = BTreeSet::new();
        for dir in std::env::split_paths(&path) {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let Ok(metadata) = std::fs::metadata(entry.path()) else {
                    continue;
                };
                if is_executable(&metadata) {
                    names.insert(entry.file_name().to_string_lossy().to_string());
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn shell_history(&self) -> std::io::Result<String> {
        let shell = Self::shell_program();
        let child = Command::new(&shell)
            .args(["-i", "-c", "history"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(HISTORY_TIMEOUT, child)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "shell history timed out"))??;

        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "{} exited with {}",
                shell.display(),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    metadata.is_file()
}

/// Parses `history` output into commands, most recent first.
pub fn parse_history(raw: &str) -> Vec<String> {
    let mut commands: Vec<String> = raw
        .lines()
        .map(|line| HISTORY_NUMBER.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    commands.reverse();
    commands
}

/// Splits most-recent-first history into the recent window and the unique
/// older commands outside it.
pub fn split_history(commands: &[String], window: usize) -> (Vec<String>, Vec<String>) {
    let split = window.min(commands.len());
    let recent = commands[..split].to_vec();
    let recent_set: HashSet<&String> = recent.iter().collect();
    let older: IndexSet<String> = commands[split..]
        .iter()
        .filter(|command| !recent_set.contains(command))
        .cloned()
        .collect();
    (recent, older.into_iter().collect())
}

/// Collects static and dynamic context for a turn.
pub struct ContextGatherer {
    source: Arc<dyn ContextSource>,
    limits: ContextLimits,
    ignore_set: Arc<IgnoreSet>,
}

impl ContextGatherer {
    pub fn new(source: Arc<dyn ContextSource>, limits: ContextLimits, ignore_set: Arc<IgnoreSet>) -> Self {
        Self {
            source,
            limits,
            ignore_set,
        }
    }

    /// Gathers the static channels enabled on `profile`.
    pub async fn gather_static(&self, profile: &ModelProfile) -> StaticContext {
        let mut context = StaticContext::default();

        if profile.include_path_commands {
            match self.source.path_executables() {
                Ok(names) => {
                    context.available_commands = names
                        .into_iter()
                        .filter(|name| !self.ignore_set.should_ignore(name))
                        .take(self.limits.path_command_limit)
                        .collect();
                }
                Err(e) => warn!("Could not list PATH commands: {}", e),
            }
        }

        if profile.include_history_context {
            match self.source.shell_history().await {
                Ok(raw) => {
                    let commands = parse_history(&raw);
                    let (mut recent, mut older) = split_history(&commands, profile.history_context_size);
                    recent.truncate(self.limits.recent_history_limit);
                    older.truncate(self.limits.older_history_limit);
                    context.recent_history = recent;
                    context.older_history = older;
                }
                Err(e) => warn!("Could not read shell history: {}", e),
            }
        }

        debug!(
            "Static context: {} commands, {} recent, {} older",
            context.available_commands.len(),
            context.recent_history.len(),
            context.older_history.len()
        );
        context
    }

    /// Asks the provider whether it needs context and runs what it asks for.
    ///
    /// Returns the outputs keyed by command, in request order.
    pub async fn probe(
        &self,
        provider: &dyn LlmProvider,
        query: &str,
        gate: &AllowListGate,
    ) -> IndexMap<String, String> {
        match provider.needs_context(query).await {
            Ok(request) if request.needed && !request.commands.is_empty() => {
                debug!("{} requested context: {:?}", provider.name(), request.commands);
                gate.gather_context(&request.commands).await
            }
            Ok(_) => IndexMap::new(),
            Err(e) => {
                warn!("Context probe failed, continuing without it: {}", e);
                IndexMap::new()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::executor::DEFAULT_TIMEOUT;
    use crate::executor::tests::MockShellRunner;
    use crate::providers::ContextRequest;

    // =========================================================================
    // Mock implementations
    // =========================================================================

    /// Context source with fixed PATH entries and history output.
    pub struct MockContextSource {
        pub executables: Option<Vec<String>>,
        pub history: Option<String>,
    }

    impl MockContextSource {
        pub fn empty() -> Self {
            Self {
                executables: Some(Vec::new()),
                history: Some(String::new()),
            }
        }
    }

    #[async_trait]
    impl ContextSource for MockContextSource {
        fn path_executables(&self) -> std::io::Result<Vec<String>> {
            self.executables
                .clone()
                .ok_or_else(|| std::io::Error::other("no PATH"))
        }

        async fn shell_history(&self) -> std::io::Result<String> {
            self.history.clone().ok_or_else(|| std::io::Error::other("no shell"))
        }
    }

    struct ProbeProvider {
        reply: Result<ContextRequest, String>,
    }

    #[async_trait]
    impl LlmProvider for ProbeProvider {
        fn name(&self) -> &str {
            "probe"
        }
        async fn needs_context(&self, _query: &str) -> Result<ContextRequest, ProviderError> {
            self.reply
                .clone()
                .map_err(|reason| ProviderError::request("probe", reason))
        }
        async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
            Ok(String::new())
        }
    }

    fn profile(path: bool, history: bool, size: usize) -> ModelProfile {
        ModelProfile {
            name: "m".into(),
            provider: "test".into(),
            model: "m".into(),
            instructions: None,
            include_path_commands: path,
            include_history_context: history,
            history_context_size: size,
            api_key: None,
            custom_options: Default::default(),
        }
    }

    fn gatherer(source: MockContextSource, limits: ContextLimits) -> ContextGatherer {
        let ignore = IgnoreSet::build(["2to3", "x86_64-linux-gnu-gcc"], 0.001);
        ContextGatherer::new(Arc::new(source), limits, Arc::new(ignore))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    // =========================================================================
    // History parsing tests
    // =========================================================================

    #[test]
    fn test_parse_history_strips_numbers_and_reverses() {
        let raw = "    1  cd src\n    2  ls -la\n\n    3* git status\n  4  echo 42\n";
        assert_eq!(
            parse_history(raw),
            vec!["echo 42", "git status", "ls -la", "cd src"]
        );
    }

    #[test]
    fn test_parse_history_without_numbers() {
        assert_eq!(parse_history("make\ncargo fmt\n"), vec!["cargo fmt", "make"]);
    }

    #[test]
    fn test_split_history_recent_and_unique_older() {
        let commands = strings(&["ls", "git status", "ls", "make", "git status", "make", "vim"]);
        let (recent, older) = split_history(&commands, 3);
        assert_eq!(recent, vec!["ls", "git status", "ls"]);
        assert_eq!(older, vec!["make", "vim"]);
    }

    #[test]
    fn test_split_history_window_larger_than_history() {
        let commands = strings(&["a", "b"]);
        let (recent, older) = split_history(&commands, 500);
        assert_eq!(recent, vec!["a", "b"]);
        assert!(older.is_empty());
    }

    // =========================================================================
    // Static gathering tests
    // =========================================================================

    #[tokio::test]
    async fn test_static_context_respects_profile_flags() {
        let source = MockContextSource {
            executables: Some(strings(&["git", "ls"])),
            history: Some("1 ls\n".into()),
        };
        let context = gatherer(source, ContextLimits::default())
            .gather_static(&profile(false, false, 500))
            .await;
        assert_eq!(context, StaticContext::default());
    }

    #[tokio::test]
    async fn test_static_context_filters_and_caps_commands() {
        let source = MockContextSource {
            executables: Some(strings(&[".hidden", "2to3", "cat", "git", "ls", "zsh"])),
            history: None,
        };
        let limits = ContextLimits {
            path_command_limit: 3,
            ..ContextLimits::default()
        };

        let context = gatherer(source, limits).gather_static(&profile(true, false, 500)).await;

        assert_eq!(context.available_commands, vec!["cat", "git", "ls"]);
    }

    #[tokio::test]
    async fn test_static_context_caps_history() {
        let raw: String = (1..=10).map(|i| format!("  {i}  cmd{i}\n")).collect();
        let source = MockContextSource {
            executables: None,
            history: Some(raw),
        };
        let limits = ContextLimits {
            recent_history_limit: 2,
            older_history_limit: 3,
            ..ContextLimits::default()
        };

        let context = gatherer(source, limits).gather_static(&profile(false, true, 4)).await;

        assert_eq!(context.recent_history, vec!["cmd10", "cmd9"]);
        assert_eq!(context.older_history, vec!["cmd6", "cmd5", "cmd4"]);
    }

    #[tokio::test]
    async fn test_static_context_failures_are_empty() {
        let source = MockContextSource {
            executables: None,
            history: None,
        };
        let context = gatherer(source, ContextLimits::default())
            .gather_static(&profile(true, true, 500))
            .await;
        assert_eq!(context, StaticContext::default());
    }

    // =========================================================================
    // Probe tests
    // =========================================================================

    #[tokio::test]
    async fn test_probe_runs_requested_allowed_commands() {
        let runner = Arc::new(MockShellRunner::new().success("pwd", "/work\n"));
        let gate = AllowListGate::with_runner(["pwd"], DEFAULT_TIMEOUT, runner.clone());
        let provider = ProbeProvider {
            reply: Ok(ContextRequest::commands(["pwd", "rm -rf /"])),
        };

        let results = gatherer(MockContextSource::empty(), ContextLimits::default())
            .probe(&provider, "where am I", &gate)
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results["pwd"], "/work\n");
        assert_eq!(runner.ran(), vec!["pwd"]);
    }

    #[tokio::test]
    async fn test_probe_error_yields_nothing() {
        let runner = Arc::new(MockShellRunner::new());
        let gate = AllowListGate::with_runner(["pwd"], DEFAULT_TIMEOUT, runner.clone());
        let provider = ProbeProvider {
            reply: Err("connection refused".into()),
        };

        let results = gatherer(MockContextSource::empty(), ContextLimits::default())
            .probe(&provider, "anything", &gate)
            .await;

        assert!(results.is_empty());
        assert!(runner.ran().is_empty());
    }
}
