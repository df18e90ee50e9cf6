//! Allow-list gate for running shell commands.
//!
//! Every command that reaches the operating system goes through
//! [`AllowListGate`]:
//! - Context commands requested by a provider (allow-listed only)
//! - The suggestion the user selects (allow-listed, or confirmed first)
//!
//! Commands run through `sh -c` with a timeout; a child that outlives its
//! timeout is killed when the pending future is dropped.

use crate::error::ExecutionError;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Default limit on how long a single command may run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Whether the command exited with status zero.
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    fn from_output(output: &Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

// =============================================================================
// Traits for Dependency Injection
// =============================================================================

/// Trait for running a command line through a shell.
///
/// This abstraction enables testing the gate without spawning real processes.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    /// Runs `command` to completion and returns its captured output.
    async fn run(&self, command: &str) -> std::io::Result<Output>;
}

/// Runs commands with `sh -c` on the tokio process driver.
pub struct SystemShellRunner;

#[async_trait]
impl ShellRunner for SystemShellRunner {
    async fn run(&self, command: &str) -> std::io::Result<Output> {
        Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
    }
}

// =============================================================================
// Gate Implementation
// =============================================================================

/// Decides whether a command may run unattended, and runs it.
///
/// A command is allowed when its first shell token is in the allow set.
/// Tokenizing follows POSIX shell quoting, so `"ls" -la` is allowed while
/// `rm -rf /` is not.
///
/// # Example
///
/// ```ignore
/// let gate = AllowListGate::new(["pwd", "ls"], DEFAULT_TIMEOUT);
/// assert!(gate.is_allowed("ls -la"));
/// let result = gate.execute("pwd", true).await?;
/// ```
pub struct AllowListGate {
    allowed: HashSet<String>,
    timeout: Duration,
    runner: Arc<dyn ShellRunner>,
}

impl AllowListGate {
    /// Creates a gate that spawns real processes.
    ///
    /// # Arguments
    ///
    /// * `allowed` - Command names that may run without confirmation
    /// * `timeout` - Maximum runtime for each command
    pub fn new<I, S>(allowed: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_runner(allowed, timeout, Arc::new(SystemShellRunner))
    }

    /// Creates a gate with an injected runner (for testing).
    pub fn with_runner<I, S>(allowed: I, timeout: Duration, runner: Arc<dyn ShellRunner>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
            timeout,
            runner,
        }
    }

    /// Returns true when the command's first token is allow-listed.
    ///
    /// Unbalanced quotes and empty commands are never allowed.
    pub fn is_allowed(&self, command: &str) -> bool {
        match shell_words::split(command) {
            Ok(tokens) => tokens
                .first()
                .is_some_and(|program| self.allowed.contains(program)),
            Err(e) => {
                debug!("Cannot tokenize '{}': {}", command, e);
                false
            }
        }
    }

    /// Runs a command and captures its output.
    ///
    /// # Arguments
    ///
    /// * `command` - Full command line, passed to `sh -c`
    /// * `require_confirmation` - When true, only allow-listed commands run
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Confirmation is required and the command is not allow-listed
    /// - The command does not finish within the timeout
    /// - The shell cannot be spawned
    ///
    /// A non-zero exit status is not an error; it is reported through
    /// [`ExecutionResult::success`].
    pub async fn execute(
        &self,
        command: &str,
        require_confirmation: bool,
    ) -> Result<ExecutionResult, ExecutionError> {
        if require_confirmation && !self.is_allowed(command) {
            return Err(ExecutionError::PermissionDenied(command.to_string()));
        }

        info!("Executing command: {}", command);
        let output = tokio::time::timeout(self.timeout, self.runner.run(command))
            .await
            .map_err(|_| ExecutionError::Timeout(self.timeout))??;

        let result = ExecutionResult::from_output(&output);
        debug!("Command '{}' finished with {}", command, output.status);
        Ok(result)
    }

    /// Runs allow-listed context commands in order and collects their stdout.
    ///
    /// Commands that are not allowed, fail to run, or exit non-zero are
    /// left out of the result.
    pub async fn gather_context(&self, commands: &[String]) -> IndexMap<String, String> {
        let mut results = IndexMap::new();
        for command in commands {
            if !self.is_allowed(command) {
                debug!("Skipping context command outside the allow-list: {}", command);
                continue;
            }
            match self.execute(command, true).await {
                Ok(result) if result.success => {
                    results.insert(command.clone(), result.stdout);
                }
                Ok(result) => debug!("Context command '{}' failed: {}", command, result.stderr.trim()),
                Err(e) => debug!("Context command '{}' failed: {}", command, e),
            }
        }
        results
    }
}
