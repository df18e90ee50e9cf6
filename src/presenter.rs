//! Terminal interaction: showing suggestions and collecting choices.
//!
//! The session talks to the user only through the [`Presenter`] trait, so
//! tests can script a user and the terminal details stay here.

use crate::executor::ExecutionResult;
use crate::suggestion::Suggestion;
use std::io::{self, BufRead, Write};
use tracing::info;

/// What the user did with a list of suggestions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// Run this suggestion.
    Selected(Suggestion),
    /// Refine the request with this follow-up text.
    Continue(String),
    Quit,
}

/// Everything the session needs from the user interface.
pub trait Presenter: Send + Sync {
    /// Shows suggestions and waits for the user's choice.
    fn display_suggestions(&self, suggestions: &[Suggestion]) -> io::Result<Choice>;

    /// Asks whether a command outside the allow-list may run.
    fn confirm_execution(&self, command: &str) -> io::Result<bool>;

    fn display_result(&self, result: &ExecutionResult) -> io::Result<()>;

    /// Progress message, e.g. which model is being tried.
    fn status(&self, message: &str);
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
}

/// Presenter backed by stdin, stdout and stderr.
///
/// # Example
///
/// ```no_run
/// use aiterm::presenter::{Choice, Presenter, TerminalPresenter};
/// use aiterm::suggestion::Suggestion;
///
/// let presenter = TerminalPresenter::new();
/// let choice = presenter.display_suggestions(&[Suggestion::new("ls -la", "List files")])?;
/// if let Choice::Selected(suggestion) = choice {
///     println!("running {}", suggestion.command);
/// }
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct TerminalPresenter;

impl TerminalPresenter {
    pub fn new() -> Self {
        Self
    }

    // =========================================================================
    // Core methods with I/O injection (testable)
    // =========================================================================

    /// Shows a numbered list and reads the user's choice.
    ///
    /// # Arguments
    ///
    /// * `suggestions` - Suggestions to list, numbered from 1
    /// * `input` - Reader to get user input from (e.g., stdin or mock)
    /// * `output` - Writer for the list and prompt (e.g., stdout or mock)
    ///
    /// # Returns
    ///
    /// - [`Choice::Quit`] for empty input, `q`, end of input, or no suggestions
    /// - [`Choice::Selected`] for a number within the list
    /// - [`Choice::Continue`] for any other text
    ///
    /// Numbers outside the list re-prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if I/O operations fail.
    pub fn display_suggestions_with_io<R: BufRead, W: Write>(
        &self,
        suggestions: &[Suggestion],
        input: &mut R,
        output: &mut W,
    ) -> io::Result<Choice> {
        if suggestions.is_empty() {
            writeln!(output, "No suggestions were returned.")?;
            return Ok(Choice::Quit);
        }

        writeln!(output, "\nSuggestions:")?;
        for (i, suggestion) in suggestions.iter().enumerate() {
            if suggestion.description.is_empty() {
                writeln!(output, "  [{}] {}", i + 1, suggestion.command)?;
            } else {
                writeln!(output, "  [{}] {} - {}", i + 1, suggestion.command, suggestion.description)?;
            }
        }

        loop {
            write!(output, "\nSelect a number to run, type to refine, or press Enter to quit: ")?;
            output.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                writeln!(output)?;
                return Ok(Choice::Quit);
            }
            let reply = line.trim();

            if reply.is_empty() || reply.eq_ignore_ascii_case("q") {
                info!("User quit");
                return Ok(Choice::Quit);
            }

            match reply.parse::<usize>() {
                Ok(n) if (1..=suggestions.len()).contains(&n) => {
                    info!("User selected suggestion {}", n);
                    return Ok(Choice::Selected(suggestions[n - 1].clone()));
                }
                Ok(_) => {
                    writeln!(output, "Please choose a number between 1 and {}.", suggestions.len())?;
                }
                Err(_) => {
                    info!("User continued with: {}", reply);
                    return Ok(Choice::Continue(reply.to_string()));
                }
            }
        }
    }

    /// Asks for confirmation before running a command outside the allow-list.
    ///
    /// Only `y` or `yes` (any case) confirms; end of input declines.
    pub fn confirm_execution_with_io<R: BufRead, W: Write>(
        &self,
        command: &str,
        input: &mut R,
        output: &mut W,
    ) -> io::Result<bool> {
        writeln!(output, "\n⚠️  '{}' is not in the allow-list.", command)?;
        write!(output, "Run it anyway? [y/N]: ")?;
        output.flush()?;

        let mut line = String::new();
        input.read_line(&mut line)?;
        let reply = line.trim().to_lowercase();
        Ok(reply == "y" || reply == "yes")
    }

    /// Writes a command's captured output.
    pub fn display_result_with_io<W1: Write, W2: Write>(
        &self,
        result: &ExecutionResult,
        stdout: &mut W1,
        stderr: &mut W2,
    ) -> io::Result<()> {
        if !result.stdout.is_empty() {
            write!(stdout, "{}", result.stdout)?;
        }
        if !result.stderr.is_empty() {
            write!(stderr, "{}", result.stderr)?;
        }
        if !result.success {
            writeln!(stderr, "Command exited with a non-zero status.")?;
        }
        stdout.flush()
    }
}

impl Presenter for TerminalPresenter {
    fn display_suggestions(&self, suggestions: &[Suggestion]) -> io::Result<Choice> {
        self.display_suggestions_with_io(suggestions, &mut io::stdin().lock(), &mut io::stdout())
    }

    fn confirm_execution(&self, command: &str) -> io::Result<bool> {
        self.confirm_execution_with_io(command, &mut io::stdin().lock(), &mut io::stdout())
    }

    fn display_result(&self, result: &ExecutionResult) -> io::Result<()> {
        self.display_result_with_io(result, &mut io::stdout(), &mut io::stderr())
    }

    fn status(&self, message: &str) {
        println!("🔍 {}", message);
    }

    fn info(&self, message: &str) {
        println!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("⚠️  {}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("❌ {}", message);
    }
}
