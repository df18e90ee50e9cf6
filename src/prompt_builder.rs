//! Tagged-section prompt assembly.
//!
//! The prompt is plain text made of `<tag>...</tag>` sections separated by a
//! blank line. Sections with nothing to say are left out entirely. The same
//! document goes to every provider.

use crate::config::ContextLimits;
use crate::context_gatherer::StaticContext;
use crate::ignore_set::IgnoreSet;
use crate::suggestion::{ConversationTurn, Role};
use indexmap::IndexMap;
use std::sync::Arc;

pub const SYSTEM_PROMPT: &str = r#"You are an AI terminal assistant that helps users with command-line tasks.
Your role is to suggest appropriate shell commands based on the user's request.

IMPORTANT: You must respond with valid JSON in the following format:
{
    "suggestions": [
        {"command": "actual command", "description": "what it does"}
    ]
}

For command suggestions:
- Provide up to 3 relevant command suggestions
- Each suggestion must have a "command" and "description"
- Commands should be practical and safe
- Use the available commands, history and execution results when provided
- When the user follows up, refine your previous suggestions accordingly"#;

/// Everything that goes into one prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    /// Per-model instructions from the config file.
    pub instructions: Option<&'a str>,
    pub context: &'a StaticContext,
    /// Context command outputs, in execution order.
    pub exec_results: &'a IndexMap<String, String>,
    /// Earlier turns of this session.
    pub history: &'a [ConversationTurn],
    pub user_input: &'a str,
}

pub struct PromptBuilder {
    limits: ContextLimits,
    ignore_set: Arc<IgnoreSet>,
}

impl PromptBuilder {
    pub fn new(limits: ContextLimits, ignore_set: Arc<IgnoreSet>) -> Self {
        Self { limits, ignore_set }
    }

    pub fn build(&self, request: &PromptRequest<'_>) -> String {
        let mut sections = vec![section("system_prompt", SYSTEM_PROMPT)];

        if let Some(instructions) = request.instructions.map(str::trim).filter(|s| !s.is_empty()) {
            sections.push(section("user_prompt", instructions));
        }

        let commands: Vec<&str> = request
            .context
            .available_commands
            .iter()
            .map(String::as_str)
            .filter(|name| !self.ignore_set.should_ignore(name))
            .take(self.limits.path_command_limit)
            .collect();
        if !commands.is_empty() {
            sections.push(section("available_commands", &commands.join(", ")));
        }

        if let Some(history) = self.history_section(request.context) {
            sections.push(section("command_history", &history));
        }

        if !request.exec_results.is_empty() {
            let results: Vec<String> = request
                .exec_results
                .iter()
                .map(|(command, output)| format!("$ {}\n{}", command, output))
                .collect();
            sections.push(section("exec_result", &results.join("\n")));
        }

        for turn in request.history {
            let tag = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            sections.push(section(tag, &turn.content));
        }

        sections.push(section("user", request.user_input));
        sections.join("\n\n")
    }

    fn history_section(&self, context: &StaticContext) -> Option<String> {
        let limit = self.limits.prompt_history_limit;
        let mut parts = Vec::new();
        if !context.recent_history.is_empty() {
            let recent: Vec<&str> = context.recent_history.iter().take(limit).map(String::as_str).collect();
            parts.push(format!("Recent commands:\n{}", recent.join("\n")));
        }
        if !context.older_history.is_empty() {
            let older: Vec<&str> = context.older_history.iter().take(limit).map(String::as_str).collect();
            parts.push(format!("Frequently used:\n{}", older.join("\n")));
        }
        (!parts.is_empty()).then(|| parts.join("\n"))
    }
}

fn section(tag: &str, body: &str) -> String {
    format!("<{tag}>\n{body}\n</{tag}>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggestion::Suggestion;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(
            ContextLimits::default(),
            Arc::new(IgnoreSet::build(["2to3"], 0.001)),
        )
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_minimal_prompt_has_system_and_user_only() {
        let context = StaticContext::default();
        let exec = IndexMap::new();
        let prompt = builder().build(&PromptRequest {
            instructions: None,
            context: &context,
            exec_results: &exec,
            history: &[],
            user_input: "list files",
        });

        assert!(prompt.starts_with("<system_prompt>\n"));
        assert!(prompt.ends_with("\n\n<user>\nlist files\n</user>"));
        assert!(!prompt.contains("<user_prompt>"));
        assert!(!prompt.contains("<available_commands>"));
        assert!(!prompt.contains("<command_history>"));
        assert!(!prompt.contains("<exec_result>"));
    }

    #[test]
    fn test_full_prompt_section_order() {
        let context = StaticContext {
            available_commands: strings(&["git", "2to3", ".hidden", "ls"]),
            recent_history: strings(&["cd src"]),
            older_history: strings(&["make"]),
        };
        let mut exec = IndexMap::new();
        exec.insert("pwd".to_string(), "/work\n".to_string());
        exec.insert("ls -la".to_string(), "total 0\n".to_string());
        let history = vec![
            ConversationTurn::user("find big files"),
            ConversationTurn::assistant(&[Suggestion::new("du -sh *", "Sizes")]),
        ];

        let prompt = builder().build(&PromptRequest {
            instructions: Some("Prefer POSIX tools."),
            context: &context,
            exec_results: &exec,
            history: &history,
            user_input: "only in this folder",
        });

        let order = [
            "<system_prompt>",
            "<user_prompt>\nPrefer POSIX tools.\n</user_prompt>",
            "<available_commands>\ngit, ls\n</available_commands>",
            "<command_history>\nRecent commands:\ncd src\nFrequently used:\nmake\n</command_history>",
            "<exec_result>\n$ pwd\n/work\n\n$ ls -la\ntotal 0\n\n</exec_result>",
            "<user>\nfind big files\n</user>",
            "<assistant>\n{\"suggestions\":[{\"command\":\"du -sh *\",\"description\":\"Sizes\"}]}\n</assistant>",
            "<user>\nonly in this folder\n</user>",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|needle| prompt.find(needle).unwrap_or_else(|| panic!("missing {needle}")))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{prompt}");
    }

    #[test]
    fn test_history_sections_are_capped() {
        let recent: Vec<String> = (0..30).map(|i| format!("recent{i}")).collect();
        let context = StaticContext {
            available_commands: Vec::new(),
            recent_history: recent,
            older_history: Vec::new(),
        };
        let exec = IndexMap::new();

        let prompt = builder().build(&PromptRequest {
            instructions: None,
            context: &context,
            exec_results: &exec,
            history: &[],
            user_input: "x",
        });

        assert!(prompt.contains("recent19\n"));
        assert!(!prompt.contains("recent20"));
        assert!(!prompt.contains("Frequently used:"));
    }

    #[test]
    fn test_blank_instructions_are_omitted() {
        let context = StaticContext::default();
        let exec = IndexMap::new();
        let prompt = builder().build(&PromptRequest {
            instructions: Some("   "),
            context: &context,
            exec_results: &exec,
            history: &[],
            user_input: "x",
        });
        assert!(!prompt.contains("<user_prompt>"));
    }

    #[test]
    fn test_exec_output_is_inserted_verbatim() {
        let context = StaticContext::default();
        let mut exec = IndexMap::new();
        exec.insert("cat notes".to_string(), "  indented\ntrailing  \n\n".to_string());
        let prompt = builder().build(&PromptRequest {
            instructions: None,
            context: &context,
            exec_results: &exec,
            history: &[],
            user_input: "x",
        });
        assert!(prompt.contains("<exec_result>\n$ cat notes\n  indented\ntrailing  \n\n\n</exec_result>"));
    }
}
