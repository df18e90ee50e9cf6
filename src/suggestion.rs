//! Domain types exchanged between the parser, the presenter and the session.

use serde::{Deserialize, Serialize};

/// A proposed shell command with a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub command: String,
    #[serde(default)]
    pub description: String,
}

impl Suggestion {
    pub fn new(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One entry of a session's conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Records suggestions as the assistant's reply, in the same JSON shape
    /// models are asked to produce.
    pub fn assistant(suggestions: &[Suggestion]) -> Self {
        let content = serde_json::json!({ "suggestions": suggestions }).to_string();
        Self {
            role: Role::Assistant,
            content,
        }
    }
}
