//! Tolerant extraction of suggestions from model replies.
//!
//! Models are asked for JSON but do not always comply. Parsing tries
//! structured JSON first and falls back to scraping command-looking text;
//! it never fails, at worst returning no suggestions.

use crate::suggestion::Suggestion;
use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Upper bound on suggestions recovered by the text fallback.
pub const MAX_FALLBACK_SUGGESTIONS: usize = 5;

const FALLBACK_DESCRIPTION: &str = "Command found in response";

static JSON_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex"));
static SHELL_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:bash|sh|shell)?[ \t]*\n(.*?)```").expect("valid regex"));
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").expect("valid regex"));
static PROMPT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\$\s+(\S.*)$").expect("valid regex"));
static BARE_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._+-]*(\s+\S.*)?$").expect("valid regex"));

/// Extracts suggestions from a raw reply.
pub fn parse_response(response: &str) -> Vec<Suggestion> {
    let fenced = JSON_FENCE
        .captures(response)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str());
    let json_text = fenced.unwrap_or(response).trim();

    if let Some(suggestions) = parse_json(json_text).or_else(|| parse_embedded_object(json_text)) {
        return suggestions;
    }

    debug!("Reply is not JSON, scraping commands from text");
    parse_text(response)
}

fn parse_json(text: &str) -> Option<Vec<Suggestion>> {
    let value: Value = serde_json::from_str(text).ok()?;
    suggestions_from_value(value)
}

/// Retries on the outermost `{...}` span, for replies wrapped in prose.
fn parse_embedded_object(text: &str) -> Option<Vec<Suggestion>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start || (start == 0 && end == text.len() - 1) {
        return None;
    }
    parse_json(&text[start..=end])
}

fn suggestions_from_value(value: Value) -> Option<Vec<Suggestion>> {
    let entries = match value {
        Value::Object(mut map) => {
            if let Some(list) = map.remove("suggestions").or_else(|| map.remove("commands")) {
                match list {
                    Value::Array(items) => items,
                    single => vec![single],
                }
            } else {
                vec![Value::Object(map)]
            }
        }
        Value::Array(items) => items,
        _ => return None,
    };
    Some(entries.into_iter().filter_map(suggestion_from_entry).collect())
}

fn suggestion_from_entry(entry: Value) -> Option<Suggestion> {
    match entry {
        Value::String(command) => {
            let command = command.trim();
            (!command.is_empty()).then(|| Suggestion::new(command, ""))
        }
        Value::Object(map) => {
            let command = map.get("command").and_then(Value::as_str)?.trim();
            if command.is_empty() {
                return None;
            }
            let description = map.get("description").and_then(Value::as_str).unwrap_or("");
            Some(Suggestion::new(command, description.trim()))
        }
        _ => None,
    }
}

/// Scrapes commands in priority order: inline backtick spans, then shell
/// fences, then `$ ` lines, then bare command-looking lines as a last resort.
fn parse_text(response: &str) -> Vec<Suggestion> {
    let mut commands: IndexSet<String> = IndexSet::new();

    // Fence bodies are masked so they are not also read as inline code.
    let prose = SHELL_FENCE.replace_all(response, "\n");

    for caps in INLINE_CODE.captures_iter(&prose) {
        if let Some(code) = caps.get(1) {
            push_command(&mut commands, code.as_str());
        }
    }

    for caps in SHELL_FENCE.captures_iter(response) {
        if let Some(body) = caps.get(1) {
            for line in body.as_str().lines() {
                let line = line.trim();
                let line = line.strip_prefix("$ ").unwrap_or(line).trim();
                push_command(&mut commands, line);
            }
        }
    }

    for line in prose.lines() {
        if let Some(command) = PROMPT_LINE.captures(line).and_then(|caps| caps.get(1)) {
            push_command(&mut commands, command.as_str());
        }
    }

    if commands.is_empty() {
        for line in prose.lines().map(str::trim) {
            if looks_like_bare_command(line) {
                push_command(&mut commands, line);
            }
        }
    }

    commands
        .into_iter()
        .take(MAX_FALLBACK_SUGGESTIONS)
        .map(|command| Suggestion::new(command, FALLBACK_DESCRIPTION))
        .collect()
}

fn push_command(commands: &mut IndexSet<String>, candidate: &str) {
    let candidate = candidate.trim();
    if !candidate.is_empty() && !candidate.starts_with('#') {
        commands.insert(candidate.to_string());
    }
}

fn looks_like_bare_command(line: &str) -> bool {
    !line.ends_with(['.', ':', '!', '?'])
        && BARE_COMMAND.is_match(line)
}
