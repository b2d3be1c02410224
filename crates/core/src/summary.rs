//! Short derived session descriptions.
//!
//! The summary is the first real user prompt, cleaned of command tags and
//! injected context, with volatile CLI help text rewritten to a fixed form so
//! summaries stay diffable across CLI versions.

use regex_lite::Regex;
use std::sync::OnceLock;

const SUMMARY_MAX_CHARS: usize = 120;

/// Canonical replacement for every "unknown command" style hint.
pub const CANONICAL_UNKNOWN_COMMAND: &str = "Unknown command. See /help for available commands.";

struct Patterns {
    command_name: Regex,
    command_args: Regex,
    command_message: Regex,
    unknown_command: Regex,
    whitespace: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                command_name: Regex::new(r"(?s)<command-name>.*?</command-name>\s*").ok()?,
                command_args: Regex::new(r"(?s)<command-args>(.*?)</command-args>").ok()?,
                command_message: Regex::new(r"(?s)<command-message>.*?</command-message>\s*").ok()?,
                unknown_command: Regex::new(
                    r#"(?i)(unknown|unrecognized|invalid)( slash)? command:?\s*['"`]?/?[\w:.\-]*['"`]?\.?(\s*(type|try|use|run|see)\b[^\n]*)?"#,
                )
                .ok()?,
                whitespace: Regex::new(r"\s+").ok()?,
            })
        })
        .as_ref()
}

/// Rewrite dynamic invalid-command hints to [`CANONICAL_UNKNOWN_COMMAND`].
pub fn normalize_help_text(text: &str) -> String {
    match patterns() {
        Some(p) => p
            .unknown_command
            .replace_all(text, CANONICAL_UNKNOWN_COMMAND)
            .into_owned(),
        None => text.to_string(),
    }
}

/// Strip `<command-name>`/`<command-message>` tags, keep command args.
pub fn clean_command_tags(text: &str) -> String {
    let Some(p) = patterns() else {
        return text.to_string();
    };
    let result = p.command_name.replace_all(text, "");
    let result = p.command_message.replace_all(&result, "");
    let result = p.command_args.replace_all(&result, "$1");
    result.trim().to_string()
}

/// Whether a user-role text is context injected by the CLI rather than typed
/// by the user.
pub fn is_injected_context(text: &str) -> bool {
    let t = text.trim_start();
    t.starts_with("<environment_context>")
        || t.starts_with("<user_instructions>")
        || t.starts_with("<system-reminder>")
        || t.starts_with("<local-command-stdout>")
        || t.starts_with("Caveat: The messages below were generated by the user")
}

/// Build the summary from the first user prompt, or from counts when there
/// is none.
pub fn auto_summary(first_prompt: Option<&str>, message_count: u64, tool_call_count: u64) -> String {
    let cleaned = first_prompt
        .map(|p| normalize_help_text(&clean_command_tags(p)))
        .map(|p| collapse_whitespace(&p))
        .filter(|p| !p.is_empty());
    match cleaned {
        Some(text) => truncate_chars(&text, SUMMARY_MAX_CHARS),
        None if message_count > 0 => {
            format!("{message_count} messages, {tool_call_count} tool calls")
        }
        None => String::new(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    match patterns() {
        Some(p) => p.whitespace.replace_all(text.trim(), " ").into_owned(),
        None => text.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}...", head.trim_end())
}
