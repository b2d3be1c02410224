// crates/core/src/providers/gemini.rs
//! Gemini CLI chat files: one JSON document per session.
//!
//! Modern shape:
//! `{sessionId, projectHash, startTime, lastUpdated, messages: [...]}` where
//! each message has `type` (`user`, `gemini`, `info`, `error`, `warning`),
//! `timestamp`, `content`, and for model turns `model`, `tokens`,
//! `toolCalls` and `thoughts`.
//!
//! Legacy shape: a bare array of records, either API-style
//! `{role: user|model, parts: [{text}|{functionCall}|{functionResponse}]}`
//! or log-style `{type, message, timestamp}`.

use super::claude::is_claude_record;
use super::codex::is_codex_record;
use super::{content_text, first_json_line, first_record, ParseContext, SessionBuilder, TranscriptParser};
use crate::latency::{parse_timestamp, TurnSide};
use crate::normalize::{TokenSnapshot, GEMINI_ALIASES};
use crate::pricing::PricingTable;
use crate::project;
use crate::types::{Provider, SessionStats};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct GeminiParser {
    pricing: Arc<PricingTable>,
}

impl GeminiParser {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self { pricing }
    }
}

impl TranscriptParser for GeminiParser {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn detect(&self, head: &[u8]) -> bool {
        // Claude and Codex records may come wrapped in the same document shapes.
        if first_record(head).is_some_and(|r| is_claude_record(&r) || is_codex_record(&r)) {
            return false;
        }
        let trimmed = head.trim_ascii_start();
        match trimmed.first() {
            Some(b'[') => true,
            Some(b'{') => {
                // A complete first line is either a compact document or a
                // JSONL record: decide on its top-level keys.
                if let Some(first) = first_json_line(trimmed) {
                    return first.get("messages").is_some_and(|m| m.is_array())
                        || first.get("projectHash").is_some();
                }
                // Pretty-printed documents span lines; fall back to raw text.
                let text = String::from_utf8_lossy(trimmed);
                let has_messages = text.contains("\"messages\"");
                let has_session_keys = text.contains("\"projectHash\"") || text.contains("\"startTime\"");
                let jsonl_envelope = text.contains("\"payload\"");
                (has_messages || has_session_keys) && !jsonl_envelope
            }
            _ => false,
        }
    }

    fn parse_bytes(&self, bytes: &[u8], ctx: &ParseContext) -> SessionStats {
        let mut b = SessionBuilder::new(Provider::Gemini, &self.pricing, ctx);
        let root: Value = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => {
                debug!("Malformed Gemini session {:?}: {}", ctx.file_path, e);
                return SessionStats::zero(Provider::Gemini, &ctx.file_path);
            }
        };

        let (records, session) = match &root {
            Value::Array(records) => (records.as_slice(), None),
            Value::Object(_) => match root.get("messages") {
                Some(Value::Array(records)) => (records.as_slice(), Some(&root)),
                _ => {
                    debug!("Gemini session {:?} has no messages array", ctx.file_path);
                    return SessionStats::zero(Provider::Gemini, &ctx.file_path);
                }
            },
            _ => return SessionStats::zero(Provider::Gemini, &ctx.file_path),
        };

        let session_model = session
            .and_then(|s| s.get("model"))
            .and_then(|m| m.as_str())
            .map(str::to_string);
        if let Some(session) = session {
            read_session_header(session, &ctx.file_path, &mut b);
        }

        for record in records {
            if !record.is_object() {
                b.malformed_records += 1;
                continue;
            }
            let ts = record
                .get("timestamp")
                .and_then(|t| t.as_str())
                .and_then(parse_timestamp);
            if record.get("parts").is_some() || record.get("role").is_some() {
                handle_api_record(record, ts, session_model.as_deref(), &mut b);
            } else {
                handle_typed_record(record, ts, session_model.as_deref(), &mut b);
            }
        }
        b.finish()
    }
}

fn read_session_header(session: &Value, file_path: &Path, b: &mut SessionBuilder<'_>) {
    if let Some(id) = session.get("sessionId").and_then(|v| v.as_str()) {
        b.set_session_id(id);
    }
    for key in ["startTime", "lastUpdated"] {
        let ts = session.get(key).and_then(|v| v.as_str()).and_then(parse_timestamp);
        b.observe_timestamp(ts);
    }
    let expected_hash = session.get("projectHash").and_then(|v| v.as_str());
    if let Some(root) = project::find_marked_project_root(file_path, expected_hash) {
        if let Some(branch) = project::read_git_branch(Path::new(&root)) {
            b.set_git_branch(&branch);
        }
        b.set_project_path(&root);
    }
}

/// Modern messages and log-style legacy records.
fn handle_typed_record(
    record: &Value,
    ts: Option<chrono::DateTime<chrono::Utc>>,
    session_model: Option<&str>,
    b: &mut SessionBuilder<'_>,
) {
    match record.get("type").and_then(|t| t.as_str()) {
        Some("user") => {
            b.record_message(TurnSide::User, ts);
            let content = record
                .get("content")
                .or_else(|| record.get("message"))
                .unwrap_or(&Value::Null);
            b.record_prompt(&content_text(content));
        }
        Some("gemini") | Some("model") | Some("assistant") => {
            b.record_message(TurnSide::Assistant, ts);
            if let Some(Value::Array(calls)) = record.get("toolCalls") {
                for call in calls {
                    let name = call.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                    let id = call.get("id").and_then(|v| v.as_str());
                    let args = call.get("args").unwrap_or(&Value::Null);
                    b.tools.record_call(name, id, args);
                    if call.get("status").and_then(|s| s.as_str()) == Some("error") {
                        b.tools.record_error(name);
                    }
                }
            }
            if let Some(Value::Array(thoughts)) = record.get("thoughts") {
                b.record_thinking(thoughts.len() as u64);
            }
            let model = record
                .get("model")
                .and_then(|m| m.as_str())
                .or(session_model);
            let snapshot = record
                .get("tokens")
                .or_else(|| record.get("usageMetadata"))
                .filter(|t| t.is_object())
                .map(|t| TokenSnapshot::from_value(t, &GEMINI_ALIASES))
                .unwrap_or_default();
            b.record_usage(model, snapshot, 1);
        }
        // info, error, warning and anything newer are notices.
        _ => b.observe_timestamp(ts),
    }
}

/// API-style legacy records with `role` and `parts`.
fn handle_api_record(
    record: &Value,
    ts: Option<chrono::DateTime<chrono::Utc>>,
    session_model: Option<&str>,
    b: &mut SessionBuilder<'_>,
) {
    let parts: &[Value] = match record.get("parts") {
        Some(Value::Array(parts)) => parts,
        _ => &[],
    };
    let has_text = parts
        .iter()
        .any(|p| p.get("text").and_then(|t| t.as_str()).is_some_and(|t| !t.trim().is_empty()));

    match record.get("role").and_then(|r| r.as_str()) {
        Some("user") => {
            // functionResponse parts travel in user-role records.
            for part in parts {
                if let Some(response) = part.get("functionResponse") {
                    let failed = response
                        .get("response")
                        .is_some_and(|r| r.get("error").is_some_and(|e| !e.is_null()));
                    if failed {
                        let name = response.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                        match response.get("id").and_then(|v| v.as_str()) {
                            Some(id) if b.tools.name_for_call(id).is_some() => b.tools.record_error_for_call(id),
                            _ => b.tools.record_error(name),
                        }
                    }
                }
            }
            if has_text {
                b.record_message(TurnSide::User, ts);
                b.record_prompt(&content_text(&Value::Array(parts.to_vec())));
            } else {
                b.observe_timestamp(ts);
            }
        }
        Some("model") => {
            b.record_message(TurnSide::Assistant, ts);
            for part in parts {
                if let Some(call) = part.get("functionCall") {
                    let name = call.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                    let id = call.get("id").and_then(|v| v.as_str());
                    b.tools.record_call(name, id, call.get("args").unwrap_or(&Value::Null));
                }
                if part.get("thought").and_then(|t| t.as_bool()) == Some(true) {
                    b.record_thinking(1);
                }
            }
            let snapshot = record
                .get("usageMetadata")
                .or_else(|| record.get("tokens"))
                .filter(|t| t.is_object())
                .map(|t| TokenSnapshot::from_value(t, &GEMINI_ALIASES))
                .unwrap_or_default();
            let model = record
                .get("model")
                .and_then(|m| m.as_str())
                .or(session_model);
            b.record_usage(model, snapshot, 1);
        }
        _ => b.observe_timestamp(ts),
    }
}
