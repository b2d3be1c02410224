// crates/core/src/providers/codex.rs
//! Codex CLI rollout transcripts (`rollout-<ts>-<uuid>.jsonl`).
//!
//! Every line is `{timestamp, type, payload}`:
//! - `session_meta`: session id, cwd, git info, and `source.subagent` for
//!   delegated sessions
//! - `turn_context`: the model and reasoning effort for the following turns
//! - `response_item`: messages, tool calls, tool outputs, reasoning
//! - `event_msg` with `payload.type == "token_count"`: usage snapshots
//!
//! Older rollouts have no envelope: the first line is the session header and
//! later lines are bare response items. Both shapes are handled, as lines or
//! as one JSON document (a top-level array or an object with `messages`).
//!
//! Codex never reports per-model message counts, so the model map relies on
//! the even-split fallback.

use super::{
    content_text, first_record, transcript_records, ParseContext, SessionBuilder, TranscriptParser,
};
use crate::latency::{parse_timestamp, TurnSide};
use crate::normalize::{TokenSnapshot, CODEX_ALIASES};
use crate::pricing::PricingTable;
use crate::types::{Provider, SessionStats};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const ENVELOPE_TYPES: &[&str] = &["session_meta", "turn_context", "response_item", "event_msg", "compacted"];

pub struct CodexParser {
    pricing: Arc<PricingTable>,
}

impl CodexParser {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self { pricing }
    }
}

#[derive(Default)]
struct RolloutState {
    model: Option<String>,
    last_total: Option<TokenSnapshot>,
}

impl TranscriptParser for CodexParser {
    fn provider(&self) -> Provider {
        Provider::Codex
    }

    fn detect(&self, head: &[u8]) -> bool {
        first_record(head).is_some_and(|first| is_codex_record(&first))
    }

    fn parse_bytes(&self, bytes: &[u8], ctx: &ParseContext) -> SessionStats {
        let mut b = SessionBuilder::new(Provider::Codex, &self.pricing, ctx);
        let mut state = RolloutState::default();

        for (index, record) in transcript_records(bytes).enumerate() {
            let value = match record {
                Ok(v) => v,
                Err(skipped) => {
                    debug!("Skipping malformed record {} in {:?}: {}", skipped.position, ctx.file_path, skipped.reason);
                    b.malformed_records += 1;
                    continue;
                }
            };
            let ts = value
                .get("timestamp")
                .and_then(|t| t.as_str())
                .and_then(parse_timestamp);

            let (kind, payload) = match value.get("payload") {
                Some(payload) => (value.get("type").and_then(|t| t.as_str()).unwrap_or_default(), payload),
                None if index == 0 && value.get("instructions").is_some() => ("session_meta", &value),
                None => ("response_item", &value),
            };

            match kind {
                "session_meta" => {
                    b.observe_timestamp(ts);
                    handle_session_meta(payload, &mut b);
                }
                "turn_context" => {
                    b.observe_timestamp(ts);
                    if let Some(model) = payload.get("model").and_then(|m| m.as_str()) {
                        state.model = Some(model.to_string());
                    }
                    let effort = payload
                        .get("effort")
                        .or_else(|| payload.get("reasoning_effort"))
                        .and_then(|v| v.as_str());
                    if let Some(effort) = effort {
                        b.set_effort_mode(effort);
                    }
                }
                "response_item" => handle_response_item(payload, ts, &mut b),
                "event_msg" => {
                    b.observe_timestamp(ts);
                    if payload.get("type").and_then(|t| t.as_str()) == Some("token_count") {
                        handle_token_count(payload, &mut state, &mut b);
                    }
                }
                _ => b.observe_timestamp(ts),
            }
        }
        b.finish()
    }
}

/// An enveloped rollout line, or the legacy
/// `{"id": ..., "timestamp": ..., "instructions": ...}` header.
pub(crate) fn is_codex_record(record: &Value) -> bool {
    let enveloped = record.get("payload").is_some()
        && record
            .get("type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| ENVELOPE_TYPES.contains(&t));
    let legacy_header = record.get("id").is_some()
        && record.get("timestamp").is_some()
        && record.get("instructions").is_some();
    enveloped || legacy_header
}

fn handle_session_meta(payload: &Value, b: &mut SessionBuilder<'_>) {
    if let Some(id) = payload.get("id").and_then(|v| v.as_str()) {
        b.set_session_id(id);
    }
    if let Some(cwd) = payload.get("cwd").and_then(|v| v.as_str()) {
        b.set_project_path(cwd);
    }
    if let Some(branch) = payload
        .get("git")
        .and_then(|g| g.get("branch"))
        .and_then(|v| v.as_str())
    {
        b.set_git_branch(branch);
    }
    // `source` is "cli"/"exec" for user sessions, {"subagent": ...} when delegated.
    if let Some(subagent) = payload.get("source").and_then(|s| s.get("subagent")) {
        let kind = match subagent {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map
                .iter()
                .next()
                .map(|(k, v)| v.as_str().unwrap_or(k.as_str())),
            _ => None,
        };
        b.mark_subagent(kind);
    }
}

fn handle_response_item(item: &Value, ts: Option<chrono::DateTime<chrono::Utc>>, b: &mut SessionBuilder<'_>) {
    match item.get("type").and_then(|t| t.as_str()) {
        Some("message") => {
            let text = content_text(item.get("content").unwrap_or(&Value::Null));
            match item.get("role").and_then(|r| r.as_str()) {
                Some("user") if !crate::summary::is_injected_context(&text) => {
                    b.record_message(TurnSide::User, ts);
                    b.record_prompt(&text);
                }
                Some("assistant") => b.record_message(TurnSide::Assistant, ts),
                _ => b.observe_timestamp(ts),
            }
        }
        Some("function_call") | Some("custom_tool_call") => {
            b.observe_timestamp(ts);
            let name = item.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            let call_id = item.get("call_id").and_then(|v| v.as_str());
            let input = tool_arguments(item);
            b.tools.record_call(name, call_id, &input);
        }
        Some("local_shell_call") => {
            b.observe_timestamp(ts);
            let call_id = item
                .get("call_id")
                .or_else(|| item.get("id"))
                .and_then(|v| v.as_str());
            b.tools.record_call("local_shell", call_id, &Value::Null);
            if item.get("status").and_then(|s| s.as_str()) == Some("failed") {
                b.tools.record_error("local_shell");
            }
        }
        Some("web_search_call") => {
            b.observe_timestamp(ts);
            b.tools.record_call("web_search", None, &Value::Null);
        }
        Some("function_call_output") | Some("custom_tool_call_output") => {
            b.observe_timestamp(ts);
            let call_id = item.get("call_id").and_then(|v| v.as_str());
            if let (Some(id), true) = (call_id, output_failed(item.get("output"))) {
                b.tools.record_error_for_call(id);
            }
        }
        Some("reasoning") => {
            b.observe_timestamp(ts);
            b.record_thinking(1);
        }
        _ => b.observe_timestamp(ts),
    }
}

/// Tool arguments arrive as a JSON-encoded string (`arguments`) or raw
/// text (`input` for custom tools).
fn tool_arguments(item: &Value) -> Value {
    match item.get("arguments").or_else(|| item.get("input")) {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

/// Exit code of a tool output, which is either a JSON string with
/// `metadata.exit_code` or an object of the same shape.
fn output_failed(output: Option<&Value>) -> bool {
    let parsed;
    let output = match output {
        Some(Value::String(s)) => {
            parsed = serde_json::from_str::<Value>(s).unwrap_or(Value::Null);
            &parsed
        }
        Some(v) => v,
        None => return false,
    };
    let exit_code = output
        .get("metadata")
        .and_then(|m| m.get("exit_code"))
        .or_else(|| output.get("exit_code"))
        .and_then(|c| c.as_i64());
    matches!(exit_code, Some(code) if code != 0)
        || output.get("success").and_then(|v| v.as_bool()) == Some(false)
}

fn handle_token_count(payload: &Value, state: &mut RolloutState, b: &mut SessionBuilder<'_>) {
    let Some(info) = payload.get("info").filter(|i| i.is_object()) else {
        return;
    };
    let total = info
        .get("total_token_usage")
        .filter(|v| v.is_object())
        .map(|v| TokenSnapshot::from_value(v, &CODEX_ALIASES));
    let last = info
        .get("last_token_usage")
        .filter(|v| v.is_object())
        .map(|v| TokenSnapshot::from_value(v, &CODEX_ALIASES));

    // Codex re-emits the same token_count when nothing changed.
    if total.is_some() && total == state.last_total {
        return;
    }
    let snapshot = match (last, total, state.last_total) {
        (Some(last), _, _) => last,
        (None, Some(total), Some(previous)) => total.delta_since(&previous),
        (None, Some(total), None) => total,
        (None, None, _) => return,
    };
    if total.is_some() {
        state.last_total = total;
    }
    b.record_usage(state.model.as_deref(), snapshot, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PricingStatus, SessionRole};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn parse(body: &str) -> SessionStats {
        let parser = CodexParser::new(Arc::new(PricingTable::default()));
        let ctx = ParseContext {
            file_path: PathBuf::from("rollout-2025-10-01T10-00-00-abc.jsonl"),
            ..Default::default()
        };
        parser.parse_bytes(body.as_bytes(), &ctx)
    }

    const ROLLOUT: &str = r#"{"timestamp":"2025-10-01T10:00:00Z","type":"session_meta","payload":{"id":"0199-abc","cwd":"/work/api","git":{"branch":"feature/x"},"source":"cli"}}
{"timestamp":"2025-10-01T10:00:00Z","type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"<environment_context>\n<cwd>/work/api</cwd>\n</environment_context>"}]}}
{"timestamp":"2025-10-01T10:00:01Z","type":"turn_context","payload":{"model":"gpt-5-codex","effort":"High"}}
{"timestamp":"2025-10-01T10:00:01Z","type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"Add pagination"}]}}
{"timestamp":"2025-10-01T10:00:03Z","type":"response_item","payload":{"type":"reasoning","summary":[]}}
{"timestamp":"2025-10-01T10:00:03Z","type":"response_item","payload":{"type":"function_call","name":"shell","arguments":"{\"command\":[\"ls\"]}","call_id":"c1"}}
{"timestamp":"2025-10-01T10:00:04Z","type":"response_item","payload":{"type":"function_call_output","call_id":"c1","output":"{\"output\":\"\",\"metadata\":{\"exit_code\":2}}"}}
{"timestamp":"2025-10-01T10:00:04Z","type":"event_msg","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":1000,"cached_input_tokens":400,"output_tokens":50,"reasoning_output_tokens":20},"last_token_usage":{"input_tokens":1000,"cached_input_tokens":400,"output_tokens":50,"reasoning_output_tokens":20}}}}
{"timestamp":"2025-10-01T10:00:04Z","type":"event_msg","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":1000,"cached_input_tokens":400,"output_tokens":50,"reasoning_output_tokens":20},"last_token_usage":{"input_tokens":1000,"cached_input_tokens":400,"output_tokens":50,"reasoning_output_tokens":20}}}}
{"timestamp":"2025-10-01T10:00:06Z","type":"response_item","payload":{"type":"message","role":"assistant","content":[{"type":"output_text","text":"Done."}]}}
{"timestamp":"2025-10-01T10:00:07Z","type":"event_msg","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":1600,"cached_input_tokens":900,"output_tokens":80,"reasoning_output_tokens":20}}}}
{"timestamp":"2025-10-01T10:00:07Z","type":"event_msg","payload":{"type":"token_count","info":null}}
"#;

    #[test]
    fn rollout_usage_and_dedup() {
        let stats = parse(ROLLOUT);
        assert_eq!(stats.session_id, "0199-abc");
        // Duplicate token_count skipped; the last one contributes its delta.
        assert_eq!(stats.input_tokens, 1600);
        assert_eq!(stats.cache_read_tokens, 900);
        assert_eq!(stats.output_tokens, 80);
        assert_eq!(stats.reasoning_tokens, 20);
        assert_eq!(stats.pricing_status, PricingStatus::Priced);
        assert!(stats.total_cost > 0.0);
    }

    #[test]
    fn injected_context_is_not_conversational() {
        let stats = parse(ROLLOUT);
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.auto_summary, "Add pagination");
        assert_eq!(stats.latency_sample_count, 1);
        assert_eq!(stats.avg_latency_ms, None);
    }

    #[test]
    fn tools_errors_and_metadata() {
        let stats = parse(ROLLOUT);
        assert_eq!(stats.tool_call_count, 1);
        assert_eq!(stats.tool_usage["shell"].count, 1);
        assert_eq!(stats.tool_usage["shell"].error_count, 1);
        assert_eq!(stats.thinking_blocks, 1);
        assert_eq!(stats.effort_mode.as_deref(), Some("high"));
        assert_eq!(stats.git_branch.as_deref(), Some("feature/x"));
        assert_eq!(stats.project_path.as_deref(), Some("/work/api"));
        assert_eq!(stats.session_role, SessionRole::Standalone);
    }

    #[test]
    fn model_messages_use_even_split() {
        let stats = parse(ROLLOUT);
        assert_eq!(stats.model_usage.len(), 1);
        assert_eq!(stats.model_usage["gpt-5-codex"].message_count, 2);
        assert_eq!(stats.model_usage["gpt-5-codex"].input_tokens, 1600);
    }

    #[test]
    fn subagent_source_marks_role() {
        let body = r#"{"timestamp":"2025-10-01T10:00:00Z","type":"session_meta","payload":{"id":"s2","source":{"subagent":"review"}}}"#;
        let stats = parse(body);
        assert_eq!(stats.session_role, SessionRole::Subagent);
        assert_eq!(stats.subagent_type.as_deref(), Some("review"));
    }

    #[test]
    fn legacy_rollout_without_envelope() {
        let body = r#"{"id":"legacy-1","timestamp":"2025-04-01T10:00:00Z","instructions":""}
{"type":"message","role":"user","content":[{"type":"input_text","text":"hello"}]}
{"type":"message","role":"assistant","content":[{"type":"output_text","text":"hi"}]}
{"type":"function_call","name":"shell","arguments":"{}","call_id":"x"}
"#;
        let parser = CodexParser::new(Arc::new(PricingTable::default()));
        assert!(parser.detect(body.as_bytes()));
        let stats = parse(body);
        assert_eq!(stats.session_id, "legacy-1");
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.tool_call_count, 1);
    }

    #[test]
    fn whole_document_shapes_match_jsonl() {
        let records: Vec<Value> = ROLLOUT
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        let array = Value::Array(records);
        let wrapped = serde_json::json!({ "messages": array.clone() });
        let expected = parse(ROLLOUT);
        let registry = crate::providers::ProviderRegistry::default();
        for doc in [
            array.to_string(),
            wrapped.to_string(),
            serde_json::to_string_pretty(&array).unwrap(),
            serde_json::to_string_pretty(&wrapped).unwrap(),
        ] {
            assert_eq!(registry.detect(doc.as_bytes()), Some(Provider::Codex));
            let stats = parse(&doc);
            assert_eq!(stats, expected);
            assert_eq!(stats.model_usage["gpt-5-codex"].input_tokens, 1600);
        }
    }

    #[test]
    fn legacy_header_first_in_array() {
        let body = r#"[{"id":"legacy-2","timestamp":"2025-04-01T10:00:00Z","instructions":""},
{"type":"message","role":"user","content":[{"type":"input_text","text":"hello"}]}]"#;
        let stats = parse(body);
        assert_eq!(stats.session_id, "legacy-2");
        assert_eq!(stats.message_count, 1);
    }

    #[test]
    fn detect_rejects_other_formats() {
        let parser = CodexParser::new(Arc::new(PricingTable::default()));
        assert!(parser.detect(ROLLOUT.as_bytes()));
        assert!(!parser.detect(br#"{"type":"user","message":{"content":"x"}}"#));
        assert!(!parser.detect(br#"{"sessionId":"g","messages":[]}"#));
    }
}
