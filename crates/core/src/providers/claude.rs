// crates/core/src/providers/claude.rs
//! Claude Code JSONL transcripts.
//!
//! One JSON object per line, or the same records as one JSON document (a
//! top-level array or an object with a `messages` array). `user` and
//! `assistant` records are conversational; `system`, `summary`, `progress`,
//! `file-history-snapshot` and `queue-operation` records only contribute
//! timestamps and metadata.
//!
//! Claude streams one assistant message as several lines that share a
//! `message.id`, each carrying one content block and a copy of the usage. Those
//! lines are folded back into one message and its usage is counted once.

use super::{
    content_text, first_record, transcript_records, ParseContext, SessionBuilder, TranscriptParser,
};
use crate::latency::{parse_timestamp, TurnSide};
use crate::normalize::{TokenSnapshot, CLAUDE_ALIASES};
use crate::pricing::PricingTable;
use crate::types::{Provider, SessionStats};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const CLAUDE_LINE_TYPES: &[&str] = &[
    "user",
    "assistant",
    "system",
    "summary",
    "progress",
    "file-history-snapshot",
    "queue-operation",
];

pub struct ClaudeParser {
    pricing: Arc<PricingTable>,
}

impl ClaudeParser {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self { pricing }
    }
}

/// The assistant message currently being reassembled from streamed lines.
#[derive(Default)]
struct PendingAssistant {
    id: Option<String>,
    model: Option<String>,
    usage: TokenSnapshot,
}

impl PendingAssistant {
    fn flush(&mut self, builder: &mut SessionBuilder<'_>) {
        if self.id.is_none() {
            return;
        }
        let done = std::mem::take(self);
        builder.record_usage(done.model.as_deref(), done.usage, 1);
    }
}

impl TranscriptParser for ClaudeParser {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    fn detect(&self, head: &[u8]) -> bool {
        first_record(head).is_some_and(|first| is_claude_record(&first))
    }

    fn parse_bytes(&self, bytes: &[u8], ctx: &ParseContext) -> SessionStats {
        let mut b = SessionBuilder::new(Provider::Claude, &self.pricing, ctx);
        if is_subagent_path(&ctx.file_path) {
            b.mark_subagent(None);
        }

        let mut pending = PendingAssistant::default();
        // Running counter for anonymous assistant lines (no message.id).
        let mut anonymous = 0u64;

        for record in transcript_records(bytes) {
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
            read_metadata(&value, &mut b);

            match value.get("type").and_then(|t| t.as_str()) {
                Some("user") => {
                    pending.flush(&mut b);
                    handle_user(&value, ts, &mut b);
                }
                Some("assistant") => {
                    let message = value.get("message").unwrap_or(&Value::Null);
                    let id = match message.get("id").and_then(|v| v.as_str()) {
                        Some(id) => id.to_string(),
                        None => {
                            anonymous += 1;
                            format!("\0anon-{anonymous}")
                        }
                    };
                    if pending.id.as_deref() != Some(id.as_str()) {
                        pending.flush(&mut b);
                        pending.id = Some(id);
                        b.record_message(TurnSide::Assistant, ts);
                    } else {
                        b.observe_timestamp(ts);
                    }
                    handle_assistant(message, &mut pending, &mut b);
                }
                _ => b.observe_timestamp(ts),
            }
        }
        pending.flush(&mut b);
        b.finish()
    }
}

/// A typed Claude line. Gemini's log records share `type` and `sessionId`
/// but carry `message` as plain text, so the message must be an object.
pub(crate) fn is_claude_record(record: &Value) -> bool {
    if record.get("payload").is_some() {
        return false;
    }
    let typed = record
        .get("type")
        .and_then(|t| t.as_str())
        .is_some_and(|t| CLAUDE_LINE_TYPES.contains(&t));
    typed
        && (record.get("uuid").is_some()
            || record.get("leafUuid").is_some()
            || record.get("message").is_some_and(|m| m.is_object()))
}

/// Sub-agent transcripts live under a `subagents/` directory or are named
/// `agent-<id>.jsonl`.
fn is_subagent_path(path: &std::path::Path) -> bool {
    let in_subagents_dir = path
        .parent()
        .and_then(|p| p.file_name())
        .is_some_and(|n| n == "subagents");
    let agent_file = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("agent-"));
    in_subagents_dir || agent_file
}

fn read_metadata(value: &Value, b: &mut SessionBuilder<'_>) {
    if let Some(cwd) = value.get("cwd").and_then(|v| v.as_str()) {
        b.set_project_path(cwd);
    }
    if let Some(branch) = value.get("gitBranch").and_then(|v| v.as_str()) {
        b.set_git_branch(branch);
    }
    if value.get("isSidechain").and_then(|v| v.as_bool()) == Some(true) {
        b.mark_subagent(value.get("agentType").and_then(|v| v.as_str()));
    }
    let level = value
        .get("thinkingMetadata")
        .and_then(|m| m.get("level"))
        .and_then(|v| v.as_str());
    if let Some(level) = level {
        b.set_effort_mode(level);
    }
}

fn handle_user(value: &Value, ts: Option<chrono::DateTime<chrono::Utc>>, b: &mut SessionBuilder<'_>) {
    if value.get("isMeta").and_then(|v| v.as_bool()) == Some(true) {
        b.observe_timestamp(ts);
        return;
    }
    let content = value
        .get("message")
        .and_then(|m| m.get("content"))
        .unwrap_or(&Value::Null);

    let mut has_text = matches!(content, Value::String(s) if !s.trim().is_empty());
    if let Value::Array(blocks) = content {
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("tool_result") => {
                    let failed = block.get("is_error").and_then(|v| v.as_bool()) == Some(true);
                    if let (true, Some(id)) = (failed, block.get("tool_use_id").and_then(|v| v.as_str())) {
                        b.tools.record_error_for_call(id);
                    }
                }
                Some("text") => {
                    has_text |= block
                        .get("text")
                        .and_then(|t| t.as_str())
                        .is_some_and(|t| !t.trim().is_empty());
                }
                Some("image") | Some("document") => has_text = true,
                _ => {}
            }
        }
    }

    // Tool-result-only lines are plumbing, not a prompt.
    if !has_text {
        b.observe_timestamp(ts);
        return;
    }
    b.record_message(TurnSide::User, ts);
    b.record_prompt(&content_text(content));
}

fn handle_assistant(message: &Value, pending: &mut PendingAssistant, b: &mut SessionBuilder<'_>) {
    if let Some(model) = message.get("model").and_then(|v| v.as_str()) {
        if model != "<synthetic>" {
            pending.model = Some(model.to_string());
        }
    }
    if let Some(usage) = message.get("usage").filter(|u| u.is_object()) {
        let snapshot = TokenSnapshot::from_value(usage, &CLAUDE_ALIASES);
        // Streamed copies repeat the usage; later ones are at least as complete.
        if snapshot.total() >= pending.usage.total() {
            pending.usage = snapshot;
        }
    }
    let Some(Value::Array(blocks)) = message.get("content") else {
        return;
    };
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("tool_use") | Some("server_tool_use") => {
                let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                let id = block.get("id").and_then(|v| v.as_str());
                let input = block.get("input").unwrap_or(&Value::Null);
                b.tools.record_call(name, id, input);
            }
            Some("thinking") | Some("redacted_thinking") => b.record_thinking(1),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PricingStatus, SessionRole};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn parse(body: &str) -> SessionStats {
        parse_at("session-1.jsonl", body)
    }

    fn parse_at(path: &str, body: &str) -> SessionStats {
        let parser = ClaudeParser::new(Arc::new(PricingTable::default()));
        let ctx = ParseContext {
            file_path: PathBuf::from(path),
            ..Default::default()
        };
        parser.parse_bytes(body.as_bytes(), &ctx)
    }

    const SESSION: &str = r#"{"type":"user","sessionId":"s1","cwd":"/work/app","gitBranch":"main","timestamp":"2025-10-01T10:00:00Z","thinkingMetadata":{"level":"high"},"message":{"role":"user","content":"Refactor the parser"}}
{"type":"assistant","timestamp":"2025-10-01T10:00:02Z","message":{"id":"msg_1","model":"claude-sonnet-4-5-20250929","content":[{"type":"thinking","thinking":"..."}],"usage":{"input_tokens":100,"output_tokens":10,"cache_read_input_tokens":50}}}
{"type":"assistant","timestamp":"2025-10-01T10:00:03Z","message":{"id":"msg_1","model":"claude-sonnet-4-5-20250929","content":[{"type":"tool_use","id":"t1","name":"Read","input":{}},{"type":"tool_use","id":"t2","name":"Read","input":{}},{"type":"tool_use","id":"t3","name":"Task","input":{"subagent_type":"Explore"}}],"usage":{"input_tokens":100,"output_tokens":40,"cache_read_input_tokens":50}}}
{"type":"user","timestamp":"2025-10-01T10:00:05Z","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t3","is_error":true,"content":"boom"}]}}
{"type":"system","timestamp":"2025-10-01T10:00:06Z","content":"compacted"}
not json at all
{"type":"user","timestamp":"2025-10-01T10:00:10Z","message":{"role":"user","content":"thanks"}}
{"type":"assistant","timestamp":"2025-10-01T10:00:13Z","message":{"id":"msg_2","model":"claude-sonnet-4-5-20250929","content":[{"type":"text","text":"done"}],"usage":{"input_tokens":200,"output_tokens":20,"cache_creation_input_tokens":30}}}
"#;

    #[test]
    fn streamed_lines_fold_into_one_message() {
        let stats = parse(SESSION);
        // 2 prompts + 2 assistant messages; tool_result-only and system lines excluded.
        assert_eq!(stats.message_count, 4);
        assert_eq!(stats.input_tokens, 300);
        assert_eq!(stats.output_tokens, 60);
        assert_eq!(stats.cache_read_tokens, 50);
        assert_eq!(stats.cache_write_tokens, 30);
        assert_eq!(stats.thinking_blocks, 1);
        assert_eq!(stats.pricing_status, PricingStatus::Priced);
        assert!(stats.total_cost > 0.0);
    }

    #[test]
    fn tools_and_errors_extracted() {
        let stats = parse(SESSION);
        assert_eq!(stats.tool_call_count, 3);
        assert_eq!(stats.tool_usage["Read"].count, 2);
        assert_eq!(stats.tool_usage["Task"].count, 1);
        assert_eq!(stats.tool_usage["Task"].error_count, 1);
        assert_eq!(stats.enriched_tools["Task"]["Explore"], 1);
        let expanded = stats.expanded_tool_usage();
        assert_eq!(expanded["agent:Explore"].count, 1);
        // msg_1 usage (100 + 40 + 50) split 2:1 between Read and Task.
        let attributed: u64 = stats.tool_usage.values().map(|t| t.total_tokens).sum();
        assert_eq!(attributed, 190);
    }

    #[test]
    fn metadata_and_latency() {
        let stats = parse(SESSION);
        assert_eq!(stats.project_path.as_deref(), Some("/work/app"));
        assert_eq!(stats.git_branch.as_deref(), Some("main"));
        assert_eq!(stats.effort_mode.as_deref(), Some("high"));
        assert_eq!(stats.session_role, SessionRole::Standalone);
        assert_eq!(stats.latency_sample_count, 2);
        assert_eq!(stats.avg_latency_ms, Some(2500));
        assert_eq!(stats.session_duration_ms, 13_000);
        assert_eq!(stats.auto_summary, "Refactor the parser");
        assert_eq!(stats.session_id, "session-1");
    }

    #[test]
    fn model_map_sums_to_totals() {
        let stats = parse(SESSION);
        let model = &stats.model_usage["claude-sonnet-4-5-20250929"];
        assert_eq!(model.input_tokens, stats.input_tokens);
        assert_eq!(model.output_tokens, stats.output_tokens);
        assert_eq!(model.message_count, 2);
        assert!((model.cost - stats.total_cost).abs() < 1e-12);
    }

    #[test]
    fn meta_lines_are_not_prompts() {
        let body = r#"{"type":"user","isMeta":true,"timestamp":"2025-10-01T10:00:00Z","message":{"role":"user","content":"<local-command-caveat>"}}
{"type":"user","timestamp":"2025-10-01T10:00:01Z","message":{"role":"user","content":"real question"}}
"#;
        let stats = parse(body);
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.auto_summary, "real question");
    }

    #[test]
    fn sidechain_and_subagent_dir_mark_role() {
        let body = r#"{"type":"user","isSidechain":true,"timestamp":"2025-10-01T10:00:00Z","message":{"role":"user","content":"explore"}}"#;
        assert_eq!(parse(body).session_role, SessionRole::Subagent);
        let plain = r#"{"type":"user","timestamp":"2025-10-01T10:00:00Z","message":{"role":"user","content":"explore"}}"#;
        assert_eq!(parse_at("/p/abc/subagents/x.jsonl", plain).session_role, SessionRole::Subagent);
        assert_eq!(parse_at("/p/agent-1234.jsonl", plain).session_role, SessionRole::Subagent);
    }

    #[test]
    fn garbage_yields_zero_stats() {
        let stats = parse("{{{{\nnope\n");
        assert_eq!(stats.message_count, 0);
        assert_eq!(stats.total_cost, 0.0);
        assert_eq!(stats.detected_provider, Provider::Claude);
    }

    /// The well-formed lines of `jsonl` as a top-level array and as an object
    /// with a `messages` array, each compact and pretty-printed.
    fn as_documents(jsonl: &str) -> Vec<String> {
        let records: Vec<Value> = jsonl
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        let array = Value::Array(records);
        let wrapped = serde_json::json!({ "sessionId": "s1", "messages": array.clone() });
        vec![
            array.to_string(),
            wrapped.to_string(),
            serde_json::to_string_pretty(&array).unwrap(),
            serde_json::to_string_pretty(&wrapped).unwrap(),
        ]
    }

    #[test]
    fn whole_document_shapes_match_jsonl() {
        let expected = parse(SESSION);
        for doc in as_documents(SESSION) {
            let stats = parse(&doc);
            assert_eq!(stats, expected);
            assert_eq!(stats.message_count, 4);
            assert_eq!(stats.input_tokens, 300);
        }
    }

    #[test]
    fn whole_documents_route_to_claude() {
        let registry = crate::providers::ProviderRegistry::default();
        for doc in as_documents(SESSION) {
            assert_eq!(registry.detect(doc.as_bytes()), Some(Provider::Claude));
        }
    }

    #[test]
    fn non_object_elements_are_skipped() {
        let body = r#"[1, "x", {"type":"user","uuid":"u1","timestamp":"2025-10-01T10:00:00Z","message":{"role":"user","content":"hello"}}]"#;
        let stats = parse(body);
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.auto_summary, "hello");
    }

    #[test]
    fn detect_recognizes_claude_lines() {
        let parser = ClaudeParser::new(Arc::new(PricingTable::default()));
        assert!(parser.detect(SESSION.as_bytes()));
        assert!(!parser.detect(br#"{"timestamp":"x","type":"session_meta","payload":{}}"#));
        assert!(!parser.detect(b"[1,2,3]"));
    }
}
