//! Fixtures shared by the query integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use tokenscope_core::{ModelUsage, Provider, SessionRole, SessionStats, ToolUsage};

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0)
        .single()
        .expect("valid timestamp")
}

/// A priced session with one model entry carrying all of its tokens and cost.
pub fn make_session(
    id: &str,
    provider: Provider,
    created_at: DateTime<Utc>,
    input_tokens: u64,
    cost: f64,
) -> SessionStats {
    let mut s = SessionStats::zero(provider, Path::new(&format!("/transcripts/{id}.jsonl")));
    s.session_id = id.to_string();
    s.message_count = 4;
    s.tool_call_count = 0;
    s.input_tokens = input_tokens;
    s.total_cost = cost;
    s.created_at = Some(created_at);
    s.modified_at = Some(created_at + chrono::Duration::minutes(30));
    s.session_duration_ms = 30 * 60 * 1000;
    let model = match provider {
        Provider::Claude => "claude-sonnet-4-5",
        Provider::Codex => "gpt-5",
        Provider::Gemini => "gemini-2.5-pro",
    };
    s.model_usage.insert(
        model.to_string(),
        ModelUsage {
            input_tokens,
            cost,
            message_count: 2,
            ..Default::default()
        },
    );
    s
}

pub fn with_tool(mut s: SessionStats, name: &str, count: u64, tokens: u64) -> SessionStats {
    s.tool_call_count += count;
    s.tool_usage.insert(
        name.to_string(),
        ToolUsage {
            count,
            total_tokens: tokens,
            input_tokens: tokens,
            ..Default::default()
        },
    );
    s
}

pub fn as_subagent(mut s: SessionStats, kind: &str) -> SessionStats {
    s.session_role = SessionRole::Subagent;
    s.subagent_type = Some(kind.to_string());
    s
}
