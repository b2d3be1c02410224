// crates/core/src/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// The CLI that produced a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Codex,
    Gemini,
}

impl Provider {
    /// Provider assumed when a caller-supplied identifier is not recognized.
    pub const PRIMARY: Provider = Provider::Claude;

    pub const ALL: [Provider; 3] = [Provider::Claude, Provider::Codex, Provider::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Codex => "codex",
            Provider::Gemini => "gemini",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Claude => "Claude",
            Provider::Codex => "Codex",
            Provider::Gemini => "Gemini",
        }
    }

    /// Strict lookup. Accepts a few common aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "claude-code" | "claude_code" | "anthropic" => Some(Provider::Claude),
            "codex" | "openai" | "codex-cli" => Some(Provider::Codex),
            "gemini" | "gemini-cli" | "google" => Some(Provider::Gemini),
            _ => None,
        }
    }

    /// Lenient lookup: unknown identifiers default to [`Provider::PRIMARY`].
    pub fn from_str_or_primary(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::PRIMARY)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a session was started by a user or delegated by another session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    #[default]
    Standalone,
    Subagent,
}

impl SessionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionRole::Standalone => "standalone",
            SessionRole::Subagent => "subagent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standalone" => Some(SessionRole::Standalone),
            "subagent" => Some(SessionRole::Subagent),
            _ => None,
        }
    }
}

/// Whether every token in the session could be priced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingStatus {
    #[default]
    Priced,
    Unpriced,
}

impl PricingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingStatus::Priced => "priced",
            PricingStatus::Unpriced => "unpriced",
        }
    }
}

/// Per-model token and cost totals within one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost: f64,
    pub message_count: u64,
}

impl ModelUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_read_tokens + self.cache_write_tokens
    }

    pub fn add(&mut self, other: &ModelUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
        self.cost += other.cost;
        self.message_count += other.message_count;
    }
}

/// Per-tool invocation, token, and cost totals within one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolUsage {
    pub count: u64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub estimated_cost: f64,
    pub error_count: u64,
}

impl ToolUsage {
    pub fn add(&mut self, other: &ToolUsage) {
        self.count += other.count;
        self.total_tokens += other.total_tokens;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
        self.estimated_cost += other.estimated_cost;
        self.error_count += other.error_count;
    }
}

pub type ModelUsageMap = BTreeMap<String, ModelUsage>;
pub type ToolUsageMap = BTreeMap<String, ToolUsage>;
/// Composite tool name → sub-target → call count.
pub type EnrichedTools = BTreeMap<String, BTreeMap<String, u64>>;

/// Canonical per-session statistics record, identical in shape for every provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub provider: Provider,
    pub detected_provider: Provider,
    pub file_path: String,

    pub message_count: u64,
    pub tool_call_count: u64,

    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub reasoning_tokens: u64,
    pub thinking_blocks: u64,
    pub total_cost: f64,

    pub pricing_status: PricingStatus,
    pub unpriced_tokens: u64,
    pub unpriced_messages: u64,

    pub model_usage: ModelUsageMap,
    /// Raw tool map. Composite delegation/skill buckets are kept whole here;
    /// see [`SessionStats::expanded_tool_usage`].
    pub tool_usage: ToolUsageMap,
    pub enriched_tools: EnrichedTools,

    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub session_duration_ms: u64,
    pub avg_latency_ms: Option<u64>,
    pub p50_latency_ms: Option<u64>,
    pub p95_latency_ms: Option<u64>,
    pub max_latency_ms: Option<u64>,
    pub latency_sample_count: u64,

    pub session_role: SessionRole,
    pub subagent_type: Option<String>,
    pub effort_mode: Option<String>,
    pub git_branch: Option<String>,
    pub project_path: Option<String>,

    pub auto_summary: String,
}

impl SessionStats {
    /// Zero-valued record: what a missing, empty, or unreadable transcript yields.
    pub fn zero(provider: Provider, file_path: &Path) -> Self {
        let session_id = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            session_id,
            provider,
            detected_provider: provider,
            file_path: file_path.to_string_lossy().to_string(),
            message_count: 0,
            tool_call_count: 0,
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_write_tokens: 0,
            reasoning_tokens: 0,
            thinking_blocks: 0,
            total_cost: 0.0,
            pricing_status: PricingStatus::Priced,
            unpriced_tokens: 0,
            unpriced_messages: 0,
            model_usage: ModelUsageMap::new(),
            tool_usage: ToolUsageMap::new(),
            enriched_tools: EnrichedTools::new(),
            created_at: None,
            modified_at: None,
            session_duration_ms: 0,
            avg_latency_ms: None,
            p50_latency_ms: None,
            p95_latency_ms: None,
            max_latency_ms: None,
            latency_sample_count: 0,
            session_role: SessionRole::Standalone,
            subagent_type: None,
            effort_mode: None,
            git_branch: None,
            project_path: None,
            auto_summary: String::new(),
        }
    }

    /// input + output + cache read + cache write.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_read_tokens + self.cache_write_tokens
    }

    /// Tool map with composite delegation/skill buckets replaced by one
    /// entry per sub-target. Totals are conserved exactly.
    pub fn expanded_tool_usage(&self) -> ToolUsageMap {
        crate::tools::expand_composites(&self.tool_usage, &self.enriched_tools)
    }
}
