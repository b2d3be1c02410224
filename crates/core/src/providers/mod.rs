// crates/core/src/providers/mod.rs
//! Per-provider transcript parsers.
//!
//! Each CLI gets one [`TranscriptParser`] implementation. Parsers are pure
//! functions of the transcript bytes plus a small [`ParseContext`]; they never
//! fail. Any unreadable or malformed input yields zero-valued stats whose
//! `detected_provider` is the parser's own identity.
//!
//! [`ProviderRegistry`] holds one parser per provider and routes a file to the
//! parser whose `detect` accepts its head, falling back to the caller's hint.

pub mod claude;
pub mod codex;
pub mod gemini;

use crate::error::ParseError;
use crate::latency::{self, TurnSide};
use crate::normalize::{distribute_message_counts, TokenSnapshot, UsageAliases};
use crate::pricing::PricingTable;
use crate::summary;
use crate::tools::ToolTracker;
use crate::types::{ModelUsage, PricingStatus, Provider, SessionRole, SessionStats};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub use claude::ClaudeParser;
pub use codex::CodexParser;
pub use gemini::GeminiParser;

/// How many leading bytes `detect` gets to look at.
pub const DETECT_HEAD_BYTES: usize = 8 * 1024;

/// Facts about the transcript that live outside its content.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    pub file_path: PathBuf,
    /// Sub-agent type known to the caller (e.g. from a parent session's link).
    pub subagent_type: Option<String>,
    pub fs_created: Option<DateTime<Utc>>,
    pub fs_modified: Option<DateTime<Utc>>,
}

impl ParseContext {
    /// Context for `path` with filesystem times filled in when available.
    pub fn for_path(path: &Path) -> Self {
        let meta = std::fs::metadata(path).ok();
        let fs_created = meta
            .as_ref()
            .and_then(|m| m.created().ok())
            .map(DateTime::<Utc>::from);
        let fs_modified = meta
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);
        Self {
            file_path: path.to_path_buf(),
            subagent_type: None,
            fs_created,
            fs_modified,
        }
    }

    pub fn with_subagent_type(mut self, subagent_type: Option<String>) -> Self {
        self.subagent_type = subagent_type;
        self
    }
}

/// One provider's transcript format.
pub trait TranscriptParser: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether the leading bytes of a file look like this provider's format.
    fn detect(&self, head: &[u8]) -> bool;

    /// Parse an in-memory transcript. Total: never panics, never errors.
    fn parse_bytes(&self, bytes: &[u8], ctx: &ParseContext) -> SessionStats;

    /// Read and parse a transcript file. Unreadable files yield zero stats.
    fn parse(&self, path: &Path, ctx: &ParseContext) -> SessionStats {
        match read_transcript(path) {
            Ok(bytes) => self.parse_bytes(&bytes, ctx),
            Err(e) => {
                debug!(error = %e, "Transcript unreadable, returning zero stats");
                SessionStats::zero(self.provider(), path)
            }
        }
    }
}

fn read_transcript(path: &Path) -> Result<Vec<u8>, ParseError> {
    let bytes = std::fs::read(path).map_err(|e| ParseError::io(path, e))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::EmptyFile {
            path: path.to_path_buf(),
        });
    }
    Ok(bytes)
}

/// First non-empty line of `head`, parsed as JSON.
pub(crate) fn first_json_line(head: &[u8]) -> Option<serde_json::Value> {
    head.split(|b| *b == b'\n')
        .map(|line| line.trim_ascii())
        .find(|line| !line.is_empty())
        .and_then(|line| serde_json::from_slice(line).ok())
}

/// Records of a whole-document transcript: a top-level array, or an object
/// carrying a `messages` array. `None` for anything else, JSONL included.
pub(crate) fn document_records(bytes: &[u8]) -> Option<Vec<Value>> {
    let trimmed = bytes.trim_ascii();
    if !matches!(trimmed.first(), Some(b'[') | Some(b'{')) {
        return None;
    }
    // Multi-line JSONL stops at the end of its first record here.
    match serde_json::from_slice::<Value>(trimmed).ok()? {
        Value::Array(records) => Some(records),
        Value::Object(mut root) => match root.remove("messages") {
            Some(Value::Array(records)) => Some(records),
            _ => None,
        },
        _ => None,
    }
}

/// A record that could not be used, with its 1-based position.
#[derive(Debug)]
pub(crate) struct SkippedRecord {
    pub position: usize,
    pub reason: String,
}

/// Every record of a transcript in order, whether it is JSONL or one JSON
/// document. Blank lines are not records.
pub(crate) fn transcript_records(
    bytes: &[u8],
) -> Box<dyn Iterator<Item = Result<Value, SkippedRecord>> + '_> {
    if let Some(records) = document_records(bytes) {
        return Box::new(records.into_iter().enumerate().map(|(i, record)| {
            if record.is_object() {
                Ok(record)
            } else {
                Err(SkippedRecord {
                    position: i + 1,
                    reason: "element is not an object".to_string(),
                })
            }
        }));
    }
    Box::new(
        bytes
            .split(|c| *c == b'\n')
            .enumerate()
            .filter_map(|(i, line)| {
                let line = line.trim_ascii();
                if line.is_empty() {
                    return None;
                }
                Some(serde_json::from_slice(line).map_err(|e| SkippedRecord {
                    position: i + 1,
                    reason: e.to_string(),
                }))
            }),
    )
}

/// First record visible in `head`: the first JSONL line, or the first
/// element of a whole document even when `head` cuts the document short.
pub(crate) fn first_record(head: &[u8]) -> Option<Value> {
    let trimmed = head.trim_ascii_start();
    match trimmed.first()? {
        b'[' => first_element(&trimmed[1..]),
        b'{' => {
            if let Some(first) = first_json_line(trimmed) {
                return match first.get("messages") {
                    Some(Value::Array(messages)) => messages.first().cloned(),
                    _ => Some(first),
                };
            }
            // Pretty-printed object: step into its messages array.
            let key: &[u8] = b"\"messages\"";
            let at = trimmed.windows(key.len()).position(|w| w == key)?;
            let rest = trimmed[at + key.len()..]
                .trim_ascii_start()
                .strip_prefix(b":")?
                .trim_ascii_start()
                .strip_prefix(b"[")?;
            first_element(rest)
        }
        _ => None,
    }
}

fn first_element(after_bracket: &[u8]) -> Option<Value> {
    serde_json::Deserializer::from_slice(after_bracket)
        .into_iter::<Value>()
        .next()?
        .ok()
        .filter(|v| v.is_object())
}

/// Immutable set of parsers, one per provider.
///
/// Built once at startup and handed to whoever needs to parse; there is no
/// process-wide registry.
pub struct ProviderRegistry {
    parsers: Vec<Box<dyn TranscriptParser>>,
}

impl ProviderRegistry {
    /// Registry with the built-in parsers sharing one pricing table.
    ///
    /// Detection order matters: Codex and Gemini have distinctive markers,
    /// Claude is the most permissive and goes last.
    pub fn new(pricing: PricingTable) -> Self {
        let pricing = Arc::new(pricing);
        Self {
            parsers: vec![
                Box::new(CodexParser::new(pricing.clone())),
                Box::new(GeminiParser::new(pricing.clone())),
                Box::new(ClaudeParser::new(pricing)),
            ],
        }
    }

    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.parsers.iter().map(|p| p.provider())
    }

    pub fn parser_for(&self, provider: Provider) -> Option<&dyn TranscriptParser> {
        self.parsers
            .iter()
            .find(|p| p.provider() == provider)
            .map(|p| p.as_ref())
    }

    /// Provider whose format matches `head`, if any.
    pub fn detect(&self, head: &[u8]) -> Option<Provider> {
        self.parsers
            .iter()
            .find(|p| p.detect(head))
            .map(|p| p.provider())
    }

    /// Parse `path`. The provider detected from content wins over `hint`;
    /// an unrecognized hint resolves to [`Provider::PRIMARY`].
    pub fn parse(&self, path: &Path, hint: &str) -> SessionStats {
        self.parse_with(path, hint, ParseContext::for_path(path))
    }

    pub fn parse_with(&self, path: &Path, hint: &str, ctx: ParseContext) -> SessionStats {
        let hinted = Provider::from_str_or_primary(hint);
        let bytes = match read_transcript(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, provider = %hinted, "Transcript unreadable, returning zero stats");
                return SessionStats::zero(hinted, path);
            }
        };
        let head = &bytes[..bytes.len().min(DETECT_HEAD_BYTES)];
        let provider = self.detect(head).unwrap_or(hinted);
        if provider != hinted {
            debug!(path = %path.display(), hint = %hinted, detected = %provider, "Detected provider overrides hint");
        }
        match self.parser_for(provider) {
            Some(parser) => parser.parse_bytes(&bytes, &ctx),
            None => SessionStats::zero(provider, path),
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(PricingTable::default())
    }
}

// ---------------------------------------------------------------------------
// Shared accumulation
// ---------------------------------------------------------------------------

/// Accumulator every parser feeds while walking its records, then finalizes
/// into a [`SessionStats`].
pub(crate) struct SessionBuilder<'a> {
    stats: SessionStats,
    pricing: &'a PricingTable,
    aliases: &'static UsageAliases,
    pub tools: ToolTracker,
    turns: Vec<(TurnSide, Option<DateTime<Utc>>)>,
    first_ts: Option<DateTime<Utc>>,
    last_ts: Option<DateTime<Utc>>,
    first_prompt: Option<String>,
    fs_created: Option<DateTime<Utc>>,
    fs_modified: Option<DateTime<Utc>>,
    pub malformed_records: u64,
}

impl<'a> SessionBuilder<'a> {
    pub fn new(provider: Provider, pricing: &'a PricingTable, ctx: &ParseContext) -> Self {
        let mut stats = SessionStats::zero(provider, &ctx.file_path);
        if let Some(t) = ctx.subagent_type.as_deref().filter(|t| !t.is_empty()) {
            stats.session_role = SessionRole::Subagent;
            stats.subagent_type = Some(t.to_string());
        }
        Self {
            stats,
            pricing,
            aliases: UsageAliases::for_provider(provider),
            tools: ToolTracker::new(),
            turns: Vec::new(),
            first_ts: None,
            last_ts: None,
            first_prompt: None,
            fs_created: ctx.fs_created,
            fs_modified: ctx.fs_modified,
            malformed_records: 0,
        }
    }

    pub fn set_session_id(&mut self, id: &str) {
        let id = id.trim();
        if !id.is_empty() {
            self.stats.session_id = id.to_string();
        }
    }

    pub fn set_project_path(&mut self, path: &str) {
        if self.stats.project_path.is_none() && !path.trim().is_empty() {
            self.stats.project_path = Some(path.trim().to_string());
        }
    }

    pub fn set_git_branch(&mut self, branch: &str) {
        if self.stats.git_branch.is_none() && !branch.trim().is_empty() {
            self.stats.git_branch = Some(branch.trim().to_string());
        }
    }

    pub fn has_git_branch(&self) -> bool {
        self.stats.git_branch.is_some()
    }

    /// Latest reasoning-effort setting wins.
    pub fn set_effort_mode(&mut self, effort: &str) {
        let effort = effort.trim();
        if !effort.is_empty() {
            self.stats.effort_mode = Some(effort.to_ascii_lowercase());
        }
    }

    pub fn mark_subagent(&mut self, subagent_type: Option<&str>) {
        self.stats.session_role = SessionRole::Subagent;
        if let Some(t) = subagent_type.map(str::trim).filter(|t| !t.is_empty()) {
            if self.stats.subagent_type.is_none() {
                self.stats.subagent_type = Some(t.to_string());
            }
        }
    }

    pub fn record_thinking(&mut self, blocks: u64) {
        self.stats.thinking_blocks += blocks;
    }

    /// A timestamp from any record, conversational or not.
    pub fn observe_timestamp(&mut self, ts: Option<DateTime<Utc>>) {
        let Some(ts) = ts else { return };
        if self.first_ts.map_or(true, |f| ts < f) {
            self.first_ts = Some(ts);
        }
        if self.last_ts.map_or(true, |l| ts > l) {
            self.last_ts = Some(ts);
        }
    }

    /// One conversational record.
    pub fn record_message(&mut self, side: TurnSide, ts: Option<DateTime<Utc>>) {
        self.stats.message_count += 1;
        self.turns.push((side, ts));
        self.observe_timestamp(ts);
    }

    /// Candidate for the auto summary. The first real prompt sticks.
    pub fn record_prompt(&mut self, text: &str) {
        if self.first_prompt.is_some() || text.trim().is_empty() || summary::is_injected_context(text) {
            return;
        }
        self.first_prompt = Some(text.to_string());
    }

    /// One usage snapshot reported for `model`.
    ///
    /// Tokens always count toward session totals. Cost comes from the pricing
    /// table: a missing model name is priced as the provider default, a model
    /// the table does not know is tracked as unpriced. The snapshot is also
    /// split over the tool calls made since the previous snapshot.
    pub fn record_usage(&mut self, model: Option<&str>, snapshot: TokenSnapshot, messages: u64) {
        self.tools.attribute_turn(&snapshot);
        if snapshot.is_empty() {
            return;
        }
        let provider = self.stats.detected_provider;
        let model = model.map(str::trim).filter(|m| !m.is_empty());
        let key = model.unwrap_or_else(|| PricingTable::default_model(provider));
        let cost = match self.pricing.lookup(key) {
            Some(p) => p.cost_of(&snapshot, self.aliases),
            None => {
                self.stats.pricing_status = PricingStatus::Unpriced;
                self.stats.unpriced_tokens += snapshot.total();
                self.stats.unpriced_messages += messages.max(1);
                0.0
            }
        };

        let s = &mut self.stats;
        s.input_tokens += snapshot.input;
        s.output_tokens += snapshot.output;
        s.cache_read_tokens += snapshot.cache_read;
        s.cache_write_tokens += snapshot.cache_write;
        s.reasoning_tokens += snapshot.reasoning;
        s.total_cost += cost;

        s.model_usage.entry(key.to_string()).or_default().add(&ModelUsage {
            input_tokens: snapshot.input,
            output_tokens: snapshot.output,
            reasoning_tokens: snapshot.reasoning,
            cache_read_tokens: snapshot.cache_read,
            cache_write_tokens: snapshot.cache_write,
            cost,
            message_count: messages,
        });
    }

    pub fn finish(self) -> SessionStats {
        let mut stats = self.stats;
        if self.malformed_records > 0 {
            debug!(
                path = %stats.file_path,
                skipped = self.malformed_records,
                "Skipped malformed transcript records"
            );
        }

        distribute_message_counts(&mut stats.model_usage, stats.message_count);

        let session_tokens = stats.total_tokens();
        let (tool_usage, enriched, calls) = self.tools.finish(session_tokens, stats.total_cost);
        stats.tool_usage = tool_usage;
        stats.enriched_tools = enriched;
        stats.tool_call_count = calls;

        let lat = latency::summarize(&latency::turn_latencies(&self.turns));
        stats.avg_latency_ms = lat.avg_ms;
        stats.p50_latency_ms = lat.p50_ms;
        stats.p95_latency_ms = lat.p95_ms;
        stats.max_latency_ms = lat.max_ms;
        stats.latency_sample_count = lat.sample_count;

        stats.session_duration_ms =
            latency::session_duration_ms(self.first_ts, self.last_ts, self.fs_created, self.fs_modified);
        stats.created_at = self.first_ts.or(self.fs_created);
        stats.modified_at = self.last_ts.or(self.fs_modified);

        stats.auto_summary = summary::auto_summary(
            self.first_prompt.as_deref(),
            stats.message_count,
            stats.tool_call_count,
        );
        stats
    }
}

/// Concatenated text of a content value: a plain string, or an array of
/// blocks carrying `text`.
pub(crate) fn content_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                serde_json::Value::String(s) => Some(s.as_str()),
                other => other.get("text").and_then(|t| t.as_str()),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
