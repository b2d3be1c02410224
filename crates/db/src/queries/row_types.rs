// crates/db/src/queries/row_types.rs
// Internal row types and transaction-accepting helper functions.

use crate::DbResult;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::{Row, Sqlite, Transaction};
use tokenscope_core::{PricingStatus, Provider, SessionRole, SessionStats};
use tracing::debug;

use super::types::SessionRecord;

/// Column list shared by every full-row session SELECT.
pub(crate) const SESSION_COLUMNS: &str = r#"
    id, project_id, provider, detected_provider, file_path,
    message_count, tool_call_count,
    input_tokens, output_tokens, cache_read_tokens, cache_write_tokens,
    reasoning_tokens, thinking_blocks, total_cost,
    pricing_status, unpriced_tokens, unpriced_messages,
    model_usage, tool_usage, enriched_tools,
    created_at, modified_at, session_duration_ms,
    avg_latency_ms, p50_latency_ms, p95_latency_ms, max_latency_ms, latency_sample_count,
    session_role, subagent_type, effort_mode, git_branch, project_path,
    auto_summary, compressed_at, indexed_at
"#;

pub(crate) fn to_unix(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp())
}

fn from_unix(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Parse a JSON text column, falling back to the empty value on bad input.
pub(crate) fn parse_json_column<T: DeserializeOwned + Default>(
    session_id: &str,
    column: &str,
    raw: &str,
) -> T {
    match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            debug!(session_id, column, error = %e, "Skipping malformed JSON column");
            T::default()
        }
    }
}

#[derive(Debug)]
pub(crate) struct SessionRow {
    id: String,
    project_id: String,
    provider: String,
    detected_provider: String,
    file_path: String,
    message_count: i64,
    tool_call_count: i64,
    input_tokens: i64,
    output_tokens: i64,
    cache_read_tokens: i64,
    cache_write_tokens: i64,
    reasoning_tokens: i64,
    thinking_blocks: i64,
    total_cost: f64,
    pricing_status: String,
    unpriced_tokens: i64,
    unpriced_messages: i64,
    model_usage: String,
    tool_usage: String,
    enriched_tools: String,
    created_at: Option<i64>,
    modified_at: Option<i64>,
    session_duration_ms: i64,
    avg_latency_ms: Option<i64>,
    p50_latency_ms: Option<i64>,
    p95_latency_ms: Option<i64>,
    max_latency_ms: Option<i64>,
    latency_sample_count: i64,
    session_role: String,
    subagent_type: Option<String>,
    effort_mode: Option<String>,
    git_branch: Option<String>,
    project_path: Option<String>,
    auto_summary: String,
    compressed_at: Option<i64>,
    indexed_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for SessionRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            provider: row.try_get("provider")?,
            detected_provider: row.try_get("detected_provider")?,
            file_path: row.try_get("file_path")?,
            message_count: row.try_get("message_count")?,
            tool_call_count: row.try_get("tool_call_count")?,
            input_tokens: row.try_get("input_tokens")?,
            output_tokens: row.try_get("output_tokens")?,
            cache_read_tokens: row.try_get("cache_read_tokens")?,
            cache_write_tokens: row.try_get("cache_write_tokens")?,
            reasoning_tokens: row.try_get("reasoning_tokens")?,
            thinking_blocks: row.try_get("thinking_blocks")?,
            total_cost: row.try_get("total_cost")?,
            pricing_status: row.try_get("pricing_status")?,
            unpriced_tokens: row.try_get("unpriced_tokens")?,
            unpriced_messages: row.try_get("unpriced_messages")?,
            model_usage: row.try_get("model_usage")?,
            tool_usage: row.try_get("tool_usage")?,
            enriched_tools: row.try_get("enriched_tools")?,
            created_at: row.try_get("created_at")?,
            modified_at: row.try_get("modified_at")?,
            session_duration_ms: row.try_get("session_duration_ms")?,
            avg_latency_ms: row.try_get("avg_latency_ms")?,
            p50_latency_ms: row.try_get("p50_latency_ms")?,
            p95_latency_ms: row.try_get("p95_latency_ms")?,
            max_latency_ms: row.try_get("max_latency_ms")?,
            latency_sample_count: row.try_get("latency_sample_count")?,
            session_role: row.try_get("session_role")?,
            subagent_type: row.try_get("subagent_type")?,
            effort_mode: row.try_get("effort_mode")?,
            git_branch: row.try_get("git_branch")?,
            project_path: row.try_get("project_path")?,
            auto_summary: row.try_get("auto_summary")?,
            compressed_at: row.try_get("compressed_at")?,
            indexed_at: row.try_get("indexed_at")?,
        })
    }
}

impl SessionRow {
    pub(crate) fn into_record(self) -> SessionRecord {
        let n = |v: i64| v.max(0) as u64;
        let opt = |v: Option<i64>| v.map(|x| x.max(0) as u64);
        let stats = SessionStats {
            model_usage: parse_json_column(&self.id, "model_usage", &self.model_usage),
            tool_usage: parse_json_column(&self.id, "tool_usage", &self.tool_usage),
            enriched_tools: parse_json_column(&self.id, "enriched_tools", &self.enriched_tools),
            provider: Provider::from_str_or_primary(&self.provider),
            detected_provider: Provider::from_str_or_primary(&self.detected_provider),
            file_path: self.file_path,
            message_count: n(self.message_count),
            tool_call_count: n(self.tool_call_count),
            input_tokens: n(self.input_tokens),
            output_tokens: n(self.output_tokens),
            cache_read_tokens: n(self.cache_read_tokens),
            cache_write_tokens: n(self.cache_write_tokens),
            reasoning_tokens: n(self.reasoning_tokens),
            thinking_blocks: n(self.thinking_blocks),
            total_cost: self.total_cost,
            pricing_status: if self.pricing_status == PricingStatus::Unpriced.as_str() {
                PricingStatus::Unpriced
            } else {
                PricingStatus::Priced
            },
            unpriced_tokens: n(self.unpriced_tokens),
            unpriced_messages: n(self.unpriced_messages),
            created_at: from_unix(self.created_at),
            modified_at: from_unix(self.modified_at),
            session_duration_ms: n(self.session_duration_ms),
            avg_latency_ms: opt(self.avg_latency_ms),
            p50_latency_ms: opt(self.p50_latency_ms),
            p95_latency_ms: opt(self.p95_latency_ms),
            max_latency_ms: opt(self.max_latency_ms),
            latency_sample_count: n(self.latency_sample_count),
            session_role: SessionRole::parse(&self.session_role).unwrap_or_default(),
            subagent_type: self.subagent_type,
            effort_mode: self.effort_mode,
            git_branch: self.git_branch,
            project_path: self.project_path,
            auto_summary: self.auto_summary,
            session_id: self.id,
        };
        SessionRecord {
            stats,
            project_id: self.project_id,
            compressed_at: self.compressed_at,
            indexed_at: self.indexed_at,
        }
    }
}

// ============================================================================
// Transaction-accepting helpers
// ============================================================================

/// Create the project row if missing. Existing display name and path are kept
/// unless the stored path is empty.
pub(crate) async fn ensure_project_tx(
    tx: &mut Transaction<'_, Sqlite>,
    project_id: &str,
    project_path: Option<&str>,
) -> DbResult<()> {
    let display_name = project_path
        .and_then(|p| std::path::Path::new(p).file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| project_id.to_string());

    sqlx::query(
        r#"
        INSERT INTO projects (id, display_name, path) VALUES (?1, ?2, ?3)
        ON CONFLICT(id) DO UPDATE SET path = COALESCE(projects.path, excluded.path)
        "#,
    )
    .bind(project_id)
    .bind(display_name)
    .bind(project_path)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Recompute a project's live aggregate from its non-compressed sessions.
/// `last_activity_at` becomes NULL when none remain.
pub(crate) async fn recompute_project_tx(
    tx: &mut Transaction<'_, Sqlite>,
    project_id: &str,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE projects SET
            session_count = (
                SELECT COUNT(*) FROM sessions
                WHERE project_id = ?1 AND compressed_at IS NULL),
            total_tokens = (
                SELECT COALESCE(SUM(total_tokens), 0) FROM sessions
                WHERE project_id = ?1 AND compressed_at IS NULL),
            total_cost = (
                SELECT COALESCE(SUM(total_cost), 0.0) FROM sessions
                WHERE project_id = ?1 AND compressed_at IS NULL),
            last_activity_at = (
                SELECT MAX(COALESCE(modified_at, created_at)) FROM sessions
                WHERE project_id = ?1 AND compressed_at IS NULL)
        WHERE id = ?1
        "#,
    )
    .bind(project_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Distinct project ids owning any of `ids`.
pub(crate) async fn projects_of_tx(
    tx: &mut Transaction<'_, Sqlite>,
    ids: &[String],
) -> DbResult<Vec<String>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = sqlx::QueryBuilder::<Sqlite>::new(
        "SELECT DISTINCT project_id FROM sessions WHERE id IN (",
    );
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(id.as_str());
    }
    sep.push_unseparated(")");
    let rows: Vec<(String,)> = qb.build_query_as().fetch_all(&mut **tx).await?;
    Ok(rows.into_iter().map(|(p,)| p).collect())
}
