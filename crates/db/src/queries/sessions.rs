// crates/db/src/queries/sessions.rs
// Session upsert, lookup, listing, compression, and bulk deletion.

use super::row_types::{
    ensure_project_tx, projects_of_tx, recompute_project_tx, to_unix, SessionRow, SESSION_COLUMNS,
};
use super::types::{DeleteOutcome, ListSessionsParams, SessionRecord, SessionSummary};
use crate::filter::{bind_as, check_arity};
use crate::{Database, DbResult};
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tokenscope_core::SessionStats;
use tracing::{debug, info};

impl Database {
    /// Insert or wholly replace a session row, then refresh the owning
    /// project aggregate (and the previous owner's, if it moved).
    ///
    /// Every column is replaced except `compressed_at`, so re-indexing an
    /// archived session keeps it archived. Re-upserting identical stats into
    /// the same project writes nothing.
    pub async fn upsert_session(&self, stats: &SessionStats, project_id: &str) -> DbResult<()> {
        let mut tx = self.pool().begin().await?;
        upsert_session_tx(&mut tx, stats, project_id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> DbResult<Option<SessionRecord>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(SessionRow::into_record))
    }

    /// Newest first. Compressed sessions are excluded by default.
    pub async fn list_sessions(&self, params: &ListSessionsParams) -> DbResult<Vec<SessionSummary>> {
        let mut sql = String::from(
            r#"
            SELECT id, project_id, provider, message_count, total_tokens, total_cost,
                   created_at, modified_at, session_role, auto_summary, compressed_at
            FROM sessions
            WHERE 1=1"#,
        );
        if !params.include_compressed {
            sql.push_str(" AND compressed_at IS NULL");
        }
        sql.push_str(&params.filter.and_sql());
        check_arity(&sql, &params.filter.params)?;
        sql.push_str(" ORDER BY COALESCE(modified_at, created_at) DESC, id ASC LIMIT ? OFFSET ?");

        let rows: Vec<SessionSummary> = bind_as(sqlx::query_as(&sql), &params.filter.params)
            .bind(params.limit.max(0))
            .bind(params.offset.max(0))
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    /// Soft-archive sessions. Returns how many were newly compressed.
    pub async fn compress_sessions(&self, ids: &[String]) -> DbResult<u64> {
        self.set_compressed(ids, Some(Utc::now().timestamp())).await
    }

    /// Undo [`Database::compress_sessions`]. Returns how many were restored.
    pub async fn restore_sessions(&self, ids: &[String]) -> DbResult<u64> {
        self.set_compressed(ids, None).await
    }

    async fn set_compressed(&self, ids: &[String], at: Option<i64>) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool().begin().await?;
        let projects = projects_of_tx(&mut tx, ids).await?;

        let mut qb = sqlx::QueryBuilder::<Sqlite>::new("UPDATE sessions SET compressed_at = ");
        qb.push_bind(at);
        qb.push(" WHERE id IN (");
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(id.as_str());
        }
        sep.push_unseparated(")");
        qb.push(if at.is_some() {
            " AND compressed_at IS NULL"
        } else {
            " AND compressed_at IS NOT NULL"
        });
        let changed = qb.build().execute(&mut *tx).await?.rows_affected();

        for project in &projects {
            recompute_project_tx(&mut tx, project).await?;
        }
        tx.commit().await?;

        debug!(changed, compress = at.is_some(), "Updated compression state");
        Ok(changed)
    }

    /// Delete sessions and everything that references them.
    ///
    /// Link rows touching a deleted id are removed. Review artifacts are
    /// shrunk to their surviving ids, or removed when none survive. Indexer
    /// state is kept so an unchanged transcript is not re-imported.
    pub async fn delete_sessions(&self, ids: &[String]) -> DbResult<DeleteOutcome> {
        let mut outcome = DeleteOutcome::default();
        if ids.is_empty() {
            return Ok(outcome);
        }
        let mut tx = self.pool().begin().await?;
        let projects = projects_of_tx(&mut tx, ids).await?;

        // Links: either end.
        let mut qb = sqlx::QueryBuilder::<Sqlite>::new(
            "DELETE FROM session_links WHERE parent_session_id IN (",
        );
        push_id_list(&mut qb, ids);
        qb.push(" OR child_session_id IN (");
        push_id_list(&mut qb, ids);
        outcome.links_detached = qb.build().execute(&mut *tx).await?.rows_affected();

        let (updated, removed) = detach_from_reviews_tx(&mut tx, ids).await?;
        outcome.artifacts_updated = updated;
        outcome.artifacts_removed = removed;

        let mut qb = sqlx::QueryBuilder::<Sqlite>::new("DELETE FROM sessions WHERE id IN (");
        push_id_list(&mut qb, ids);
        outcome.sessions_deleted = qb.build().execute(&mut *tx).await?.rows_affected();

        for project in &projects {
            recompute_project_tx(&mut tx, project).await?;
        }
        tx.commit().await?;

        info!(
            sessions = outcome.sessions_deleted,
            links = outcome.links_detached,
            reviews_updated = outcome.artifacts_updated,
            reviews_removed = outcome.artifacts_removed,
            "Deleted sessions"
        );
        Ok(outcome)
    }

    pub async fn session_count(&self) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }
}

fn push_id_list<'a>(qb: &mut sqlx::QueryBuilder<'a, Sqlite>, ids: &'a [String]) {
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(id.as_str());
    }
    sep.push_unseparated(")");
}

pub(crate) async fn upsert_session_tx(
    tx: &mut Transaction<'_, Sqlite>,
    stats: &SessionStats,
    project_id: &str,
) -> DbResult<()> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
    let previous: Option<SessionRecord> = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(&stats.session_id)
        .fetch_optional(&mut **tx)
        .await?
        .map(SessionRow::into_record);

    // Identical content leaves the row, `indexed_at` included, untouched.
    if let Some(prev) = &previous {
        if prev.project_id == project_id && prev.stats == stored_form(stats) {
            debug!(session_id = %stats.session_id, "Session unchanged, skipping upsert");
            return Ok(());
        }
    }

    ensure_project_tx(tx, project_id, stats.project_path.as_deref()).await?;

    let model_usage = serde_json::to_string(&stats.model_usage).unwrap_or_else(|_| "{}".into());
    let tool_usage = serde_json::to_string(&stats.tool_usage).unwrap_or_else(|_| "{}".into());
    let enriched = serde_json::to_string(&stats.enriched_tools).unwrap_or_else(|_| "{}".into());
    let opt = |v: Option<u64>| v.map(|x| x as i64);

    sqlx::query(
        r#"
        INSERT INTO sessions (
            id, project_id, provider, detected_provider, file_path,
            message_count, tool_call_count,
            input_tokens, output_tokens, cache_read_tokens, cache_write_tokens,
            reasoning_tokens, thinking_blocks, total_tokens, total_cost,
            pricing_status, unpriced_tokens, unpriced_messages,
            model_usage, tool_usage, enriched_tools,
            created_at, modified_at, session_duration_ms,
            avg_latency_ms, p50_latency_ms, p95_latency_ms, max_latency_ms, latency_sample_count,
            session_role, subagent_type, effort_mode, git_branch, project_path,
            auto_summary, indexed_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
            ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34,
            ?35, ?36
        )
        ON CONFLICT(id) DO UPDATE SET
            project_id = excluded.project_id,
            provider = excluded.provider,
            detected_provider = excluded.detected_provider,
            file_path = excluded.file_path,
            message_count = excluded.message_count,
            tool_call_count = excluded.tool_call_count,
            input_tokens = excluded.input_tokens,
            output_tokens = excluded.output_tokens,
            cache_read_tokens = excluded.cache_read_tokens,
            cache_write_tokens = excluded.cache_write_tokens,
            reasoning_tokens = excluded.reasoning_tokens,
            thinking_blocks = excluded.thinking_blocks,
            total_tokens = excluded.total_tokens,
            total_cost = excluded.total_cost,
            pricing_status = excluded.pricing_status,
            unpriced_tokens = excluded.unpriced_tokens,
            unpriced_messages = excluded.unpriced_messages,
            model_usage = excluded.model_usage,
            tool_usage = excluded.tool_usage,
            enriched_tools = excluded.enriched_tools,
            created_at = excluded.created_at,
            modified_at = excluded.modified_at,
            session_duration_ms = excluded.session_duration_ms,
            avg_latency_ms = excluded.avg_latency_ms,
            p50_latency_ms = excluded.p50_latency_ms,
            p95_latency_ms = excluded.p95_latency_ms,
            max_latency_ms = excluded.max_latency_ms,
            latency_sample_count = excluded.latency_sample_count,
            session_role = excluded.session_role,
            subagent_type = excluded.subagent_type,
            effort_mode = excluded.effort_mode,
            git_branch = excluded.git_branch,
            project_path = excluded.project_path,
            auto_summary = excluded.auto_summary,
            indexed_at = excluded.indexed_at
        "#,
    )
    .bind(&stats.session_id)
    .bind(project_id)
    .bind(stats.provider.as_str())
    .bind(stats.detected_provider.as_str())
    .bind(&stats.file_path)
    .bind(stats.message_count as i64)
    .bind(stats.tool_call_count as i64)
    .bind(stats.input_tokens as i64)
    .bind(stats.output_tokens as i64)
    .bind(stats.cache_read_tokens as i64)
    .bind(stats.cache_write_tokens as i64)
    .bind(stats.reasoning_tokens as i64)
    .bind(stats.thinking_blocks as i64)
    .bind(stats.total_tokens() as i64)
    .bind(stats.total_cost)
    .bind(stats.pricing_status.as_str())
    .bind(stats.unpriced_tokens as i64)
    .bind(stats.unpriced_messages as i64)
    .bind(model_usage)
    .bind(tool_usage)
    .bind(enriched)
    .bind(to_unix(stats.created_at))
    .bind(to_unix(stats.modified_at))
    .bind(stats.session_duration_ms as i64)
    .bind(opt(stats.avg_latency_ms))
    .bind(opt(stats.p50_latency_ms))
    .bind(opt(stats.p95_latency_ms))
    .bind(opt(stats.max_latency_ms))
    .bind(stats.latency_sample_count as i64)
    .bind(stats.session_role.as_str())
    .bind(stats.subagent_type.as_deref())
    .bind(stats.effort_mode.as_deref())
    .bind(stats.git_branch.as_deref())
    .bind(stats.project_path.as_deref())
    .bind(&stats.auto_summary)
    .bind(Utc::now().timestamp())
    .execute(&mut **tx)
    .await?;

    recompute_project_tx(tx, project_id).await?;
    if let Some(prev) = previous {
        if prev.project_id != project_id {
            recompute_project_tx(tx, &prev.project_id).await?;
        }
    }
    Ok(())
}

/// `stats` as it reads back from storage: timestamps keep whole seconds.
fn stored_form(stats: &SessionStats) -> SessionStats {
    let seconds = |t: Option<DateTime<Utc>>| t.and_then(|t| DateTime::from_timestamp(t.timestamp(), 0));
    let mut stored = stats.clone();
    stored.created_at = seconds(stats.created_at);
    stored.modified_at = seconds(stats.modified_at);
    stored
}

/// Shrink review artifacts that reference `ids`. Returns `(updated, removed)`.
/// Rows whose `session_ids` is not a JSON string array are left alone.
async fn detach_from_reviews_tx(
    tx: &mut Transaction<'_, Sqlite>,
    ids: &[String],
) -> DbResult<(u64, u64)> {
    let reviews: Vec<(i64, String)> = sqlx::query_as("SELECT id, session_ids FROM session_reviews")
        .fetch_all(&mut **tx)
        .await?;
    let now = Utc::now().timestamp();
    let (mut updated, mut removed) = (0u64, 0u64);

    for (review_id, raw) in reviews {
        let members: Vec<String> = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                debug!(review_id, error = %e, "Skipping review with malformed session list");
                continue;
            }
        };
        let remaining: Vec<String> = members
            .iter()
            .filter(|m| !ids.contains(m))
            .cloned()
            .collect();
        if remaining.len() == members.len() {
            continue;
        }
        if remaining.is_empty() {
            sqlx::query("DELETE FROM session_reviews WHERE id = ?1")
                .bind(review_id)
                .execute(&mut **tx)
                .await?;
            removed += 1;
        } else {
            let json = serde_json::to_string(&remaining).unwrap_or_else(|_| "[]".into());
            sqlx::query("UPDATE session_reviews SET session_ids = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(json)
                .bind(now)
                .bind(review_id)
                .execute(&mut **tx)
                .await?;
            updated += 1;
        }
    }
    Ok((updated, removed))
}
