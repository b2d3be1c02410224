// crates/db/src/queries/projects.rs
// Project aggregates, session links, and review artifacts.

use super::row_types::recompute_project_tx;
use super::types::{ProjectRow, SessionLink, SessionReview};
use crate::{Database, DbResult};
use chrono::Utc;

impl Database {
    pub async fn get_project(&self, id: &str) -> DbResult<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, display_name, path, session_count, total_tokens, total_cost, last_activity_at
             FROM projects WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Projects ordered by most recent activity; empty projects last.
    pub async fn list_projects(&self) -> DbResult<Vec<ProjectRow>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, display_name, path, session_count, total_tokens, total_cost, last_activity_at
             FROM projects
             ORDER BY last_activity_at IS NULL, last_activity_at DESC, id ASC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Recompute one project's aggregate on demand.
    pub async fn recompute_project(&self, id: &str) -> DbResult<()> {
        let mut tx = self.pool().begin().await?;
        recompute_project_tx(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record a parent/child relation. Duplicate pairs are ignored.
    pub async fn link_sessions(&self, parent: &str, child: &str, link_type: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO session_links (parent_session_id, child_session_id, link_type, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(parent)
        .bind(child)
        .bind(link_type)
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Links where `session_id` is either end.
    pub async fn links_for(&self, session_id: &str) -> DbResult<Vec<SessionLink>> {
        let rows = sqlx::query_as::<_, SessionLink>(
            "SELECT parent_session_id, child_session_id, link_type, created_at
             FROM session_links
             WHERE parent_session_id = ?1 OR child_session_id = ?1
             ORDER BY id",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn add_review(&self, title: &str, session_ids: &[String]) -> DbResult<i64> {
        let now = Utc::now().timestamp();
        let json = serde_json::to_string(session_ids).unwrap_or_else(|_| "[]".into());
        let result = sqlx::query(
            "INSERT INTO session_reviews (title, session_ids, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
        )
        .bind(title)
        .bind(json)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Reviews whose session list parses; malformed rows are omitted.
    pub async fn list_reviews(&self) -> DbResult<Vec<SessionReview>> {
        let rows: Vec<(i64, String, String, i64, i64)> = sqlx::query_as(
            "SELECT id, title, session_ids, created_at, updated_at FROM session_reviews ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, title, raw, created_at, updated_at)| {
                let session_ids = serde_json::from_str(&raw).ok()?;
                Some(SessionReview { id, title, session_ids, created_at, updated_at })
            })
            .collect())
    }
}
