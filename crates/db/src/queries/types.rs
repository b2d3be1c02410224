// crates/db/src/queries/types.rs
// Public row and result types returned by the query modules.

use crate::filter::FilterClause;
use serde::Serialize;
use tokenscope_core::SessionStats;

/// Indexer state entry returned from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexerEntry {
    pub file_path: String,
    pub provider: String,
    pub session_id: Option<String>,
    pub file_size: i64,
    pub modified_at: i64,
    pub indexed_at: i64,
}

/// A stored session: the parsed stats plus storage-only bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub stats: SessionStats,
    pub project_id: String,
    pub compressed_at: Option<i64>,
    pub indexed_at: i64,
}

impl SessionRecord {
    pub fn is_compressed(&self) -> bool {
        self.compressed_at.is_some()
    }
}

/// Lightweight listing row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub project_id: String,
    pub provider: String,
    pub message_count: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub session_role: String,
    pub auto_summary: String,
    pub compressed_at: Option<i64>,
}

/// Parameters for [`crate::Database::list_sessions`].
#[derive(Debug, Clone)]
pub struct ListSessionsParams {
    pub filter: FilterClause,
    /// Compressed sessions are hidden unless this is set.
    pub include_compressed: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListSessionsParams {
    fn default() -> Self {
        Self {
            filter: FilterClause::default(),
            include_compressed: false,
            limit: 50,
            offset: 0,
        }
    }
}

/// Live aggregate over a project's non-compressed sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRow {
    pub id: String,
    pub display_name: String,
    pub path: Option<String>,
    pub session_count: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub last_activity_at: Option<i64>,
}

/// Counts returned by a bulk delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub sessions_deleted: u64,
    pub links_detached: u64,
    pub artifacts_updated: u64,
    pub artifacts_removed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLink {
    pub parent_session_id: String,
    pub child_session_id: String,
    pub link_type: String,
    pub created_at: i64,
}

/// A cross-session review artifact referencing sessions by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReview {
    pub id: i64,
    pub title: String,
    pub session_ids: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for SessionSummary {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            provider: row.try_get("provider")?,
            message_count: row.try_get("message_count")?,
            total_tokens: row.try_get("total_tokens")?,
            total_cost: row.try_get("total_cost")?,
            created_at: row.try_get("created_at")?,
            modified_at: row.try_get("modified_at")?,
            session_role: row.try_get("session_role")?,
            auto_summary: row.try_get("auto_summary")?,
            compressed_at: row.try_get("compressed_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for ProjectRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            display_name: row.try_get("display_name")?,
            path: row.try_get("path")?,
            session_count: row.try_get("session_count")?,
            total_tokens: row.try_get("total_tokens")?,
            total_cost: row.try_get("total_cost")?,
            last_activity_at: row.try_get("last_activity_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for SessionLink {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            parent_session_id: row.try_get("parent_session_id")?,
            child_session_id: row.try_get("child_session_id")?,
            link_type: row.try_get("link_type")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
