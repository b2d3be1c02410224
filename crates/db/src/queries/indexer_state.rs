// crates/db/src/queries/indexer_state.rs
// Per-file bookkeeping used to skip unchanged transcripts.

use super::sessions::upsert_session_tx;
use super::types::IndexerEntry;
use crate::{Database, DbResult};
use chrono::Utc;
use std::collections::HashMap;
use tokenscope_core::SessionStats;

impl Database {
    pub async fn get_indexer_state(&self, file_path: &str) -> DbResult<Option<IndexerEntry>> {
        let row: Option<(String, String, Option<String>, i64, i64, i64)> = sqlx::query_as(
            "SELECT file_path, provider, session_id, file_size, modified_at, indexed_at
             FROM indexer_state WHERE file_path = ?1",
        )
        .bind(file_path)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(into_entry))
    }

    /// Every indexer entry keyed by file path.
    pub async fn get_all_indexer_states(&self) -> DbResult<HashMap<String, IndexerEntry>> {
        let rows: Vec<(String, String, Option<String>, i64, i64, i64)> = sqlx::query_as(
            "SELECT file_path, provider, session_id, file_size, modified_at, indexed_at FROM indexer_state",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let entry = into_entry(row);
                (entry.file_path.clone(), entry)
            })
            .collect())
    }

    /// Upsert the session and mark its file indexed in one transaction, so a
    /// crash never leaves a file marked indexed without its row.
    pub async fn store_indexed_file(
        &self,
        stats: &SessionStats,
        project_id: &str,
        file_size: i64,
        modified_at: i64,
    ) -> DbResult<()> {
        let mut tx = self.pool().begin().await?;
        upsert_session_tx(&mut tx, stats, project_id).await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO indexer_state
                (file_path, provider, session_id, file_size, modified_at, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&stats.file_path)
        .bind(stats.detected_provider.as_str())
        .bind(&stats.session_id)
        .bind(file_size)
        .bind(modified_at)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record a file that yielded no session so it is not re-parsed until it
    /// changes.
    pub async fn mark_file_without_session(
        &self,
        stats: &SessionStats,
        file_size: i64,
        modified_at: i64,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO indexer_state
                (file_path, provider, session_id, file_size, modified_at, indexed_at)
            VALUES (?1, ?2, NULL, ?3, ?4, ?5)
            "#,
        )
        .bind(&stats.file_path)
        .bind(stats.detected_provider.as_str())
        .bind(file_size)
        .bind(modified_at)
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Forget files that no longer exist on disk. Their sessions are kept.
    pub async fn remove_indexer_states(&self, paths: &[String]) -> DbResult<u64> {
        if paths.is_empty() {
            return Ok(0);
        }
        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "DELETE FROM indexer_state WHERE file_path IN (",
        );
        let mut sep = qb.separated(", ");
        for p in paths {
            sep.push_bind(p.as_str());
        }
        sep.push_unseparated(")");
        Ok(qb.build().execute(self.pool()).await?.rows_affected())
    }
}

fn into_entry(row: (String, String, Option<String>, i64, i64, i64)) -> IndexerEntry {
    let (file_path, provider, session_id, file_size, modified_at, indexed_at) = row;
    IndexerEntry {
        file_path,
        provider,
        session_id,
        file_size,
        modified_at,
        indexed_at,
    }
}
