/// Inline SQL migrations for the tokenscope schema.
///
/// Forward-only. Each entry is one version; multi-statement entries run
/// through `sqlx::raw_sql`. Timestamps are unix seconds.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: projects
    r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL DEFAULT '',
    path TEXT,
    session_count INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    total_cost REAL NOT NULL DEFAULT 0,
    last_activity_at INTEGER
);
"#,
    // Migration 2: sessions
    r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    detected_provider TEXT NOT NULL,
    file_path TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0,
    tool_call_count INTEGER NOT NULL DEFAULT 0,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cache_read_tokens INTEGER NOT NULL DEFAULT 0,
    cache_write_tokens INTEGER NOT NULL DEFAULT 0,
    reasoning_tokens INTEGER NOT NULL DEFAULT 0,
    thinking_blocks INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    total_cost REAL NOT NULL DEFAULT 0,
    pricing_status TEXT NOT NULL DEFAULT 'priced',
    unpriced_tokens INTEGER NOT NULL DEFAULT 0,
    unpriced_messages INTEGER NOT NULL DEFAULT 0,
    model_usage TEXT NOT NULL DEFAULT '{}',
    tool_usage TEXT NOT NULL DEFAULT '{}',
    enriched_tools TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER,
    modified_at INTEGER,
    session_duration_ms INTEGER NOT NULL DEFAULT 0,
    avg_latency_ms INTEGER,
    p50_latency_ms INTEGER,
    p95_latency_ms INTEGER,
    max_latency_ms INTEGER,
    latency_sample_count INTEGER NOT NULL DEFAULT 0,
    session_role TEXT NOT NULL DEFAULT 'standalone',
    subagent_type TEXT,
    effort_mode TEXT,
    git_branch TEXT,
    project_path TEXT,
    auto_summary TEXT NOT NULL DEFAULT '',
    indexed_at INTEGER NOT NULL DEFAULT 0
);
"#,
    // Migration 3: session indexes
    r#"
CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id);
CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at);
CREATE INDEX IF NOT EXISTS idx_sessions_provider ON sessions(provider);
"#,
    // Migration 4: indexer_state
    r#"
CREATE TABLE IF NOT EXISTS indexer_state (
    file_path TEXT PRIMARY KEY,
    provider TEXT NOT NULL,
    session_id TEXT,
    file_size INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    indexed_at INTEGER NOT NULL
);
"#,
    // Migration 5: soft archive
    r#"ALTER TABLE sessions ADD COLUMN compressed_at INTEGER;"#,
    // Migration 6: parent/child links
    r#"
CREATE TABLE IF NOT EXISTS session_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_session_id TEXT NOT NULL,
    child_session_id TEXT NOT NULL,
    link_type TEXT NOT NULL DEFAULT 'subagent',
    created_at INTEGER NOT NULL,
    UNIQUE(parent_session_id, child_session_id)
);
CREATE INDEX IF NOT EXISTS idx_session_links_child ON session_links(child_session_id);
"#,
    // Migration 7: cross-session reviews (session_ids is a JSON array)
    r#"
CREATE TABLE IF NOT EXISTS session_reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    session_ids TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#,
];

#[cfg(test)]
mod tests {
    use sqlx::SqlitePool;

    async fn setup_db() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        for (i, migration) in super::MIGRATIONS.iter().enumerate() {
            match sqlx::raw_sql(migration).execute(&pool).await {
                Ok(_) => {}
                Err(e) if e.to_string().contains("duplicate column name") => {}
                Err(e) => panic!("Migration {} failed: {}", i + 1, e),
            }
        }
        pool
    }

    async fn columns(pool: &SqlitePool, table: &str) -> Vec<String> {
        let rows: Vec<(String,)> =
            sqlx::query_as(&format!("SELECT name FROM pragma_table_info('{table}')"))
                .fetch_all(pool)
                .await
                .unwrap();
        rows.into_iter().map(|(n,)| n).collect()
    }

    #[tokio::test]
    async fn test_sessions_has_storage_contract_columns() {
        let pool = setup_db().await;
        let cols = columns(&pool, "sessions").await;
        for expected in [
            "model_usage",
            "tool_usage",
            "enriched_tools",
            "created_at",
            "modified_at",
            "compressed_at",
            "session_role",
            "subagent_type",
            "provider",
        ] {
            assert!(cols.iter().any(|c| c == expected), "missing column {expected}");
        }
    }

    #[tokio::test]
    async fn test_review_and_link_tables_exist() {
        let pool = setup_db().await;
        assert!(columns(&pool, "session_reviews").await.contains(&"session_ids".to_string()));
        assert!(columns(&pool, "session_links").await.contains(&"child_session_id".to_string()));
        assert!(columns(&pool, "projects").await.contains(&"last_activity_at".to_string()));
    }
}
