//! Integration tests for compression, restore, and bulk delete.

mod queries_shared;

use pretty_assertions::assert_eq;
use queries_shared::{at, make_session};
use tokenscope_core::Provider;
use tokenscope_db::{Database, DeleteOutcome, ListSessionsParams};

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn seeded() -> Database {
    let db = Database::new_in_memory().await.unwrap();
    let fixtures = [
        make_session("a", Provider::Claude, at(2025, 10, 1, 9, 0), 1_000, 1.5),
        make_session("b", Provider::Claude, at(2025, 10, 2, 9, 0), 2_000, 2.5),
        make_session("c", Provider::Codex, at(2025, 10, 3, 9, 0), 4_000, 4.0),
    ];
    for s in &fixtures {
        db.upsert_session(s, "proj").await.unwrap();
    }
    db
}

#[tokio::test]
async fn test_compress_then_restore_round_trips_project_aggregate() {
    let db = seeded().await;
    let original = db.get_project("proj").await.unwrap().unwrap();
    assert_eq!(original.session_count, 3);
    assert_eq!(original.total_tokens, 7_000);

    let changed = db.compress_sessions(&ids(&["a", "c"])).await.unwrap();
    assert_eq!(changed, 2);

    let compressed = db.get_project("proj").await.unwrap().unwrap();
    assert_eq!(compressed.session_count, 1);
    assert_eq!(compressed.total_tokens, 2_000);
    assert!((compressed.total_cost - 2.5).abs() < 1e-9);
    assert_eq!(
        compressed.last_activity_at,
        Some(at(2025, 10, 2, 9, 30).timestamp())
    );

    // Already compressed rows are not touched twice.
    assert_eq!(db.compress_sessions(&ids(&["a"])).await.unwrap(), 0);

    let listed = db.list_sessions(&ListSessionsParams::default()).await.unwrap();
    assert_eq!(listed.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["b"]);

    let all = db
        .list_sessions(&ListSessionsParams {
            include_compressed: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 3);

    assert_eq!(db.restore_sessions(&ids(&["a", "c", "b"])).await.unwrap(), 2);
    let restored = db.get_project("proj").await.unwrap().unwrap();
    assert_eq!(restored, original);
}

#[tokio::test]
async fn test_delete_cleans_links_and_reviews() {
    let db = seeded().await;
    db.link_sessions("a", "b", "subagent").await.unwrap();
    db.link_sessions("c", "x", "subagent").await.unwrap();

    let r1 = db.add_review("both gone", &ids(&["a", "b"])).await.unwrap();
    let r2 = db.add_review("shrinks", &ids(&["a", "c"])).await.unwrap();
    let r3 = db.add_review("untouched", &ids(&["c"])).await.unwrap();
    sqlx::query(
        "INSERT INTO session_reviews (title, session_ids, created_at, updated_at)
         VALUES ('broken', 'not-a-list', 0, 0)",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let outcome = db.delete_sessions(&ids(&["a", "b"])).await.unwrap();
    assert_eq!(
        outcome,
        DeleteOutcome {
            sessions_deleted: 2,
            links_detached: 1,
            artifacts_updated: 1,
            artifacts_removed: 1,
        }
    );

    assert!(db.get_session("a").await.unwrap().is_none());
    assert!(db.links_for("b").await.unwrap().is_empty());
    assert_eq!(db.links_for("c").await.unwrap().len(), 1);

    let reviews = db.list_reviews().await.unwrap();
    assert!(reviews.iter().all(|r| r.id != r1));
    let shrunk = reviews.iter().find(|r| r.id == r2).unwrap();
    assert_eq!(shrunk.session_ids, ids(&["c"]));
    let same = reviews.iter().find(|r| r.id == r3).unwrap();
    assert_eq!(same.session_ids, ids(&["c"]));

    let raw: (String,) = sqlx::query_as("SELECT session_ids FROM session_reviews WHERE title = 'broken'")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(raw.0, "not-a-list");

    let project = db.get_project("proj").await.unwrap().unwrap();
    assert_eq!(project.session_count, 1);
    assert_eq!(project.total_tokens, 4_000);
}

#[tokio::test]
async fn test_deleting_last_session_clears_last_activity() {
    let db = seeded().await;
    db.delete_sessions(&ids(&["a", "b", "c"])).await.unwrap();

    let project = db.get_project("proj").await.unwrap().unwrap();
    assert_eq!(project.session_count, 0);
    assert_eq!(project.total_tokens, 0);
    assert_eq!(project.total_cost, 0.0);
    assert_eq!(project.last_activity_at, None);
    assert_eq!(db.session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_of_unknown_ids_is_a_noop() {
    let db = seeded().await;
    let outcome = db.delete_sessions(&ids(&["nope"])).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::default());
    assert_eq!(db.delete_sessions(&[]).await.unwrap(), DeleteOutcome::default());
    assert_eq!(db.session_count().await.unwrap(), 3);
}
