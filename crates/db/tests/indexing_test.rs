//! End-to-end indexing of a mixed Claude and Codex transcript tree.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokenscope_core::{PricingTable, Provider, ProviderRegistry};
use tokenscope_db::{run_index, AnalyticsQuery, Database, SessionFilter};

const CLAUDE: &str = concat!(
    r#"{"type":"user","timestamp":"2025-10-01T10:00:00Z","cwd":"/work/app","message":{"role":"user","content":"hello"}}"#,
    "\n",
    r#"{"type":"assistant","timestamp":"2025-10-01T10:00:02Z","message":{"id":"m1","model":"claude-sonnet-4-5","content":[{"type":"text","text":"hi"}],"usage":{"input_tokens":10,"output_tokens":5}}}"#,
    "\n"
);

const CODEX: &str = concat!(
    r#"{"timestamp":"2025-10-01T11:00:00Z","type":"session_meta","payload":{"id":"0199-abc","cwd":"/work/api","source":"cli"}}"#,
    "\n",
    r#"{"timestamp":"2025-10-01T11:00:01Z","type":"turn_context","payload":{"model":"gpt-5-codex"}}"#,
    "\n",
    r#"{"timestamp":"2025-10-01T11:00:01Z","type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"Add pagination"}]}}"#,
    "\n",
    r#"{"timestamp":"2025-10-01T11:00:03Z","type":"response_item","payload":{"type":"function_call","name":"shell","arguments":"{}","call_id":"c1"}}"#,
    "\n",
    r#"{"timestamp":"2025-10-01T11:00:04Z","type":"event_msg","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":1000,"cached_input_tokens":400,"output_tokens":50,"reasoning_output_tokens":0}}}}"#,
    "\n",
    r#"{"timestamp":"2025-10-01T11:00:06Z","type":"response_item","payload":{"type":"message","role":"assistant","content":[{"type":"output_text","text":"Done."}]}}"#,
    "\n"
);

fn write(base: &Path, rel: &str, body: &str) -> PathBuf {
    let path = base.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, body).unwrap();
    path
}

fn roots(tmp: &TempDir) -> Vec<(Provider, PathBuf)> {
    vec![
        (Provider::Claude, tmp.path().join("claude")),
        (Provider::Codex, tmp.path().join("codex")),
    ]
}

fn registry() -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::new(PricingTable::default()))
}

#[tokio::test]
async fn test_index_mixed_providers_then_query() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "claude/-work-app/s1.jsonl", CLAUDE);
    let rollout = write(
        tmp.path(),
        "codex/2025/10/01/rollout-2025-10-01T11-00-00-0199-abc.jsonl",
        CODEX,
    );
    write(tmp.path(), "codex/2025/10/01/empty.jsonl", "");

    let db = Database::new_in_memory().await.unwrap();
    let summary = run_index(&roots(&tmp), registry(), &db, |_, _| {}).await.unwrap();
    assert_eq!(summary.scanned, 3);
    assert_eq!(summary.indexed, 2);
    assert_eq!(summary.empty, 1);
    assert_eq!(summary.failed, 0);

    let projects = db.list_projects().await.unwrap();
    let mut ids: Vec<&str> = projects.iter().map(|p| p.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["/work/api", "/work/app"]);

    let day = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
    let report = db.analytics(&AnalyticsQuery::new(day, day)).await.unwrap();
    assert_eq!(report.totals.sessions, 2);
    assert_eq!(report.provider_breakdown.len(), 2);
    assert!(report.tool_breakdown.iter().any(|t| t.tool == "shell"));

    let mut codex_only = AnalyticsQuery::new(day, day);
    codex_only.filter = SessionFilter::from_pairs([("provider", "codex")])
        .unwrap()
        .to_clause()
        .unwrap();
    let report = db.analytics(&codex_only).await.unwrap();
    assert_eq!(report.totals.sessions, 1);
    assert_eq!(report.model_breakdown[0].model, "gpt-5-codex");

    // Second pass sees nothing new.
    let again = run_index(&roots(&tmp), registry(), &db, |_, _| {}).await.unwrap();
    assert_eq!(again.indexed, 0);
    assert_eq!(again.unchanged, 3);

    // A vanished file is forgotten but its session stays.
    std::fs::remove_file(&rollout).unwrap();
    let after = run_index(&roots(&tmp), registry(), &db, |_, _| {}).await.unwrap();
    assert_eq!(after.forgotten, 1);
    assert!(db.get_session("0199-abc").await.unwrap().is_some());
}
