// crates/db/src/indexer.rs
//! Indexer module: scan → diff → parse → store pipeline.
//!
//! 1. `scan_transcripts()`: discover transcript files under each provider root
//! 2. `diff_against_db()`: compare discovered files against `indexer_state`
//! 3. `index_files()`: parse changed files, store in DB, report progress
//!
//! [`ReindexCoordinator`] keeps at most one pass in flight.

use crate::{Database, DbResult};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokenscope_core::{ParseContext, Provider, ProviderRegistry, SessionRole};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

// ============================================================================
// Types
// ============================================================================

/// Information about a discovered transcript file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub path: PathBuf,
    /// Provider of the root the file was found under. Used as a parse hint.
    pub provider: Provider,
    /// File size in bytes.
    pub size: u64,
    /// Last modification time as Unix timestamp (seconds).
    pub modified_at: i64,
}

/// Result of scanning provider roots.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<FileInfo>,
    /// Total size of all discovered files in bytes.
    pub total_size: u64,
}

/// Result of diffing discovered files against the database.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Files not yet in the database.
    pub new_files: Vec<FileInfo>,
    /// Files whose size or mtime changed since last index.
    pub modified_files: Vec<FileInfo>,
    /// Count of files that have not changed.
    pub unchanged_count: usize,
    /// File paths that exist in the DB but no longer on disk.
    pub deleted_paths: Vec<String>,
}

impl DiffResult {
    pub fn changed(&self) -> Vec<FileInfo> {
        self.new_files
            .iter()
            .chain(self.modified_files.iter())
            .cloned()
            .collect()
    }
}

/// Counts from one indexing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSummary {
    pub scanned: usize,
    pub indexed: usize,
    /// Files that parsed to no messages. Tracked, not stored as sessions.
    pub empty: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub forgotten: usize,
    pub links: usize,
}

// ============================================================================
// scan_transcripts
// ============================================================================

fn is_transcript(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("jsonl") | Some("json")
    )
}

/// Walk every provider root for `.jsonl` / `.json` files. Missing roots and
/// unreadable entries are skipped.
pub fn scan_transcripts(roots: &[(Provider, PathBuf)]) -> ScanResult {
    let mut result = ScanResult::default();

    for (provider, root) in roots {
        if !root.is_dir() {
            debug!("Skipping missing {} root {:?}", provider, root);
            continue;
        }
        for entry in WalkDir::new(root).follow_links(false).into_iter() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Cannot read entry under {:?}: {}", root, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_transcript(entry.path()) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let modified_at = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            result.total_size += metadata.len();
            result.files.push(FileInfo {
                path: entry.into_path(),
                provider: *provider,
                size: metadata.len(),
                modified_at,
            });
        }
    }

    result.files.sort_by(|a, b| a.path.cmp(&b.path));
    result
}

// ============================================================================
// diff_against_db
// ============================================================================

/// Compare discovered files against the database indexer state.
pub async fn diff_against_db(files: &[FileInfo], db: &Database) -> DbResult<DiffResult> {
    let mut diff = DiffResult::default();

    // Batch-load all indexer states in one query (avoids N+1 pattern)
    let all_states = db.get_all_indexer_states().await?;

    let valid_paths: HashSet<String> = files
        .iter()
        .map(|f| f.path.to_string_lossy().to_string())
        .collect();

    for file in files {
        let path_str = file.path.to_string_lossy().to_string();
        match all_states.get(&path_str) {
            None => diff.new_files.push(file.clone()),
            Some(entry) => {
                if entry.file_size != file.size as i64 || entry.modified_at != file.modified_at {
                    diff.modified_files.push(file.clone());
                } else {
                    diff.unchanged_count += 1;
                }
            }
        }
    }

    diff.deleted_paths = all_states
        .keys()
        .filter(|path| !valid_paths.contains(path.as_str()))
        .cloned()
        .collect();
    diff.deleted_paths.sort();

    Ok(diff)
}

// ============================================================================
// Project and parent derivation
// ============================================================================

/// Nearest ancestor directory name that identifies a project, skipping the
/// per-session `<session>/subagents/` nesting and Gemini's `chats/` folder.
fn fallback_project_id(path: &Path) -> String {
    let mut dir = path.parent();
    while let Some(d) = dir {
        let name = d.file_name().map(|n| n.to_string_lossy().to_string());
        match name.as_deref() {
            Some("subagents") => dir = d.parent().and_then(Path::parent),
            Some("chats") => dir = d.parent(),
            Some(n) if !n.is_empty() => return n.to_string(),
            _ => break,
        }
    }
    "unknown".to_string()
}

/// `<parent-session>/subagents/<file>` → `<parent-session>`.
fn parent_session_id(path: &Path) -> Option<String> {
    let dir = path.parent()?;
    if dir.file_name()? != "subagents" {
        return None;
    }
    dir.parent()?
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
}

// ============================================================================
// index_files
// ============================================================================

/// Parse and store `files`, calling `on_progress(done, total)` after each.
///
/// Parsing runs on the blocking pool. A file that fails to store is logged
/// and counted; the pass continues.
pub async fn index_files<F>(
    files: &[FileInfo],
    registry: Arc<ProviderRegistry>,
    db: &Database,
    on_progress: F,
) -> DbResult<IndexSummary>
where
    F: Fn(usize, usize),
{
    let total = files.len();
    let mut summary = IndexSummary::default();

    for (i, file) in files.iter().enumerate() {
        let path_str = file.path.to_string_lossy().to_string();

        let parse_registry = Arc::clone(&registry);
        let path = file.path.clone();
        let hint = file.provider.as_str();
        let parsed = tokio::task::spawn_blocking(move || {
            let ctx = ParseContext::for_path(&path);
            parse_registry.parse_with(&path, hint, ctx)
        })
        .await;

        let stats = match parsed {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Parse task failed for {}: {}", path_str, e);
                summary.failed += 1;
                on_progress(i + 1, total);
                continue;
            }
        };

        if stats.message_count == 0 {
            debug!("No messages in {}, recording state only", path_str);
            summary.empty += 1;
        }

        let project_id = stats
            .project_path
            .clone()
            .unwrap_or_else(|| fallback_project_id(&file.path));

        let stored = if stats.message_count == 0 {
            db.mark_file_without_session(&stats, file.size as i64, file.modified_at)
                .await
        } else {
            db.store_indexed_file(&stats, &project_id, file.size as i64, file.modified_at)
                .await
        };
        match stored {
            Ok(()) if stats.message_count > 0 => summary.indexed += 1,
            Ok(()) => {}
            Err(e) => {
                warn!("Failed to store session {}: {}", path_str, e);
                summary.failed += 1;
                on_progress(i + 1, total);
                continue;
            }
        }

        if stats.session_role == SessionRole::Subagent && stats.message_count > 0 {
            if let Some(parent) = parent_session_id(&file.path) {
                match db.link_sessions(&parent, &stats.session_id, "subagent").await {
                    Ok(true) => summary.links += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Failed to link {} to {}: {}", stats.session_id, parent, e),
                }
            }
        }

        on_progress(i + 1, total);
    }

    Ok(summary)
}

/// Full pass: scan, diff, index changed files, forget vanished ones.
pub async fn run_index<F>(
    roots: &[(Provider, PathBuf)],
    registry: Arc<ProviderRegistry>,
    db: &Database,
    on_progress: F,
) -> DbResult<IndexSummary>
where
    F: Fn(usize, usize),
{
    let owned_roots = roots.to_vec();
    let scan = tokio::task::spawn_blocking(move || scan_transcripts(&owned_roots)).await?;
    let diff = diff_against_db(&scan.files, db).await?;
    let changed = diff.changed();

    let mut summary = index_files(&changed, registry, db, on_progress).await?;
    summary.scanned = scan.files.len();
    summary.unchanged = diff.unchanged_count;
    summary.forgotten = db.remove_indexer_states(&diff.deleted_paths).await? as usize;

    info!(
        scanned = summary.scanned,
        indexed = summary.indexed,
        unchanged = summary.unchanged,
        failed = summary.failed,
        forgotten = summary.forgotten,
        "Index pass complete"
    );
    Ok(summary)
}

// ============================================================================
// ReindexCoordinator
// ============================================================================

#[derive(Debug, Default)]
struct CoordinatorState {
    in_flight: AtomicBool,
    skipped: AtomicU64,
}

/// Elects a single runner among concurrent re-index callers.
#[derive(Debug, Clone, Default)]
pub struct ReindexCoordinator {
    state: Arc<CoordinatorState>,
}

/// Held for the duration of a pass; clears the in-flight flag on drop.
#[derive(Debug)]
pub struct ReindexGuard {
    state: Arc<CoordinatorState>,
}

impl Drop for ReindexGuard {
    fn drop(&mut self) {
        self.state.in_flight.store(false, Ordering::Release);
    }
}

impl ReindexCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the pass, or `None` if one is already running.
    pub fn try_begin(&self) -> Option<ReindexGuard> {
        match self
            .state
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(ReindexGuard {
                state: Arc::clone(&self.state),
            }),
            Err(_) => {
                self.state.skipped.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.in_flight.load(Ordering::Acquire)
    }

    /// Passes refused because another was in flight.
    pub fn skipped(&self) -> u64 {
        self.state.skipped.load(Ordering::Relaxed)
    }

    /// Start `pass` every `period`. A tick that lands while the previous
    /// pass is still running is skipped. Runs until the task is dropped.
    pub async fn run_periodic<F, Fut>(&self, period: Duration, pass: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.try_begin() {
                Some(guard) => {
                    let fut = pass();
                    tokio::spawn(async move {
                        fut.await;
                        drop(guard);
                    });
                }
                None => debug!("Previous re-index still running, skipping tick"),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    const CLAUDE_LINES: &str = concat!(
        r#"{"type":"user","timestamp":"2025-10-01T10:00:00Z","cwd":"/work/app","message":{"role":"user","content":"hello"}}"#,
        "\n",
        r#"{"type":"assistant","timestamp":"2025-10-01T10:00:02Z","message":{"id":"m1","model":"claude-sonnet-4-5","content":[{"type":"text","text":"hi"}],"usage":{"input_tokens":10,"output_tokens":5}}}"#,
        "\n"
    );

    fn write(base: &Path, rel: &str, body: &str) -> PathBuf {
        let path = base.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    fn claude_root(tmp: &TempDir) -> Vec<(Provider, PathBuf)> {
        vec![(Provider::Claude, tmp.path().join("projects"))]
    }

    #[test]
    fn test_scan_filters_extensions_and_missing_roots() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "projects/-work-app/s1.jsonl", CLAUDE_LINES);
        write(tmp.path(), "projects/-work-app/notes.txt", "x");
        write(tmp.path(), "projects/-work-app/s1/subagents/agent-a.jsonl", CLAUDE_LINES);

        let mut roots = claude_root(&tmp);
        roots.push((Provider::Gemini, tmp.path().join("nope")));
        let scan = scan_transcripts(&roots);
        assert_eq!(scan.files.len(), 2);
        assert!(scan.files.iter().all(|f| f.provider == Provider::Claude));
        assert!(scan.total_size > 0);
    }

    #[test]
    fn test_fallback_project_and_parent() {
        let p = Path::new("/r/projects/-work-app/sess-1/subagents/agent-a.jsonl");
        assert_eq!(fallback_project_id(p), "-work-app");
        assert_eq!(parent_session_id(p).as_deref(), Some("sess-1"));

        let g = Path::new("/g/tmp/abc123/chats/session-1.json");
        assert_eq!(fallback_project_id(g), "abc123");
        assert_eq!(parent_session_id(g), None);

        assert_eq!(fallback_project_id(Path::new("/r/proj/s.jsonl")), "proj");
    }

    #[tokio::test]
    async fn test_diff_new_unchanged_modified_deleted() {
        let tmp = TempDir::new().unwrap();
        let s1 = write(tmp.path(), "projects/p/s1.jsonl", CLAUDE_LINES);
        write(tmp.path(), "projects/p/s2.jsonl", CLAUDE_LINES);
        let db = Database::new_in_memory().await.unwrap();
        let registry = Arc::new(ProviderRegistry::default());

        let first = run_index(&claude_root(&tmp), Arc::clone(&registry), &db, |_, _| {})
            .await
            .unwrap();
        assert_eq!(first.indexed, 2);

        std::fs::write(&s1, format!("{CLAUDE_LINES}{CLAUDE_LINES}")).unwrap();
        std::fs::remove_file(tmp.path().join("projects/p/s2.jsonl")).unwrap();

        let scan = scan_transcripts(&claude_root(&tmp));
        let diff = diff_against_db(&scan.files, &db).await.unwrap();
        assert!(diff.new_files.is_empty());
        assert_eq!(diff.modified_files.len(), 1);
        assert_eq!(diff.deleted_paths.len(), 1);
        assert!(diff.deleted_paths[0].ends_with("s2.jsonl"));
    }

    #[tokio::test]
    async fn test_index_calls_progress_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "projects/p/s1.jsonl", CLAUDE_LINES);
        write(tmp.path(), "projects/p/s2.jsonl", CLAUDE_LINES);
        write(tmp.path(), "projects/p/empty.jsonl", "");
        let db = Database::new_in_memory().await.unwrap();
        let registry = Arc::new(ProviderRegistry::default());

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let summary = run_index(&claude_root(&tmp), Arc::clone(&registry), &db, move |done, total| {
            c.fetch_add(1, Ordering::SeqCst);
            assert!(done <= total);
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(summary.indexed, 2);
        assert_eq!(summary.empty, 1);
        assert_eq!(db.session_count().await.unwrap(), 2);

        let again = run_index(&claude_root(&tmp), Arc::clone(&registry), &db, |_, _| {})
            .await
            .unwrap();
        assert_eq!(again.indexed, 0);
        assert_eq!(again.unchanged, 3);

        // Forced re-parse of identical bytes leaves the row unchanged.
        let before = db.get_session("s1").await.unwrap().unwrap();
        let scan = scan_transcripts(&claude_root(&tmp));
        index_files(&scan.files, registry, &db, |_, _| {}).await.unwrap();
        let after = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(before.stats, after.stats);
        assert_eq!(db.session_count().await.unwrap(), 2);

        // cwd wins over the directory name.
        assert_eq!(after.project_id, "/work/app");
        let project = db.get_project("/work/app").await.unwrap().unwrap();
        assert_eq!(project.session_count, 2);
        assert_eq!(project.display_name, "app");
    }

    #[tokio::test]
    async fn test_subagent_file_linked_to_parent() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "projects/p/parent-1.jsonl", CLAUDE_LINES);
        write(tmp.path(), "projects/p/parent-1/subagents/agent-x.jsonl", CLAUDE_LINES);
        let db = Database::new_in_memory().await.unwrap();

        let summary = run_index(&claude_root(&tmp), Arc::new(ProviderRegistry::default()), &db, |_, _| {})
            .await
            .unwrap();
        assert_eq!(summary.links, 1);
        let links = db.links_for("parent-1").await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].child_session_id, "agent-x");

        let child = db.get_session("agent-x").await.unwrap().unwrap();
        assert_eq!(child.stats.session_role, SessionRole::Subagent);
    }

    #[tokio::test]
    async fn test_forgotten_files_keep_sessions() {
        let tmp = TempDir::new().unwrap();
        let s1 = write(tmp.path(), "projects/p/s1.jsonl", CLAUDE_LINES);
        let db = Database::new_in_memory().await.unwrap();
        let registry = Arc::new(ProviderRegistry::default());
        run_index(&claude_root(&tmp), Arc::clone(&registry), &db, |_, _| {}).await.unwrap();

        std::fs::remove_file(&s1).unwrap();
        let summary = run_index(&claude_root(&tmp), registry, &db, |_, _| {}).await.unwrap();
        assert_eq!(summary.forgotten, 1);
        assert!(db.get_session("s1").await.unwrap().is_some());
        assert!(db.get_all_indexer_states().await.unwrap().is_empty());
    }

    #[test]
    fn test_coordinator_refuses_second_pass() {
        let coordinator = ReindexCoordinator::new();
        let guard = coordinator.try_begin().expect("first pass starts");
        assert!(coordinator.is_running());
        assert!(coordinator.clone().try_begin().is_none());
        assert_eq!(coordinator.skipped(), 1);
        drop(guard);
        assert!(!coordinator.is_running());
        assert!(coordinator.try_begin().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_skips_ticks_while_in_flight() {
        let coordinator = ReindexCoordinator::new();
        let started = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&started);
        let runner = coordinator.clone();
        let handle = tokio::spawn(async move {
            runner
                .run_periodic(Duration::from_secs(10), move || {
                    let s = Arc::clone(&s);
                    async move {
                        s.fetch_add(1, Ordering::SeqCst);
                        // Each pass outlives two ticks.
                        tokio::time::sleep(Duration::from_secs(25)).await;
                    }
                })
                .await
        });

        // Ticks at 0, 10, 20, 30, 40, 50: passes start at 0 and 30.
        tokio::time::sleep(Duration::from_secs(55)).await;
        handle.abort();

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert!(coordinator.skipped() >= 3);
    }
}
