// crates/core/src/project.rs
//! Project identity helpers: git branch discovery, Gemini project hashes, and
//! sibling `.project_root` markers.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File the Gemini CLI writes next to its per-project chat directory.
pub const PROJECT_ROOT_MARKER: &str = ".project_root";

/// SHA-256 hex digest of a project root path, as Gemini uses for its
/// `projectHash` and temp directory names.
pub fn project_hash(root: &str) -> String {
    hex::encode(Sha256::digest(root.as_bytes()))
}

/// Current branch of the repository at `root`, read from `.git/HEAD`.
///
/// Worktrees (where `.git` is a file containing `gitdir: <path>`) are
/// followed. A detached HEAD yields the abbreviated commit hash.
pub fn read_git_branch(root: &Path) -> Option<String> {
    let dot_git = root.join(".git");
    let git_dir = if dot_git.is_file() {
        let pointer = std::fs::read_to_string(&dot_git).ok()?;
        let target = pointer.trim().strip_prefix("gitdir:")?.trim();
        let target = PathBuf::from(target);
        if target.is_absolute() {
            target
        } else {
            root.join(target)
        }
    } else {
        dot_git
    };
    let head = std::fs::read_to_string(git_dir.join("HEAD")).ok()?;
    parse_head(&head)
}

fn parse_head(head: &str) -> Option<String> {
    let head = head.trim();
    if let Some(reference) = head.strip_prefix("ref:") {
        let reference = reference.trim();
        let branch = reference.strip_prefix("refs/heads/").unwrap_or(reference);
        return (!branch.is_empty()).then(|| branch.to_string());
    }
    let is_sha = head.len() >= 7 && head.chars().all(|c| c.is_ascii_hexdigit());
    is_sha.then(|| head[..7].to_string())
}

/// Project root recorded in a `.project_root` marker in the transcript's
/// directory or its parent (`<hash>/chats/session.json` layout).
///
/// When `expected_hash` is given, the recorded root must hash to it;
/// otherwise the marker belongs to a different project and is ignored.
pub fn find_marked_project_root(transcript: &Path, expected_hash: Option<&str>) -> Option<String> {
    let dir = transcript.parent()?;
    let candidates = [Some(dir), dir.parent()];
    for candidate in candidates.into_iter().flatten() {
        let marker = candidate.join(PROJECT_ROOT_MARKER);
        let Ok(raw) = std::fs::read_to_string(&marker) else {
            continue;
        };
        let root = raw.trim();
        if root.is_empty() {
            continue;
        }
        match expected_hash {
            Some(hash) if !hash.eq_ignore_ascii_case(&project_hash(root)) => {
                debug!(marker = %marker.display(), "Project root marker does not match projectHash, ignoring");
            }
            _ => return Some(root.to_string()),
        }
    }
    None
}
