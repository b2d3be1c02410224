//! Centralized path functions for app storage and transcript locations.
//!
//! Single source of truth: no ad-hoc `dirs::home_dir().join(...)` elsewhere.

use std::path::PathBuf;

const APP_DIR: &str = "tokenscope";

/// App cache root: `~/Library/Caches/tokenscope/` (macOS) or `~/.cache/tokenscope/` (Linux).
pub fn app_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join(APP_DIR))
}

/// SQLite database file: `<app_cache_dir>/tokenscope.db`.
pub fn db_path() -> Option<PathBuf> {
    app_cache_dir().map(|d| d.join("tokenscope.db"))
}

/// Config file: `<config_dir>/tokenscope/config.toml`.
pub fn config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Claude Code transcripts: `~/.claude/projects/`.
pub fn claude_projects_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".claude").join("projects"))
}

/// Codex rollouts: `$CODEX_HOME/sessions/` or `~/.codex/sessions/`.
pub fn codex_sessions_dir() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("CODEX_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(home).join("sessions"));
    }
    dirs::home_dir().map(|h| h.join(".codex").join("sessions"))
}

/// Gemini CLI chats: `~/.gemini/tmp/` (one subdirectory per project hash).
pub fn gemini_tmp_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".gemini").join("tmp"))
}

/// Remove the cache directory (DB, WAL, SHM).
/// Returns what was removed for user feedback.
pub fn remove_cache_data() -> Vec<String> {
    let mut removed = Vec::new();
    if let Some(dir) = app_cache_dir() {
        if dir.exists() {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => removed.push(format!("Removed cache directory: {}", dir.display())),
                Err(e) => removed.push(format!("Failed to remove {}: {}", dir.display(), e)),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_cache_dir() {
        let dir = app_cache_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().to_string_lossy().contains("tokenscope"));
    }

    #[test]
    fn test_db_path() {
        let path = db_path().unwrap();
        assert!(path.to_string_lossy().ends_with("tokenscope.db"));
    }

    #[test]
    fn test_transcript_roots() {
        assert!(claude_projects_dir().unwrap().ends_with(".claude/projects"));
        assert!(gemini_tmp_dir().unwrap().ends_with(".gemini/tmp"));
        assert!(codex_sessions_dir().unwrap().ends_with("sessions"));
    }

    #[test]
    fn test_config_file() {
        assert!(config_file().unwrap().ends_with("tokenscope/config.toml"));
    }
}
