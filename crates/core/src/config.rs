// crates/core/src/config.rs
//! Runtime configuration.
//!
//! Layered lowest to highest: built-in defaults, `config.toml`, `TOKENSCOPE_*`
//! environment variables, then CLI flags (applied by the binary).

use crate::error::ConfigError;
use crate::paths;
use crate::types::Provider;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DB: &str = "TOKENSCOPE_DB";
pub const ENV_CLAUDE_DIR: &str = "TOKENSCOPE_CLAUDE_DIR";
pub const ENV_CODEX_DIR: &str = "TOKENSCOPE_CODEX_DIR";
pub const ENV_GEMINI_DIR: &str = "TOKENSCOPE_GEMINI_DIR";
pub const ENV_REINDEX_SECS: &str = "TOKENSCOPE_REINDEX_SECS";
pub const ENV_LOG: &str = "TOKENSCOPE_LOG";

const DEFAULT_REINDEX_SECS: u64 = 300;
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite file. `None` means the default cache location.
    pub db_path: Option<PathBuf>,
    pub claude_dir: Option<PathBuf>,
    pub codex_dir: Option<PathBuf>,
    pub gemini_dir: Option<PathBuf>,
    pub reindex_interval: Duration,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            claude_dir: paths::claude_projects_dir(),
            codex_dir: paths::codex_sessions_dir(),
            gemini_dir: paths::gemini_tmp_dir(),
            reindex_interval: Duration::from_secs(DEFAULT_REINDEX_SECS),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// On-disk shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    reindex_interval_secs: Option<u64>,
    log_filter: Option<String>,
    providers: ProviderDirs,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ProviderDirs {
    claude: Option<PathBuf>,
    codex: Option<PathBuf>,
    gemini: Option<PathBuf>,
}

impl Config {
    /// Defaults, then the default config file if it exists, then the process
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match paths::config_file() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw, path)
    }

    fn from_toml(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(raw).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut config = Self::default();
        if let Some(db) = file.db_path {
            config.db_path = Some(db);
        }
        if let Some(secs) = file.reindex_interval_secs {
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    path: path.to_path_buf(),
                    message: "reindex_interval_secs must be positive".into(),
                });
            }
            config.reindex_interval = Duration::from_secs(secs);
        }
        if let Some(filter) = file.log_filter {
            config.log_filter = filter;
        }
        config.claude_dir = file.providers.claude.or(config.claude_dir);
        config.codex_dir = file.providers.codex.or(config.codex_dir);
        config.gemini_dir = file.providers.gemini.or(config.gemini_dir);
        Ok(config)
    }

    /// Apply `TOKENSCOPE_*` overrides read through `lookup`. Empty values are
    /// ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(ENV_DB) {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_CLAUDE_DIR) {
            self.claude_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_CODEX_DIR) {
            self.codex_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_GEMINI_DIR) {
            self.gemini_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_REINDEX_SECS) {
            let secs = v
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or(ConfigError::InvalidEnv {
                    var: ENV_REINDEX_SECS,
                    value: v.clone(),
                })?;
            self.reindex_interval = Duration::from_secs(secs);
        }
        if let Some(v) = get(ENV_LOG) {
            self.log_filter = v;
        }
        Ok(())
    }

    /// Transcript root for each provider that has one configured.
    pub fn provider_roots(&self) -> Vec<(Provider, PathBuf)> {
        [
            (Provider::Claude, &self.claude_dir),
            (Provider::Codex, &self.codex_dir),
            (Provider::Gemini, &self.gemini_dir),
        ]
        .into_iter()
        .filter_map(|(p, dir)| dir.clone().map(|d| (p, d)))
        .collect()
    }

    /// Configured DB path, else the default cache location.
    pub fn resolved_db_path(&self) -> Option<PathBuf> {
        self.db_path.clone().or_else(paths::db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn toml_overrides_defaults() {
        let raw = r#"
db_path = "/data/ts.db"
reindex_interval_secs = 60

[providers]
codex = "/srv/codex"
"#;
        let config = Config::from_toml(raw, Path::new("config.toml")).unwrap();
        assert_eq!(config.db_path, Some(PathBuf::from("/data/ts.db")));
        assert_eq!(config.reindex_interval, Duration::from_secs(60));
        assert_eq!(config.codex_dir, Some(PathBuf::from("/srv/codex")));
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = Config::from_toml("colour = true", Path::new("c.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        let err = Config::from_toml("reindex_interval_secs = 0", Path::new("c.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DB, "/tmp/x.db"),
            (ENV_GEMINI_DIR, "/g"),
            (ENV_LOG, "debug"),
            (ENV_CLAUDE_DIR, "  "),
        ]);
        let mut config = Config::default();
        let before_claude = config.claude_dir.clone();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(config.gemini_dir, Some(PathBuf::from("/g")));
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.claude_dir, before_claude);
    }

    #[test]
    fn bad_interval_env_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == ENV_REINDEX_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_REINDEX_SECS, .. }));
    }

    #[test]
    fn provider_roots_skip_unset() {
        let config = Config {
            claude_dir: None,
            codex_dir: Some(PathBuf::from("/c")),
            gemini_dir: None,
            ..Config::default()
        };
        assert_eq!(config.provider_roots(), vec![(Provider::Codex, PathBuf::from("/c"))]);
    }
}
