use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokenscope_core::Config;

/// Log output format on stderr.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Command-line interface for `tokenscope`.
#[derive(Debug, Parser)]
#[command(
    name = "tokenscope",
    version,
    about = "Token and cost analytics for Claude Code, Codex CLI and Gemini CLI transcripts"
)]
pub struct Cli {
    /// SQLite database file (overrides config and `TOKENSCOPE_DB`).
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Log format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Raise log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Per-provider transcript roots.
#[derive(Debug, Clone, Default, Args)]
pub struct RootArgs {
    /// Claude Code projects directory.
    #[arg(long, value_name = "DIR")]
    pub claude_dir: Option<PathBuf>,
    /// Codex CLI sessions directory.
    #[arg(long, value_name = "DIR")]
    pub codex_dir: Option<PathBuf>,
    /// Gemini CLI tmp directory.
    #[arg(long, value_name = "DIR")]
    pub gemini_dir: Option<PathBuf>,
}

/// Repeatable `--filter key=value` pairs.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Session filter, e.g. `provider=codex`, `model=gpt-5,o3`, `minCost=1` (repeatable).
    #[arg(long = "filter", value_name = "KEY=VALUE", value_parser = parse_pair)]
    pub pairs: Vec<(String, String)>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scans transcript directories and indexes new or changed files.
    Index {
        #[command(flatten)]
        roots: RootArgs,
        /// Hide the progress bar.
        #[arg(long, default_value_t = false)]
        quiet: bool,
    },
    /// Re-indexes periodically until interrupted.
    Watch {
        #[command(flatten)]
        roots: RootArgs,
        /// Seconds between passes (overrides `TOKENSCOPE_REINDEX_SECS`).
        #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },
    /// Prints the analytics report for a date range as JSON.
    Stats {
        /// First day (UTC), default 29 days before `--to`.
        #[arg(long, value_name = "YYYY-MM-DD")]
        from: Option<NaiveDate>,
        /// Last day (UTC, inclusive), default today.
        #[arg(long, value_name = "YYYY-MM-DD")]
        to: Option<NaiveDate>,
        /// Bucket the timeseries by hour instead of day.
        #[arg(long, default_value_t = false)]
        hour: bool,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Lists sessions, most recent first.
    Sessions {
        #[command(flatten)]
        filter: FilterArgs,
        /// Include compressed sessions.
        #[arg(long, default_value_t = false)]
        all: bool,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Lists projects with their live aggregates.
    Projects,
    /// Hides sessions from listings and project aggregates.
    Compress {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Reverses `compress`.
    Restore {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Permanently deletes sessions with their links and review references.
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Confirm deletion.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

impl Cli {
    /// Apply flag overrides on top of the loaded config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(db) = &self.db {
            config.db_path = Some(db.clone());
        }
        match self.verbose {
            0 => {}
            1 => config.log_filter = "info".into(),
            _ => config.log_filter = "debug".into(),
        }
        match &self.command {
            Commands::Index { roots, .. } => roots.apply(config),
            Commands::Watch { roots, interval } => {
                roots.apply(config);
                if let Some(secs) = interval {
                    config.reindex_interval = std::time::Duration::from_secs(*secs);
                }
            }
            _ => {}
        }
    }
}

impl RootArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.claude_dir {
            config.claude_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.codex_dir {
            config.codex_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.gemini_dir {
            config.gemini_dir = Some(dir.clone());
        }
    }
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
