// crates/cli/src/main.rs
//! tokenscope binary.
//!
//! Loads config, applies flag overrides, opens the database, then runs one
//! subcommand. Reports are printed to stdout as JSON; progress and logs go
//! to stderr.

mod cli;
mod logging;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use chrono::{Days, Utc};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokenscope_core::{Config, ProviderRegistry};
use tokenscope_db::{
    run_index, AnalyticsQuery, Database, FilterClause, Granularity, ListSessionsParams,
    ReindexCoordinator, SessionFilter,
};
use tracing::{info, warn};

use cli::{Cli, Commands, FilterArgs};

/// Default `stats` window when `--from` is omitted.
const DEFAULT_RANGE_DAYS: u64 = 29;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load()?;
    cli.apply(&mut config);
    logging::init(&config.log_filter, cli.log_format)?;

    let db_path = config
        .resolved_db_path()
        .ok_or_else(|| anyhow!("Could not determine cache directory for the database"))?;
    let db = Database::new(&db_path).await?;

    match cli.command {
        Commands::Index { quiet, .. } => index(&db, &config, quiet).await,
        Commands::Watch { .. } => watch(db, &config).await,
        Commands::Stats {
            from,
            to,
            hour,
            filter,
        } => {
            let to = to.unwrap_or_else(|| Utc::now().date_naive());
            let from = from.unwrap_or_else(|| {
                to.checked_sub_days(Days::new(DEFAULT_RANGE_DAYS)).unwrap_or(to)
            });
            let mut query = AnalyticsQuery::new(from, to);
            query.filter = filter_clause(&filter)?;
            if hour {
                query.granularity = Granularity::Hour;
            }
            print_json(&db.analytics(&query).await?)
        }
        Commands::Sessions {
            filter,
            all,
            limit,
            offset,
        } => {
            let params = ListSessionsParams {
                filter: filter_clause(&filter)?,
                include_compressed: all,
                limit,
                offset,
            };
            print_json(&db.list_sessions(&params).await?)
        }
        Commands::Projects => print_json(&db.list_projects().await?),
        Commands::Compress { ids } => {
            let changed = db.compress_sessions(&ids).await?;
            print_json(&serde_json::json!({ "compressed": changed }))
        }
        Commands::Restore { ids } => {
            let changed = db.restore_sessions(&ids).await?;
            print_json(&serde_json::json!({ "restored": changed }))
        }
        Commands::Delete { ids, yes } => {
            if !yes {
                bail!("Refusing to delete {} session(s) without --yes", ids.len());
            }
            print_json(&db.delete_sessions(&ids).await?)
        }
    }
}

fn filter_clause(args: &FilterArgs) -> Result<FilterClause> {
    let filter =
        SessionFilter::from_pairs(args.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    Ok(filter.to_clause()?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn index(db: &Database, config: &Config, quiet: bool) -> Result<()> {
    let roots = config.provider_roots();
    if roots.is_empty() {
        bail!("No transcript directories configured");
    }
    let registry = Arc::new(ProviderRegistry::default());
    let start = Instant::now();

    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    pb.set_style(ProgressStyle::with_template(
        "  {spinner} Indexing {pos}/{len} files {wide_bar}",
    )?);
    pb.enable_steady_tick(Duration::from_millis(100));

    let summary = run_index(&roots, registry, db, |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    })
    .await;
    pb.finish_and_clear();
    let summary = summary?;

    if !quiet {
        eprintln!(
            "  \u{2713} Indexed {} of {} files in {:.1}s ({} unchanged, {} empty, {} failed)",
            summary.indexed,
            summary.scanned,
            start.elapsed().as_secs_f64(),
            summary.unchanged,
            summary.empty,
            summary.failed,
        );
    }
    Ok(())
}

/// Re-index on an interval until Ctrl-C. Overlapping ticks are skipped by the
/// coordinator.
async fn watch(db: Database, config: &Config) -> Result<()> {
    let roots = Arc::new(config.provider_roots());
    if roots.is_empty() {
        bail!("No transcript directories configured");
    }
    let registry = Arc::new(ProviderRegistry::default());
    let coordinator = ReindexCoordinator::new();
    let period = config.reindex_interval;

    info!(
        interval_secs = period.as_secs(),
        roots = roots.len(),
        "Watching transcript directories"
    );

    let pass = move || {
        let db = db.clone();
        let roots = Arc::clone(&roots);
        let registry = Arc::clone(&registry);
        async move {
            if let Err(e) = run_index(&roots, registry, &db, |_, _| {}).await {
                warn!(error = %e, "Re-index pass failed");
            }
        }
    };

    tokio::select! {
        _ = coordinator.run_periodic(period, pass) => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!(skipped = coordinator.skipped(), "Stopping watch");
        }
    }
    Ok(())
}
