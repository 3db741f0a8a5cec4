//! catfix-enrich - part catalog enrichment runner
//!
//! Loads a CSV of part records, reconciles each one against the catalog
//! (update, create or skip), and writes an annotated report plus a metrics
//! summary. `cache` subcommands inspect and maintain the classification cache;
//! `init-config` writes a starting config file.

use anyhow::{Context, Result};
use catfix_common::config::{default_config_path, init_config_file};
use catfix_common::{AppConfig, LoggingConfig};
use catfix_enrich::config::{resolve_run_config, validate_timeout, RunOverrides};
use catfix_enrich::tabular::{CsvLoader, CsvReporter};
use catfix_enrich::workflow::run_import_file;
use catfix_enrich::{build_context, ResultCache};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Command-line arguments for catfix-enrich
#[derive(Parser, Debug)]
#[command(name = "catfix-enrich")]
#[command(about = "Resilient part catalog enrichment")]
#[command(version)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true, env = "CATFIX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enrich every record of a CSV file and write a report
    Run {
        /// Input CSV (header must contain `partnumber`)
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for the report and metrics files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Records processed concurrently
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Use deterministic mock services instead of the configured endpoints
        #[arg(long)]
        use_mocks: bool,

        /// Mock behaviour profile (happy, missing, conflict, errorrate10, timeout)
        #[arg(long)]
        mock_profile: Option<String>,

        /// Minimum classification confidence for creating an item
        #[arg(long)]
        confidence_threshold: Option<f64>,

        /// Cancel unfinished records after this many seconds
        #[arg(long)]
        timeout_secs: Option<f64>,
    },

    /// Classification cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Write compiled defaults plus CATFIX_* overrides to a config file
    InitConfig {
        /// Target file (default: --config, then ~/.config/catfix/catfix.toml)
        path: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show cache location and entry count
    Stats,
    /// Remove expired and unreadable entries
    Purge,
    /// Remove every entry
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            input,
            output_dir,
            concurrency,
            use_mocks,
            mock_profile,
            confidence_threshold,
            timeout_secs,
        } => {
            let overrides = RunOverrides {
                output_dir,
                concurrency,
                use_mocks: use_mocks.then_some(true),
                mock_profile,
                confidence_threshold,
            };
            let config = resolve_run_config(cli.config.as_deref(), &overrides)
                .context("Failed to resolve configuration")?;
            let timeout = validate_timeout(timeout_secs).context("Invalid --timeout-secs")?;
            init_tracing(&config.logging)?;
            log_startup(&config);

            run(config, input, timeout).await
        }
        Command::Cache { action } => {
            let config =
                AppConfig::load(cli.config.as_deref()).context("Failed to resolve configuration")?;
            init_tracing(&config.logging)?;
            cache_command(&config, action)
        }
        Command::InitConfig { path, force } => {
            init_tracing(&LoggingConfig::default())?;
            let path = path
                .or(cli.config)
                .or_else(default_config_path)
                .context("No config directory on this platform; pass a target path")?;
            init_config_file(&path, force)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

/// Registry + EnvFilter + fmt layer (stderr, or the configured log file)
///
/// RUST_LOG wins over the configured level.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("catfix_enrich={level},catfix_common={level},warn", level = logging.level).into()
    });

    let file_layer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

fn log_startup(config: &AppConfig) {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("CATFIX_GIT_HASH"),
        built = env!("CATFIX_BUILD_TIMESTAMP"),
        "Starting catfix-enrich"
    );
    info!(
        mode = if config.use_mocks { "mock" } else { "live" },
        concurrency = config.concurrency,
        confidence_threshold = config.confidence_threshold,
        output_dir = %config.output_dir.display(),
        "Configuration"
    );
}

async fn run(
    config: AppConfig,
    input: PathBuf,
    timeout: Option<std::time::Duration>,
) -> Result<()> {
    let cancel = CancellationToken::new();
    spawn_cancel_watchers(cancel.clone(), timeout);

    let ctx = Arc::new(
        build_context(&config, cancel.clone()).context("Failed to build service clients")?,
    );
    let loader = CsvLoader::new(&input);
    let reporter = CsvReporter::new(&config.output_dir);

    let (report, summary) =
        run_import_file(Arc::clone(&ctx), &loader, &reporter, config.concurrency)
            .await
            .with_context(|| format!("Import of {} failed", input.display()))?;

    if cancel.is_cancelled() {
        warn!("Run was cancelled, unfinished records are marked row_failed:Cancelled");
    }
    if let Some(cache) = ctx.cache() {
        let stats = cache.stats();
        info!(
            memory_hits = stats.memory_hits,
            disk_hits = stats.disk_hits,
            misses = stats.misses,
            hit_rate = stats.hit_rate(),
            "Classification cache"
        );
    }

    println!("{}", summary.display_string());
    println!("Report: {}", report.display());
    Ok(())
}

/// Ctrl+C and the optional run timeout both cancel the batch
fn spawn_cancel_watchers(cancel: CancellationToken, timeout: Option<std::time::Duration>) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => warn!("Interrupt received, cancelling run"),
                    Err(e) => {
                        warn!(error = %e, "Failed to install Ctrl+C handler");
                        return;
                    }
                }
                on_signal.cancel();
            }
            _ = on_signal.cancelled() => {}
        }
    });

    if let Some(limit) = timeout {
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {
                    warn!(timeout_secs = limit.as_secs_f64(), "Run timeout reached, cancelling");
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        });
    }
}

fn cache_command(config: &AppConfig, action: CacheAction) -> Result<()> {
    let Some(cache) = ResultCache::from_config(&config.cache) else {
        println!("Cache is disabled (cache.enabled = false)");
        return Ok(());
    };
    let dir = cache.disk().dir().display().to_string();

    match action {
        CacheAction::Stats => {
            println!("Cache directory: {}", dir);
            println!("Entries: {}", cache.disk().entry_count());
            println!("Max age: {} h", config.cache.max_age_hours);
        }
        CacheAction::Purge => {
            let removed = cache.purge_expired();
            info!(removed, dir = %dir, "Purged expired cache entries");
            println!("Removed {} expired entries from {}", removed, dir);
        }
        CacheAction::Clear => {
            let removed = cache.clear_all();
            info!(removed, dir = %dir, "Cleared cache");
            println!("Removed {} entries from {}", removed, dir);
        }
    }
    Ok(())
}
