//! mediacache CLI
//!
//! Operates an on-device media cache directory from the command line.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          mediacache                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────────┐    ┌──────────────┐   │
//! │  │ LocatorRouter│───▶│ CacheOrchestrator│───▶│  cache_dir   │   │
//! │  │ (file/http)  │    │  + loops         │    │ blobs/ index │   │
//! │  └──────────────┘    └──────────────────┘    └──────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mediacache::adapters::{LocatorRouter, PlaylistHints, PrometheusExporter, SharedNetworkMonitor};
use mediacache::cache::config::parse_duration;
use mediacache::cache::{
    CacheConfig, CacheOrchestrator, CacheResult, CacheStrategy, ClearOptions, Priority,
};

const MB: u64 = 1024 * 1024;

// =============================================================================
// CLI Arguments
// =============================================================================

/// mediacache - adaptive on-device media cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "MEDIACACHE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides the config file)
    #[arg(long, env = "MEDIACACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Cache budget in MB (overrides the config file)
    #[arg(long, env = "MEDIACACHE_MAX_SIZE_MB", global = true)]
    max_size_mb: Option<u64>,

    /// Current network throughput in Mbps
    #[arg(long, env = "MEDIACACHE_THROUGHPUT_MBPS", default_value = "10", global = true)]
    throughput_mbps: f64,

    /// Free device storage in MB
    #[arg(long, env = "MEDIACACHE_AVAILABLE_STORAGE_MB", default_value = "4096", global = true)]
    available_storage_mb: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cache a content item
    Cache {
        locator: String,
        /// low, normal, high or critical
        #[arg(long, default_value = "normal")]
        priority: Priority,
        /// aggressive, conservative, adaptive or smart-segments
        #[arg(long, default_value = "adaptive")]
        strategy: CacheStrategy,
    },
    /// Read cached bytes
    Get {
        locator: String,
        /// Write the bytes here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Show cache analytics
    Stats {
        /// Print the full report as JSON
        #[arg(long, conflicts_with = "prometheus")]
        json: bool,
        /// Print Prometheus text exposition
        #[arg(long)]
        prometheus: bool,
    },
    /// Run an optimization pass
    Optimize {
        /// Also evict LRU entries down to the low watermark
        #[arg(long)]
        force: bool,
    },
    /// Remove entries
    Clear {
        #[arg(long)]
        all: bool,
        /// Entries created longer ago than this (e.g. 30d)
        #[arg(long, value_parser = parse_duration)]
        older_than: Option<Duration>,
        #[arg(long)]
        low_priority: bool,
        /// Entries idle for the configured unused age
        #[arg(long)]
        unused: bool,
    },
    /// Export entry metadata and metrics as JSON
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Import a snapshot produced by `export`
    Import { input: PathBuf },
    /// Keep the cache running with its background loops until Ctrl-C
    Watch {
        /// Playlist used to predict what to prefetch next
        #[arg(long, value_delimiter = ',')]
        playlist: Vec<String>,
        /// Cache this item first
        #[arg(long)]
        play: Option<String>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let config = load_config(&args)?;
    info!("Using cache directory {}", config.cache_dir.display());

    let network = Arc::new(SharedNetworkMonitor::new(
        (args.throughput_mbps.max(0.0) * 1_000_000.0) as u64,
        args.available_storage_mb.saturating_mul(MB),
    ));
    let mut cache = CacheOrchestrator::new(Arc::new(LocatorRouter::standard()), network);
    if let Command::Watch { playlist, .. } = &args.command {
        if !playlist.is_empty() {
            cache = cache.with_playback_hints(Arc::new(PlaylistHints::new(playlist.clone())));
        }
    }
    let cache = Arc::new(cache);

    cache
        .initialize(config)
        .await
        .context("failed to initialize the cache")?;

    let outcome = run_command(&cache, args.command).await;
    if let Err(e) = cache.cleanup().await {
        error!("Cache cleanup failed: {}", e);
    }
    outcome
}

async fn run_command(cache: &Arc<CacheOrchestrator>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Cache {
            locator,
            priority,
            strategy,
        } => {
            let result = cache.cache_content(&locator, priority, strategy).await?;
            print_cache_result(&locator, &result);
            if let CacheResult::Error { message } = result {
                bail!("caching {} failed: {}", locator, message);
            }
        }
        Command::Get { locator, output } => {
            let Some(content) = cache.get_cached_content(&locator).await? else {
                bail!("{} is not cached", locator);
            };
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &content.data)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!(
                        "Wrote {} bytes of {} to {} (complete: {})",
                        content.data.len(),
                        locator,
                        path.display(),
                        content.complete
                    );
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&content.data).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Stats { json, prometheus } => {
            let report = cache.get_cache_analytics()?;
            if prometheus {
                print!("{}", PrometheusExporter::new()?.render(&report)?);
            } else if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("State:        {}", report.state);
                println!("Entries:      {}", report.total_entries);
                println!(
                    "Size:         {} / {} bytes ({:.1}%)",
                    report.total_size_bytes,
                    report.max_size_bytes,
                    report.utilization * 100.0
                );
                println!("Hit rate:     {:.2}", report.metrics.hit_rate);
                println!(
                    "Health:       {:.2} ({})",
                    report.health.score, report.health.status
                );
                println!("Compressed:   {}", report.compressed_entries);
                println!(
                    "Saved:        {} bytes",
                    report.metrics.compression_savings()
                );
                for (priority, stats) in &report.by_priority {
                    println!(
                        "  {:<9} {} entries, {} bytes",
                        priority.name(),
                        stats.entries,
                        stats.bytes
                    );
                }
                for recommendation in &report.recommendations {
                    println!("* {}", recommendation);
                }
            }
        }
        Command::Optimize { force } => {
            let report = cache.optimize_storage(force).await?;
            println!(
                "Removed {} entries, freed {} bytes (utilization {:.2} -> {:.2})",
                report.entries_removed,
                report.space_freed,
                report.utilization_before,
                report.utilization_after
            );
        }
        Command::Clear {
            all,
            older_than,
            low_priority,
            unused,
        } => {
            let options = ClearOptions {
                clear_all: all,
                older_than,
                low_priority,
                unused,
            };
            if options == ClearOptions::default() {
                bail!("nothing selected; pass --all, --older-than, --low-priority or --unused");
            }
            let report = cache.clear_cache(options).await?;
            println!(
                "Removed {} entries, freed {} bytes",
                report.entries_removed, report.space_freed
            );
        }
        Command::Export { output } => {
            let snapshot = cache.export_cache_data().await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, snapshot)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!("Exported cache metadata to {}", path.display());
                }
                None => println!("{}", snapshot),
            }
        }
        Command::Import { input } => {
            let raw = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("failed to read {}", input.display()))?;
            let report = cache.import_cache_data(&raw).await?;
            println!(
                "Snapshot {}: {} entries applied, {} skipped",
                report.snapshot_id, report.entries_applied, report.entries_skipped
            );
        }
        Command::Watch { play, .. } => {
            let mut events = cache.subscribe();
            let printer = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    info!(event_type = %event.event_type(), "{}", serde_json::to_string(&event).unwrap_or_default());
                }
            });

            cache.enable_intelligent_prefetching(true).await?;
            if let Some(locator) = play {
                let result = cache
                    .cache_content(&locator, Priority::Normal, CacheStrategy::Adaptive)
                    .await?;
                print_cache_result(&locator, &result);
            }

            info!("Watching cache; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            info!("Shutting down");
            printer.abort();
        }
    }
    Ok(())
}

fn print_cache_result(locator: &str, result: &CacheResult) {
    match result {
        CacheResult::Success {
            key,
            cached_size,
            compression_ratio,
            elapsed,
        } => println!(
            "Cached {} as {} ({} bytes, ratio {:.2}, {:?})",
            locator, key, cached_size, compression_ratio, elapsed
        ),
        CacheResult::AlreadyCached { key } => println!("{} already cached as {}", locator, key),
        CacheResult::InsufficientSpace {
            required,
            available,
        } => println!(
            "Not enough space for {}: need {} bytes, {} available",
            locator, required, available
        ),
        CacheResult::Error { message } => println!("Failed to cache {}: {}", locator, message),
    }
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(args: &Args) -> anyhow::Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(mb) = args.max_size_mb {
        config.max_cache_size_bytes = mb.saturating_mul(MB);
    }
    // Only `watch` runs long enough for prefetching to matter
    if !matches!(args.command, Command::Watch { .. }) {
        config.prefetching_enabled = false;
    }
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("reqwest=warn".parse()?)
        .add_directive("hyper=warn".parse()?);

    // Logs go to stderr so `get` and `export` can stream to stdout
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}
