//! Sumi-Sift main entry point
//!
//! This is the command-line interface for the Sumi-Sift document pipeline.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use sumi_sift::checksum::open_store;
use sumi_sift::committer::JsonLinesCommitter;
use sumi_sift::config::{load_config_with_hash, Config};
use sumi_sift::crawler::{read_documents, run_session};
use sumi_sift::output::{load_statistics, print_session_summary, print_statistics};
use tracing_subscriber::EnvFilter;

/// Sumi-Sift: filter, change-detect and durably commit crawled documents
///
/// Sumi-Sift reads fetched documents as JSON lines, decides for each one
/// whether it is rejected, unchanged, new or modified, and delivers the
/// accepted ones through a crash-recoverable batched queue.
#[derive(Parser, Debug)]
#[command(name = "sumi-sift")]
#[command(version = "1.0.0")]
#[command(about = "Document evaluation and durable commit staging", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// JSON-lines file of fetched documents (standard input if omitted)
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Forget stored signatures so every document counts as new
    #[arg(long)]
    fresh: bool,

    /// Validate config and show the pipeline without processing anything
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show staging area and checksum store statistics and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_session(config, cli.input.as_deref(), cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_sift=info,warn"),
            1 => EnvFilter::new("sumi_sift=debug,info"),
            2 => EnvFilter::new("sumi_sift=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Logs go to stderr so committed JSON lines can use stdout.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the pipeline and queue configuration
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Sift Dry Run ===\n");

    println!("Pipeline:");
    println!("  No-match policy: {:?}", config.pipeline.on_no_match);
    println!("  Workers: {}", config.pipeline.workers);

    println!("\nMetadata Filters ({}):", config.metadata_filters.len());
    for rule in &config.metadata_filters {
        let field = rule.field.as_ref().map(|f| f.pattern.as_str()).unwrap_or("");
        println!(
            "  - {:?} when {} ~ {} ({:?})",
            rule.on_match, field, rule.value.pattern, rule.value.method
        );
    }

    println!("\nContent Filters ({}):", config.content_filters.len());
    for rule in &config.content_filters {
        println!(
            "  - {:?} when content ~ {} ({:?})",
            rule.on_match, rule.value.pattern, rule.value.method
        );
    }

    println!("\nChecksum:");
    match &config.checksum {
        None => println!("  Disabled (every accepted document is new)"),
        Some(checksum) if checksum.use_content => println!("  Content digest"),
        Some(checksum) => println!(
            "  Metadata digest over: {}",
            checksum
                .field
                .as_ref()
                .map(|f| f.pattern.as_str())
                .unwrap_or(sumi_sift::checksum::DEFAULT_FIELD)
        ),
    }
    if let Some(path) = config.checksum.as_ref().and_then(|c| c.database_path.as_ref()) {
        println!("  Store: {}", path);
    }

    println!("\nQueue:");
    println!("  Directory: {}", config.queue.directory);
    println!("  Batch size: {}", config.queue.batch_size);
    println!("  Batches per folder: {}", config.queue.max_per_folder);
    println!("  Max pending batches: {}", config.queue.max_pending_batches);
    println!("  Flush interval: {}ms", config.queue.flush_interval_ms);
    println!(
        "  Retries: {} ({}ms to {}ms)",
        config.queue.max_retries, config.queue.retry_delay_ms, config.queue.max_retry_delay_ms
    );

    println!("\nCommitter:");
    println!(
        "  Output: {}",
        config.committer.output.as_deref().unwrap_or("standard output")
    );

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows what is staged and stored
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let staging = Path::new(&config.queue.directory);
    println!("Staging area: {}\n", staging.display());

    let store_path = config
        .checksum
        .as_ref()
        .and_then(|c| c.database_path.as_deref())
        .map(Path::new);
    let store = match store_path {
        Some(path) => Some(open_store(Some(path))?),
        None => None,
    };

    let stats = load_statistics(staging, store.as_deref())?;
    print_statistics(&stats);
    Ok(())
}

/// Handles the main operation: evaluate documents and deliver them
async fn handle_session(config: Config, input: Option<&Path>, fresh: bool) -> anyhow::Result<()> {
    let records = match input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            read_documents(std::io::BufReader::new(file))
        }
        None => read_documents(std::io::stdin().lock()),
    }
    .map_err(|e| anyhow::anyhow!("invalid document input: {}", e))?;
    tracing::info!("Read {} documents", records.len());

    if fresh {
        if let Some(path) = config.checksum.as_ref().and_then(|c| c.database_path.as_deref()) {
            tracing::info!("Clearing stored signatures (fresh session)");
            open_store(Some(Path::new(path)))?.clear()?;
        }
    }

    let committer = JsonLinesCommitter::from_settings(&config.committer);
    match run_session(&config, Box::new(committer), records).await {
        Ok(summary) => {
            tracing::info!("Session completed successfully");
            if config.committer.output.is_some() {
                print_session_summary(&summary);
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Session failed: {}", e);
            Err(e.into())
        }
    }
}

