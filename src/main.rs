//! bucketsync: mirror a local directory into an S3 bucket.
//!
//! Run with: bucketsync <bucket> <region> <root> [--interval <secs>]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use humansize::{format_size, BINARY};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bucketsync::config::SyncConfig;
use bucketsync::store::S3Store;
use bucketsync::sync::{run_periodic, shutdown_channel, CycleReport, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "bucketsync")]
#[command(about = "Mirror a local directory into an S3 bucket")]
struct Args {
    /// Target bucket
    bucket: Option<String>,

    /// Bucket region
    region: Option<String>,

    /// Local directory to mirror
    root: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "BUCKETSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Custom endpoint for S3-compatible providers
    #[arg(long, env = "BUCKETSYNC_ENDPOINT")]
    endpoint: Option<String>,

    /// Number of upload workers
    #[arg(long)]
    workers: Option<usize>,

    /// Seconds between cycles; runs a single cycle when omitted
    #[arg(long)]
    interval: Option<u64>,

    /// Also match ignore patterns against file names
    #[arg(long)]
    match_file_names: bool,

    /// Do not read .syncignore from the root
    #[arg(long)]
    no_ignore_file: bool,

    /// Print the cycle summary as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Load the config file, if any, and apply command line overrides.
    fn into_config(self) -> Result<SyncConfig> {
        let path = self
            .config
            .clone()
            .or_else(|| SyncConfig::default_path().filter(|path| path.exists()));

        let mut config = match &path {
            Some(path) => SyncConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => SyncConfig::default(),
        };

        if let Some(bucket) = self.bucket {
            config.bucket = bucket;
        }
        if let Some(region) = self.region {
            config.region = region;
        }
        if let Some(root) = self.root {
            config.root = root;
        }
        if self.endpoint.is_some() {
            config.endpoint = self.endpoint;
        }
        if let Some(workers) = self.workers {
            config.upload_workers = workers;
        }
        if self.interval.is_some() {
            config.interval_secs = self.interval;
        }
        if self.match_file_names {
            config.match_file_names = true;
        }
        if self.no_ignore_file {
            config.use_ignore_file = false;
        }

        if config.bucket.is_empty() {
            bail!("No bucket given: pass it as the first argument or set `bucket` in the config file");
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

fn print_report(report: &CycleReport, json: bool) -> Result<()> {
    let summary = report.summary();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "uploaded {} ({}), skipped {}, failed {}, deleted {} in {} ms",
        summary.uploaded,
        format_size(summary.bytes_transferred, BINARY),
        summary.skipped,
        summary.failed,
        summary.deleted,
        summary.duration_ms
    );
    for failure in &summary.failures {
        println!("  failed: {} ({})", failure.key, failure.error);
    }
    if let Some(error) = &summary.reconcile_error {
        println!("  reconcile skipped: {error}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let json = args.json;

    let config = args.into_config()?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let store = S3Store::new(&config, runtime.handle().clone())?;
    info!(bucket = store.bucket(), region = %config.region, root = %config.root.display(), "bucketsync starting");

    let interval = config.interval();
    let engine = SyncEngine::new(config, Arc::new(store))?;

    match interval {
        None => {
            let report = engine.run_cycle()?;
            print_report(&report, json)?;
            if !report.is_success() {
                bail!("Sync cycle finished with failures");
            }
        }
        Some(interval) => {
            let (mut handle, signal) = shutdown_channel();
            runtime.spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    handle.trigger();
                }
            });
            run_periodic(&engine, interval, &signal);
        }
    }

    Ok(())
}
