//! squall: A standalone tool for exporting delimited records as a
//! gzip-compressed CSV object.
//!
//! This tool reads records from a file or stdin and streams them to S3, GCS,
//! or the local filesystem. Object-store destinations are written with a
//! concurrent multipart upload that is either completed in full or aborted.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use squall::config::{Config, delimiter_byte};
use squall::error::{AddressParseSnafu, ConfigSnafu, ExportError, MetricsSnafu, SourceSnafu};
use squall::metrics;
use squall::pipeline::{
    Cancellation, ExportOptions, resolve_destination, run_export, spawn_signal_handler,
};
use squall::source::DelimitedSource;

/// Delimited records to gzip CSV object export tool.
#[derive(Parser, Debug)]
#[command(name = "squall")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input file, or "-" for stdin. Overrides `source.path`.
    #[arg(short, long)]
    input: Option<String>,

    /// Destination URL or path. Overrides `destination.path`.
    #[arg(short, long, env = "SQUALL_DESTINATION")]
    destination: Option<String>,

    /// Concurrent part uploads. Overrides `upload.workers`.
    #[arg(long)]
    workers: Option<usize>,

    /// Target part size in MB. Overrides `upload.part_size_mb`.
    #[arg(long)]
    part_size_mb: Option<usize>,

    /// Gzip level, 0-9. Overrides `compression.level`.
    #[arg(long)]
    compression_level: Option<u32>,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    metrics_address: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without exporting.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), ExportError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("squall starting");

    let config = build_config(&args)?;

    if args.dry_run {
        let options = ExportOptions::from_config(&config).context(ConfigSnafu)?;
        let backend = resolve_destination(&config.destination.path)?;
        info!("Dry run mode - validating configuration");
        info!("Source: {}", config.source.path);
        info!(
            "Destination: {} ({})",
            config.destination.path,
            backend.backend_name()
        );
        info!(
            "Part size: {} bytes, workers: {}, queue depth: {}",
            options.part_policy.part_size, options.workers, options.queue_depth
        );
        info!("Compression level: {}", options.compression_level);
        info!("Configuration is valid");
        return Ok(());
    }

    // Initialize metrics if enabled
    let metrics_shutdown = CancellationToken::new();
    let metrics_server = if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        let handle = metrics::init(addr, metrics_shutdown.clone()).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
        Some(handle)
    } else {
        None
    };

    let source = DelimitedSource::open(
        &config.source.path,
        delimiter_byte(config.source.delimiter).context(ConfigSnafu)?,
        config.source.has_headers,
    )
    .context(SourceSnafu)?;

    let cancel = Cancellation::new();
    let signals = spawn_signal_handler(cancel.clone());

    let result = run_export(&config, source, cancel).await;

    signals.abort();
    metrics_shutdown.cancel();
    if let Some(server) = metrics_server {
        let _ = server.await;
    }

    let stats = result?;
    info!("Export completed successfully");
    info!("  Rows exported: {}", stats.rows);
    info!("  Parts uploaded: {}", stats.parts);
    info!("  Compressed bytes: {}", stats.compressed_bytes);
    info!("  Outcome: {}", stats.outcome);

    Ok(())
}

/// Build configuration from the file, if any, and command-line overrides.
fn build_config(args: &Args) -> Result<Config, ExportError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).context(ConfigSnafu)?,
        None => Config::for_destination(""),
    };

    if let Some(input) = &args.input {
        config.source.path = input.clone();
    }
    if let Some(destination) = &args.destination {
        config.destination.path = destination.clone();
    }
    if let Some(workers) = args.workers {
        config.upload.workers = workers;
    }
    if let Some(part_size_mb) = args.part_size_mb {
        config.upload.part_size_mb = part_size_mb;
    }
    if let Some(level) = args.compression_level {
        config.compression.level = level;
    }
    if let Some(address) = &args.metrics_address {
        config.metrics.enabled = true;
        config.metrics.address = address.clone();
    }

    config.validate().context(ConfigSnafu)?;
    Ok(config)
}
