//! Event courier entry point.
//!
//! Usage: event-courier [--config <path>] [--collector-url <url>]
//!
//! Reads one JSON value per line from stdin and captures each as an event.
//! Exits on end of input or on Ctrl-C/SIGTERM, closing the pipeline so
//! queued events get their shutdown grace period.

use anyhow::{Context, Result};
use clap::Parser;
use delivery_lifecycle::{install_signal_handler, ShutdownManager};
use event_delivery::{Connection, Pipeline, PipelineConfig};
use observability::{LogConfig, LogFormat};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Ships newline-delimited JSON events from stdin to a collector.
#[derive(Parser, Debug)]
#[command(name = "event-courier")]
#[command(about = "Non-blocking, crash-safe event shipper")]
struct Args {
    /// Pipeline configuration file (JSON).
    #[arg(long, env = "EVENT_COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Collector URL; overrides the configuration file and environment.
    #[arg(long)]
    collector_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "EVENT_COURIER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "EVENT_COURIER_JSON_LOGS")]
    json_logs: bool,

    /// Append JSON logs to this file instead of stderr.
    #[arg(long, env = "EVENT_COURIER_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Totals {
    captured: u64,
    failed: u64,
    skipped: u64,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(args.config.as_deref())
        .context("failed to load pipeline configuration")?;
    if let Some(url) = &args.collector_url {
        config.transport.collector_url = url.clone();
        config.validate().context("invalid --collector-url")?;
    }
    Ok(config)
}

async fn pump_stdin(pipeline: &Pipeline, totals: &mut Totals) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let payload: serde_json::Value = match serde_json::from_str(line) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Skipping malformed input line");
                totals.skipped += 1;
                continue;
            }
        };

        match pipeline.capture(payload).await {
            Ok(()) => totals.captured += 1,
            Err(e) => {
                debug!(error = %e, "Capture failed");
                totals.failed += 1;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    observability::init_with_config(LogConfig {
        service_name: "event-courier".into(),
        default_level: args.log_level.clone(),
        format: if args.json_logs || args.log_file.is_some() {
            LogFormat::Json
        } else {
            LogFormat::Compact
        },
        log_path: args.log_file.clone(),
        ..Default::default()
    });

    let config = load_config(&args)?;
    info!(
        collector = %config.transport.collector_url,
        async_dispatch = config.dispatch.enabled,
        buffer = config.buffer.enabled,
        "Configuration loaded"
    );

    let shutdown = Arc::new(ShutdownManager::new());
    let pipeline = Pipeline::from_config(config, Some(shutdown.clone()))
        .context("failed to build delivery pipeline")?;

    // On Ctrl-C/SIGTERM the handler runs the shutdown hooks, closing the pipeline.
    let mut signals = install_signal_handler(shutdown.clone());

    let mut totals = Totals::default();
    tokio::select! {
        result = pump_stdin(&pipeline, &mut totals) => {
            signals.abort();
            result?;
            info!("End of input");
        }
        _ = &mut signals => {
            info!("Received shutdown signal, exiting...");
        }
    }

    pipeline
        .close()
        .await
        .context("failed to close delivery pipeline")?;
    shutdown.run().await;

    info!(
        captured = totals.captured,
        failed = totals.failed,
        skipped = totals.skipped,
        "Event courier stopped"
    );
    Ok(())
}
