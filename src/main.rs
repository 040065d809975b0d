use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use segment_server::options::KNOWN_TASKS;
use segment_server::watchdog::WATCHDOG_EXIT_CODE;
use segment_server::server::{self, Shutdown};
use segment_server::{segmenter, storage, AppState, CliSegmenter, ServiceConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "segment-server", version, about = "HTTP API around an external segmentation engine")]
struct Cli {
    #[command(flatten)]
    config: ServiceConfig,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Download pretrained engine weights ahead of the first request.
    FetchWeights {
        #[arg(long, env = "WEIGHTS_DOWNLOADER_BIN", default_value = "totalseg_download_weights")]
        bin: PathBuf,

        /// Tasks to fetch. Every known task when omitted.
        #[arg(long = "task")]
        tasks: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::FetchWeights { bin, tasks }) => fetch_weights(bin, tasks).await,
        None => serve(cli.config).await,
    }
}

async fn fetch_weights(bin: PathBuf, tasks: Vec<String>) -> anyhow::Result<ExitCode> {
    let tasks = if tasks.is_empty() {
        KNOWN_TASKS.iter().map(|t| t.to_string()).collect()
    } else {
        tasks
    };

    let fetched = segmenter::fetch_weights(&bin, &tasks).await;
    tracing::info!(fetched, requested = tasks.len(), "weight prefetch finished");
    Ok(ExitCode::SUCCESS)
}

async fn serve(config: ServiceConfig) -> anyhow::Result<ExitCode> {
    storage::prepare_workspace(&[&config.inputs_dir, &config.outputs_dir])
        .context("failed to prepare input/output directories")?;

    let addr = config.socket_addr()?;
    let grace = config.shutdown_grace();
    let segmenter = Arc::new(
        CliSegmenter::new(config.segmenter_bin.clone())
            .with_launcher_args(config.segmenter_args.clone()),
    );
    let (state, termination) = AppState::new(config, segmenter);
    let deadline = state.watchdog.deadline();
    let app = segment_server::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    tracing::info!("Segmentation server starting on http://{addr}");
    tracing::info!(?deadline, "Segmentation deadline");
    tracing::info!("Available endpoints:");
    tracing::info!("  - GET  /health        - Health check");
    tracing::info!("  - POST /segment_file  - Multipart upload, returns the label volume");
    tracing::info!("  - POST /segment_url   - Fetch a volume by URL, returns the label volume");
    tracing::info!("  - POST /segment_input - Segment a server-local path");
    tracing::info!("  - POST /segment_path  - Alias of /segment_input");

    // Returning drops the runtime, which kills engine children still running.
    match server::serve(listener, app, termination, server::shutdown_signal(), grace).await? {
        Shutdown::Signal => {
            tracing::info!("server stopped");
            Ok(ExitCode::SUCCESS)
        }
        Shutdown::Watchdog(reason) => {
            tracing::error!(?reason, code = WATCHDOG_EXIT_CODE, "exiting for supervisor restart");
            Ok(ExitCode::from(WATCHDOG_EXIT_CODE))
        }
    }
}
