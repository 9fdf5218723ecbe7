//! catsync - reconcile a local library against the remote catalog
//!
//! Reads a JSON manifest of local tracks, decides for each one whether it is
//! already in the catalog, and uploads or patches what is missing. Every
//! decision is appended to a JSON-lines log.
//!
//! Exit status: 0 on success, 1 if any track failed, 2 if the run was
//! aborted, 130 if interrupted.

use anyhow::{bail, Context, Result};
use catsync_common::logging::init_tracing;
use catsync_engine::config::load_app_config;
use catsync_engine::models::Track;
use catsync_engine::services::{HttpCatalogApi, JsonlDecisionLog, RateLimitedTransport, ReconciliationOrchestrator};
use catsync_engine::services::RunOutcome;
use clap::Parser;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "catsync", version, about = "Reconcile a local music library against a remote catalog")]
struct Args {
    /// Config file (default: $CATSYNC_CONFIG, then ~/.config/catsync/catsync.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON array of local tracks
    #[arg(long)]
    tracks: PathBuf,

    /// Decision log (JSON lines, appended)
    #[arg(long, default_value = "catsync-decisions.jsonl")]
    decision_log: PathBuf,

    /// Fetch the catalog even if a valid snapshot exists
    #[arg(long)]
    force_refresh: bool,

    /// Compare raw metadata strings instead of normalized ones
    #[arg(long)]
    legacy_exact_match: bool,

    /// Refresh the catalog after each upload and confirm the new entry
    #[arg(long)]
    verify_uploads: bool,

    /// Catalog API base URL (overrides the config file)
    #[arg(long, env = "CATSYNC_API_URL")]
    api_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = load_app_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = args.api_url {
        config.remote.base_url = url;
    }
    config.reconcile.force_refresh |= args.force_refresh;
    config.reconcile.legacy_exact_match |= args.legacy_exact_match;
    config.reconcile.verify_uploads |= args.verify_uploads;

    init_tracing(&config.logging)?;

    info!("Starting catsync {}", env!("CARGO_PKG_VERSION"));
    info!("Catalog API: {}", config.remote.base_url);

    let tracks = read_manifest(&args.tracks).await?;
    info!("Loaded {} tracks from {}", tracks.len(), args.tracks.display());

    let api = Arc::new(HttpCatalogApi::from_config(&config.remote)?);
    let transport = RateLimitedTransport::from_config(&config.remote);
    let orchestrator = ReconciliationOrchestrator::new(api, transport, config.reconcile.clone());

    let log = JsonlDecisionLog::open(&args.decision_log)
        .await
        .with_context(|| format!("Failed to open decision log {}", args.decision_log.display()))?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, finishing in-flight tracks");
                cancel.cancel();
            }
        });
    }

    let report = orchestrator.run(tracks, &log, cancel).await;

    for line in report.display_lines() {
        println!("{}", line);
    }

    let code = match report.outcome {
        RunOutcome::Aborted(_) => ExitCode::from(2),
        RunOutcome::Cancelled => ExitCode::from(130),
        RunOutcome::Completed if !report.statistics.failed.is_empty() => ExitCode::from(1),
        RunOutcome::Completed => ExitCode::SUCCESS,
    };
    Ok(code)
}

/// Load the track manifest, rejecting duplicate track ids
async fn read_manifest(path: &Path) -> Result<Vec<Track>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read track manifest {}", path.display()))?;
    let tracks: Vec<Track> = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid track manifest {}", path.display()))?;

    let mut seen = HashSet::new();
    for track in &tracks {
        if !seen.insert(track.id.as_str()) {
            bail!("Duplicate track id in manifest: {}", track.id);
        }
    }

    Ok(tracks)
}
