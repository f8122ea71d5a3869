//! `sessionwire-replay-server` entry point.
//!
//! Serves recorded runs over the same HTTP/SSE surface as a live backend.
//! Configuration comes from `--config` (or `./sessionwire.toml`) and
//! `SESSIONWIRE_*` environment variables; flags override both.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sessionwire_config::ConfigLoader;
use sessionwire_quota::{QuotaGuard, QuotaLimits};
use sessionwire_replay::{AppState, ReplayGate, ReplayManager, StreamSettings};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "sessionwire-replay-server", version)]
struct Cli {
    /// Configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:8787.
    #[arg(long)]
    bind: Option<String>,

    /// Directory holding `<runId>.events.ndjson` / `<runId>.report.json`.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = cli
        .config
        .clone()
        .or_else(ConfigLoader::find_config_file)
    {
        loader = loader.with_file(path);
    }
    let mut config = loader.load().context("failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(dir) = cli.snapshot_dir {
        config.replay.snapshot_dir = dir;
    }
    config.validate().context("invalid configuration")?;

    tracing::info!(
        "sessionwire-replay-server v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.deploy_env
    );

    let gate = ReplayGate::from_config(&config);
    if !gate.is_enabled() {
        tracing::warn!(?gate, "replay is disabled; only /healthz will be served");
    }

    let manager = Arc::new(ReplayManager::from_settings(&config.replay, gate));
    if gate.is_enabled() {
        match manager.snapshots().list_runs().await {
            Ok(runs) => tracing::info!(recorded_runs = runs.len(), "snapshot directory scanned"),
            Err(err) => tracing::warn!("snapshot directory is not readable yet: {err}"),
        }
    }
    let quota = Arc::new(QuotaGuard::new(QuotaLimits {
        requests_per_minute: config.quota.requests_per_minute,
        daily_token_cap: config.quota.daily_token_cap,
    }));
    let state = AppState::new(Arc::clone(&manager), Arc::clone(&quota))
        .with_stream_settings(StreamSettings::from(&config.replay))
        .with_keep_alive(Duration::from_secs(config.server.keep_alive_secs));
    let app = sessionwire_replay::router(state, config.server.max_body_bytes);

    let shutdown = CancellationToken::new();

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {err}");
            return;
        }
        tracing::info!("signal received, shutting down");
        shutdown_signal.cancel();
    });

    let sweep_shutdown = shutdown.clone();
    let sweep_every = Duration::from_secs(config.replay.sweep_interval_secs.max(1));
    let sweeper = Arc::clone(&manager);
    let quota_sweeper = Arc::clone(&quota);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            tokio::select! {
                _ = sweep_shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    sweeper.sweep().await;
                    quota_sweeper.sweep().await;
                }
            }
        }
    });

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    tracing::info!(
        "listening on {} (snapshots in {})",
        listener.local_addr()?,
        config.replay.snapshot_dir.display()
    );

    sessionwire_replay::serve(listener, app, shutdown).await?;

    tracing::info!("sessionwire-replay-server exiting cleanly");
    Ok(())
}
