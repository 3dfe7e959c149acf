//! Nodeboard
//!
//! Ranked leaderboard and subscription feed for self-reported proxy node
//! measurements.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── SERVER ────────────────────────────┐
//! │  POST /nodes/<token>  ──► Registry (top N, freshness ranked)   │
//! │  GET  /nodes/<token>  ◄── base64 subscription of ranked links  │
//! │  GET  /               ◄── plain-text leaderboard               │
//! │  GET  /test (ws)      ──► Orchestrator ──► streamed results    │
//! └────────────────────────────────────────────────────────────────┘
//!                              ▲ POST
//! ┌──────────────────────────── CLIENT ────────────────────────────┐
//! │  Reporting loop ──► Orchestrator ──► Queue (1000) ──► Relay    │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod api;
mod config;
mod orchestrator;
mod registry;
mod reporter;
mod types;

use api::ApiState;
use config::LeaderboardConfig;
use orchestrator::{ProfileOrchestrator, TestOrchestrator};

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Serve the leaderboard
    Server,
    /// Test nodes and report them to a server
    Client,
}

/// Nodeboard - proxy node leaderboard
#[derive(Parser, Debug)]
#[command(name = "nodeboard")]
#[command(author = "Nodeboard Contributors")]
#[command(version)]
#[command(about = "Ranked leaderboard and subscription feed for proxy nodes", long_about = None)]
struct Args {
    /// Operating mode
    #[arg(short = 's', long, value_enum, default_value_t = Mode::Server)]
    mode: Mode,

    /// Report destination URL (client mode)
    #[arg(short, long)]
    url: Option<String>,

    /// Listen port (server mode)
    #[arg(short, long)]
    port: Option<u16>,

    /// Subscription link or file path to test (client mode)
    #[arg(long)]
    test: Option<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "nodeboard.toml")]
    config: PathBuf,

    /// Test options JSON file
    #[arg(long)]
    options: Option<PathBuf>,

    /// Shared token for the ingest/export path
    #[arg(long)]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .init();

    info!("🏁 Nodeboard v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if args.config.exists() {
        LeaderboardConfig::load(&args.config)?
    } else {
        warn!("Config file {:?} not found, using defaults", args.config);
        LeaderboardConfig::default()
    };

    // Override config with CLI args
    let config = config
        .with_listen_port(args.port)
        .with_report_url(args.url)
        .with_test_source(args.test)
        .with_options_file(args.options)
        .with_token(args.token);

    config.validate()?;

    match args.mode {
        Mode::Server => run_server(config).await,
        Mode::Client => run_client(config).await,
    }
}

async fn run_server(config: LeaderboardConfig) -> anyhow::Result<()> {
    info!("⚙️  Configuration:");
    info!("   Listen port: {}", config.listen_port);
    info!("   Max nodes: {}", config.max_nodes);
    info!("   Ranking: {:?}", config.ranking);
    info!("   Freshness window: {}s", config.freshness_window_secs);
    info!("   Realtime sessions: {}", config.enable_sessions);

    let orchestrator: Option<Arc<dyn TestOrchestrator>> = if config.enable_sessions {
        Some(Arc::new(ProfileOrchestrator::from_probe_command(&config.probe_command)))
    } else {
        None
    };

    let state = Arc::new(ApiState::new(Arc::new(config), orchestrator));

    let api_handle = tokio::spawn(api::run_api_server(state.clone()));
    let status_handle = tokio::spawn(run_status_log(state.clone()));

    info!("✅ Server started");
    info!("   Press Ctrl+C to shutdown gracefully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
        result = api_handle => {
            error!("HTTP API exited: {:?}", result);
        }
        result = status_handle => {
            error!("Status task exited: {:?}", result);
        }
    }

    info!("👋 Nodeboard shutting down");
    Ok(())
}

async fn run_client(config: LeaderboardConfig) -> anyhow::Result<()> {
    info!("⚙️  Configuration:");
    info!("   Report URL: {}", config.report_url);
    info!("   Pass interval: {}s", config.pass_interval_secs);
    info!("   Queue capacity: {}", config.queue_capacity);

    let orchestrator: Arc<dyn TestOrchestrator> =
        Arc::new(ProfileOrchestrator::from_probe_command(&config.probe_command));

    let cancel = CancellationToken::new();
    let client = reporter::run_client(&config, orchestrator, cancel.clone());
    tokio::pin!(client);

    tokio::select! {
        result = &mut client => return result,
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
    }

    // Let the relay drain what is already queued
    cancel.cancel();
    client.await?;

    info!("👋 Nodeboard shutting down");
    Ok(())
}

/// Periodic leaderboard status line
async fn run_status_log(state: Arc<ApiState>) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));

    loop {
        interval.tick().await;

        let stats = state.registry.stats().await;
        state
            .metrics
            .set_board(stats.total_nodes as u64, stats.fresh_nodes as u64);

        info!(
            "📊 Status: {} nodes ({} fresh, {} stale), best avg={}, avg ping={:.0}ms",
            stats.total_nodes,
            stats.fresh_nodes,
            stats.stale_nodes,
            types::human_bytes(stats.best_avg_speed),
            stats.average_ping_ms
        );
    }
}
