//! Check-in service (koino-checkin) - Main entry point
//!
//! Hosts the real-time attendance check-in rooms and the gamification
//! engine: presence over SSE, idempotent scoring, levels, streaks, badges
//! and leaderboards.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use koino_checkin::api;
use koino_checkin::state::SharedState;
use koino_common::config::ServiceConfig;
use koino_common::db::init_database;

/// Command-line arguments for koino-checkin
#[derive(Parser, Debug)]
#[command(name = "koino-checkin")]
#[command(about = "Check-in and gamification microservice for Koinonia")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "KOINO_PORT")]
    port: Option<u16>,

    /// SQLite database file (overrides the config file)
    #[arg(long, env = "KOINO_DB")]
    db_path: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "KOINO_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "koino_checkin=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Priority: CLI > env (via clap) > config file > defaults
    let mut config = ServiceConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(port) = args.port {
        config.bind_addr = format!("0.0.0.0:{}", port);
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    info!("Starting Koinonia check-in service on {}", config.bind_addr);
    info!("Database: {}", config.db_path.display());

    let pool = init_database(&config.db_path)
        .await
        .context("Failed to initialize database")?;

    let state = Arc::new(SharedState::new(pool, config).context("Failed to build service state")?);

    api::run(state, shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
