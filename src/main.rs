//! Position Sync Server - authoritative real-time multiplayer world
//!
//! This is the main entry point for the server. It handles:
//! - WebSocket connections that submit directional input
//! - A fixed-rate world loop that moves participants and broadcasts snapshots
//! - Optional Redis pub/sub relay so several processes share one input stream

use std::future::IntoFuture;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use position_sync_server::app::AppState;
use position_sync_server::bus::{run_subscriber, InputRouter, RedisBus};
use position_sync_server::config::Config;
use position_sync_server::game::GameWorld;
use position_sync_server::http::build_router;
use position_sync_server::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Position Sync Server");
    info!("Server address: {}", config.server_addr);

    // Spawn the world loop
    let (world, world_handle) = GameWorld::new(config.tick_interval);
    tokio::spawn(world.run());

    // Choose where ingress sends input
    let (inputs, subscriber) = match &config.bus {
        Some(bus_config) => {
            let bus = RedisBus::open(bus_config)?;
            let publisher = bus.publisher().await?;
            let messages = bus.subscribe().await?;
            let subscriber = tokio::spawn(run_subscriber(messages, world_handle.clone()));

            info!(channel = %bus_config.channel, "Distributed mode: input relayed over bus");
            (InputRouter::Bus(publisher), Some(subscriber))
        }
        None => {
            info!("Local mode: input enqueued directly");
            (InputRouter::Local(world_handle.clone()), None)
        }
    };

    // Build router
    let state = AppState::new(config.clone(), world_handle, inputs);
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/game", addr);

    let server = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    match subscriber {
        Some(subscriber) => {
            tokio::select! {
                result = server => result?,
                fatal = subscriber => {
                    // A stalled subscriber would silently desync this process
                    let err = fatal?;
                    error!(error = %err, "Bus subscriber failed, exiting");
                    return Err(err.into());
                }
            }
        }
        None => server.await?,
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
