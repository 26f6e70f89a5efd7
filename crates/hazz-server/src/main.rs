//! Hazz2 session coordinator.

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bots;
mod config;
mod coordinator;
mod protocol;
mod server;

use config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    info!(
        players = ?config.session.players,
        controller = %config.session.controller,
        "Starting Hazz2 coordinator..."
    );

    server::run_server(config).await
}
