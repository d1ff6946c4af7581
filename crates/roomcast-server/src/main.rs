//! # roomcast server
//!
//! Room-based realtime messaging server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! roomcast
//!
//! # Run with custom config
//! roomcast  # reads roomcast.toml from cwd, /etc/roomcast, ~/.config/roomcast
//!
//! # Run with environment variables
//! ROOMCAST_PORT=8080 ROOMCAST_AUTH_SECRET=... roomcast
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting roomcast server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
