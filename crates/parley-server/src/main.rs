//! # Parley Server
//!
//! Realtime presence and message delivery for two-party chat.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a config file in the working directory (parley.toml)
//! PARLEY_JWT_SECRET=change-me parley
//!
//! # Run with an explicit config file
//! PARLEY_CONFIG=/path/to/parley.toml parley
//!
//! # Override the bind address
//! PARLEY_PORT=8080 PARLEY_HOST=0.0.0.0 parley
//! ```

mod auth;
mod chat;
mod config;
mod handlers;
mod metrics;
mod session;
mod store;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parley=debug,parley_core=debug,parley_transport=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;
    config.validate()?;

    tracing::info!("Starting Parley server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
