//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own.
//!
//! ## Intended use
//! Useful for development and debugging. The workspace's main `medlink-run` binary does the same
//! and is what deployments run.

use api_rest::AppState;
use medlink_core::{CoreConfig, Database};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the MedLink REST API server.
///
/// # Environment Variables
/// - `MEDLINK_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - everything read by [`CoreConfig::from_env`]
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration is invalid or the database cannot be opened,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("medlink_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("MEDLINK_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    tracing::info!("-- Starting MedLink REST API on {}", addr);

    let cfg = Arc::new(CoreConfig::from_env()?);
    let db = Database::open(cfg.database_path())?;

    api_rest::serve(&addr, AppState::new(cfg, db)).await
}
