use api_rest::AppState;
use medlink_core::{CoreConfig, Database};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the MedLink application.
///
/// Loads `.env`, resolves [`CoreConfig`] once, opens (and migrates) the database and serves the
/// REST API until Ctrl-C.
///
/// # Environment Variables
/// - `MEDLINK_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `MEDLINK_DATABASE`: SQLite database file (default: "medlink.db")
/// - `MEDLINK_JWT_SECRET`: token signing secret, at least 32 bytes (required)
/// - `MEDLINK_TERMINAL_KEY`: key card and fingerprint terminals send, at least 16 bytes (required)
/// - `MEDLINK_TOKEN_TTL_MINUTES`: token lifetime (default: 480)
/// - `MEDLINK_CARD_READER`: serial device of the NFC reader (optional)
///
/// # Returns
/// * `Ok(())` - If the server starts and shuts down cleanly
/// * `Err(anyhow::Error)` - If configuration, database or server startup fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("medlink_run=info".parse()?)
                .add_directive("medlink_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("MEDLINK_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let cfg = Arc::new(CoreConfig::from_env()?);
    tracing::debug!("configuration: {:?}", cfg);

    let db = Database::open(cfg.database_path())?;
    tracing::info!(
        "++ Database {} at schema version {}",
        cfg.database_path().display(),
        db.schema_version()?
    );
    if let Some(device) = cfg.card_reader_device() {
        tracing::info!("++ Card reader configured at {}", device.display());
    }

    tracing::info!("++ Starting MedLink REST on {}", rest_addr);
    api_rest::serve(&rest_addr, AppState::new(cfg, db)).await
}
