//! # Whisper Server
//!
//! Realtime chat broadcast server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a config file in the working directory
//! whisper
//!
//! # Run with environment variables
//! WHISPER_AUTH__JWT_SECRET=change-me WHISPER_PORT=8080 WHISPER_HOST=0.0.0.0 whisper
//!
//! # Persist history to SQLite
//! WHISPER_DATABASE__URL='sqlite://whisper.db?mode=rwc' whisper
//! ```

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whisper_server::{config::Config, metrics, run_server};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "whisper=debug,whisper_server=debug,whisper_core=debug,tower_http=debug".into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!("Starting Whisper server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    run_server(config).await?;

    Ok(())
}
