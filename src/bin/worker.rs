//! OCR Worker
//!
//! Entry point of the ephemeral GPU instance. Runs one sweep over all
//! unfinished pages, then terminates its own host. On failure the process
//! exits non-zero *without* self-terminating, leaving the instance running
//! for manual inspection.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ocr_web::config::Config;
use ocr_web::worker;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ocr_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting OCR Worker v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = worker::run(config).await {
        tracing::error!("Worker pass failed: {:#}", e);
        std::process::exit(1);
    }

    tracing::info!("done");
}
