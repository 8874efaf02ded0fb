//! Worker-plane process
//!
//! Entry point of the ephemeral GPU instance. Serves the batch endpoint for
//! the orchestrator's dispatcher while sweeping every unfinished page it can
//! find in storage; when the sweep completes it destroys its own host
//! instance. If anything fails the process exits without self-terminating,
//! leaving the instance up for manual inspection.

mod engine;
mod server;
mod sweep;

pub use engine::{DockerEngine, OcrEngine};
pub use server::router;
pub use sweep::{run_sweep, SweepReport, WorkDirs};

use std::sync::Arc;

use anyhow::Context;

use crate::compute::{self_instance_id, ComputeProvider, VultrProvider};
use crate::config::Config;
use crate::storage::S3Client;

/// One worker pass: serve, sweep, self-terminate.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(
        S3Client::new(&config.storage)
            .await
            .context("failed to initialize S3 client")?,
    );
    let engine: Arc<dyn OcrEngine> = Arc::new(DockerEngine::new(config.worker.engine_image.clone()));

    // Batch endpoint for dispatched jobs, alongside the sweep.
    let app = router(Arc::clone(&engine), config.worker.buffer_dir.join("batches"));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.worker.port))
        .await
        .context("failed to bind batch endpoint")?;
    tracing::info!("Batch endpoint listening on port {}", config.worker.port);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Batch endpoint failed: {}", e);
        }
    });

    let dirs = WorkDirs::new(config.worker.buffer_dir.clone());
    let report = run_sweep(store.as_ref(), engine.as_ref(), &dirs)
        .await
        .context("boot sweep failed")?;
    tracing::info!("Sweep complete: {} pages processed", report.pages_processed);

    terminate_self(&config).await
}

/// Destroy this process's own host instance via the provider API, using the
/// identity reported by the instance metadata service.
async fn terminate_self(config: &Config) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    let instance_id = self_instance_id(&http)
        .await
        .context("could not determine own instance id")?;

    let provider = VultrProvider::new(config.compute.clone());
    provider
        .delete_instance(&instance_id)
        .await
        .with_context(|| format!("failed to terminate instance {}", instance_id))?;

    tracing::info!("Self-termination issued for instance {}", instance_id);
    Ok(())
}
