//! Containerized inference engine invocation
//!
//! The engine runs as a docker container over a whole directory of images:
//! `<buffer>/input/img/{i}.{ext}` in, `<buffer>/output/input/json/{i}.json`
//! out. One invocation per batch; per-image parallelism is the engine's
//! business.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::AppError;

/// Batch OCR inference over a working directory.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Run inference for every image under `buffer/input`, writing result
    /// files under `buffer/output`.
    async fn run(&self, buffer_dir: &Path) -> Result<(), AppError>;
}

/// Runs the OCR engine container with GPU access.
pub struct DockerEngine {
    image: String,
}

impl DockerEngine {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for DockerEngine {
    async fn run(&self, buffer_dir: &Path) -> Result<(), AppError> {
        let mount = format!("{}:/images_buffer", buffer_dir.display());
        tracing::info!("Running inference container {}", self.image);

        let status = Command::new("docker")
            .args([
                "run",
                "--rm",
                "--gpus",
                "all",
                "-v",
                &mount,
                "-w",
                "/root/kotenocr_cli",
                &self.image,
                "python",
                "main.py",
                "infer",
                "/images_buffer/input",
                "/images_buffer/output",
                "-a",
            ])
            .status()
            .await
            .map_err(|e| AppError::Engine(format!("failed to start docker: {}", e)))?;

        if !status.success() {
            return Err(AppError::Engine(format!(
                "docker exited with status {}",
                status
            )));
        }
        Ok(())
    }
}
