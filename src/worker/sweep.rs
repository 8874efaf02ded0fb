//! Boot sweep
//!
//! On instance boot the worker does not wait to be told what to do: it
//! rebuilds the whole bucket tree and processes every page lacking an OCR
//! artifact, across all owners. This deliberately overlaps with whatever
//! task the orchestrator woke it for; recomputing from storage on both
//! sides is what makes the system self-healing.

use std::path::{Path, PathBuf};

use crate::error::{AppError, Result, StorageError};
use crate::ocr::{result_file_name, OcrArtifact};
use crate::storage::{bucket_tree, ObjectStore};
use crate::tasks::{unfinished_pages, UnfinishedPage};

use super::engine::OcrEngine;

/// Working-directory layout shared with the engine container.
#[derive(Debug, Clone)]
pub struct WorkDirs {
    pub buffer: PathBuf,
}

impl WorkDirs {
    pub fn new(buffer: impl Into<PathBuf>) -> Self {
        Self {
            buffer: buffer.into(),
        }
    }

    /// Downloaded images live at `input/img/{i}.{ext}`.
    pub fn input_image_dir(&self) -> PathBuf {
        self.buffer.join("input").join("img")
    }

    /// The engine writes `output/input/json/{i}.json`.
    pub fn output_json_dir(&self) -> PathBuf {
        self.buffer.join("output").join("input").join("json")
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub pages_processed: usize,
}

/// One full pass: tree, download, infer, upload.
pub async fn run_sweep(
    store: &dyn ObjectStore,
    engine: &dyn OcrEngine,
    dirs: &WorkDirs,
) -> Result<SweepReport> {
    let tree = bucket_tree(store).await?;
    let pages = unfinished_pages(&tree);
    if pages.is_empty() {
        tracing::info!("No unfinished pages, sweep done");
        return Ok(SweepReport::default());
    }
    tracing::info!("Sweep found {} unfinished pages", pages.len());

    download_images(store, &pages, dirs).await?;
    engine.run(&dirs.buffer).await?;
    upload_results(store, &pages, dirs).await?;

    Ok(SweepReport {
        pages_processed: pages.len(),
    })
}

async fn download_images(
    store: &dyn ObjectStore,
    pages: &[UnfinishedPage],
    dirs: &WorkDirs,
) -> Result<()> {
    let image_dir = dirs.input_image_dir();
    tokio::fs::create_dir_all(&image_dir).await?;

    for (index, page) in pages.iter().enumerate() {
        let bytes = store.get(&page.image_key).await?;
        let path = image_dir.join(format!("{}.{}", index, page.image_ext()));
        tokio::fs::write(&path, bytes).await?;
    }
    Ok(())
}

async fn upload_results(
    store: &dyn ObjectStore,
    pages: &[UnfinishedPage],
    dirs: &WorkDirs,
) -> Result<()> {
    let json_dir = dirs.output_json_dir();

    for (index, page) in pages.iter().enumerate() {
        let artifact = read_result(&json_dir, index).await?;
        let body = serde_json::to_vec(&artifact.with_flattened_text())?;
        store.put(&page.result_key(), body, "application/json").await?;
        tracing::info!("Uploaded {}", page.result_key());
    }
    Ok(())
}

/// Read and parse the engine's result file for the page at `index`.
pub async fn read_result(json_dir: &Path, index: usize) -> Result<OcrArtifact> {
    let path = json_dir.join(result_file_name(index));
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        AppError::Engine(format!("missing result file {}: {}", path.display(), e))
    })?;
    let artifact = serde_json::from_slice(&bytes).map_err(|e| {
        AppError::Storage(StorageError::InvalidObject {
            key: path.display().to_string(),
            reason: e.to_string(),
        })
    })?;
    Ok(artifact)
}
