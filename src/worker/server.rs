//! Worker batch endpoint
//!
//! HTTP surface the orchestrator's dispatcher talks to:
//! - GET  /health    - readiness probe polled by the instance manager
//! - POST /start-ocr - synchronous batch inference over multipart images
//!
//! Each batch gets its own working directory so a request cannot collide
//! with the boot sweep running in the same process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::ocr::{result_file_name, BatchResponse, OcrArtifact};

use super::engine::OcrEngine;
use super::sweep::{read_result, WorkDirs};

/// Batches can carry a whole book of page scans.
const MAX_BATCH_BYTES: usize = 512 * 1024 * 1024;

#[derive(Clone)]
pub struct WorkerState {
    engine: Arc<dyn OcrEngine>,
    /// Parent directory for per-request working directories.
    work_root: PathBuf,
}

pub fn router(engine: Arc<dyn OcrEngine>, work_root: PathBuf) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/start-ocr", post(start_ocr))
        .layer(DefaultBodyLimit::max(MAX_BATCH_BYTES))
        .with_state(WorkerState { engine, work_root })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn start_ocr(State(state): State<WorkerState>, multipart: Multipart) -> Response {
    let batch_dir = state.work_root.join(Uuid::new_v4().to_string());

    let result = run_batch(&state, multipart, &batch_dir).await;

    if let Err(e) = tokio::fs::remove_dir_all(&batch_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to clean up {}: {}", batch_dir.display(), e);
        }
    }

    match result {
        Ok(artifacts) => Json(BatchResponse::ok(artifacts)).into_response(),
        Err((status, message)) => {
            tracing::error!("Batch failed: {}", message);
            let body = BatchResponse {
                status: "error".to_string(),
                result: BTreeMap::new(),
                message: Some(message),
            };
            (status, Json(body)).into_response()
        }
    }
}

async fn run_batch(
    state: &WorkerState,
    mut multipart: Multipart,
    batch_dir: &PathBuf,
) -> Result<BTreeMap<String, OcrArtifact>, (StatusCode, String)> {
    let dirs = WorkDirs::new(batch_dir.clone());
    let image_dir = dirs.input_image_dir();
    tokio::fs::create_dir_all(&image_dir)
        .await
        .map_err(internal)?;

    let mut book_name = String::new();
    let mut count = 0usize;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("bad multipart body: {}", e)))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("bookName") => {
                book_name = field.text().await.map_err(bad_field)?;
            }
            Some("image") => {
                let ext = field
                    .file_name()
                    .and_then(|name| name.rsplit('.').next())
                    .filter(|ext| ext.chars().all(char::is_alphanumeric))
                    .unwrap_or("png")
                    .to_string();
                let bytes = field.bytes().await.map_err(bad_field)?;
                // Files are named by arrival order; the response map uses
                // the same indices.
                let path = image_dir.join(format!("{}.{}", count, ext));
                tokio::fs::write(&path, &bytes).await.map_err(internal)?;
                count += 1;
            }
            _ => {}
        }
    }

    if count == 0 {
        return Err((StatusCode::BAD_REQUEST, "no image parts in batch".to_string()));
    }
    tracing::info!("Batch for book {:?}: {} images", book_name, count);

    state
        .engine
        .run(&dirs.buffer)
        .await
        .map_err(|e: AppError| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let json_dir = dirs.output_json_dir();
    let mut artifacts = BTreeMap::new();
    for index in 0..count {
        let artifact = read_result(&json_dir, index)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        artifacts.insert(result_file_name(index), artifact.with_flattened_text());
    }
    Ok(artifacts)
}

fn internal(e: std::io::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn bad_field(e: axum::extract::multipart::MultipartError) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, format!("bad multipart field: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::runner::{Dispatch, JobDispatcher};
    use crate::storage::memory::MemoryStore;
    use crate::storage::ObjectStore;
    use crate::tasks::TaskDiscovery;

    struct FakeEngine;

    #[async_trait]
    impl OcrEngine for FakeEngine {
        async fn run(&self, buffer_dir: &Path) -> Result<(), AppError> {
            let input = buffer_dir.join("input").join("img");
            let output = buffer_dir.join("output").join("input").join("json");
            tokio::fs::create_dir_all(&output).await?;

            let mut entries = tokio::fs::read_dir(&input).await?;
            while let Some(entry) = entries.next_entry().await? {
                let stem = entry
                    .path()
                    .file_stem()
                    .unwrap()
                    .to_string_lossy()
                    .to_string();
                let body = json!({
                    "contents": [[0, 0, 4, 4, format!("recognized {}", stem)]],
                    "imginfo": {},
                });
                tokio::fs::write(
                    output.join(format!("{}.json", stem)),
                    serde_json::to_vec(&body).unwrap(),
                )
                .await?;
            }
            Ok(())
        }
    }

    async fn spawn_server(work_root: PathBuf) -> (String, u16) {
        let app = router(Arc::new(FakeEngine), work_root);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        ("127.0.0.1".to_string(), port)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let (address, port) = spawn_server(tmp.path().to_path_buf()).await;

        let response = reqwest::get(format!("http://{}:{}/health", address, port))
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert!(response.text().await.unwrap().contains("ok"));
    }

    #[tokio::test]
    async fn dispatcher_round_trip_through_the_batch_endpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let (address, port) = spawn_server(tmp.path().to_path_buf()).await;

        let store = Arc::new(MemoryStore::new());
        store.insert("alice/b1/p1/img.avif", b"scan-1".to_vec()).await;
        store.insert("alice/b1/p2/img.avif", b"scan-2".to_vec()).await;

        let task = TaskDiscovery::new(store.clone())
            .next_task()
            .await
            .unwrap()
            .unwrap();
        JobDispatcher::new(store.clone(), port)
            .dispatch(&task, &address)
            .await
            .unwrap();

        let artifact: OcrArtifact =
            serde_json::from_slice(&store.get("alice/b1/p1/ocr.json").await.unwrap()).unwrap();
        assert_eq!(artifact.txt.as_deref(), Some("recognized 0"));
        let artifact: OcrArtifact =
            serde_json::from_slice(&store.get("alice/b1/p2/ocr.json").await.unwrap()).unwrap();
        assert_eq!(artifact.txt.as_deref(), Some("recognized 1"));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (address, port) = spawn_server(tmp.path().to_path_buf()).await;

        let form = reqwest::multipart::Form::new().text("bookName", "b1");
        let response = reqwest::Client::new()
            .post(format!("http://{}:{}/start-ocr", address, port))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let body: BatchResponse = response.json().await.unwrap();
        assert!(!body.is_ok());
    }
}
