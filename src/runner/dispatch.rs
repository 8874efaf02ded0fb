//! Batch job dispatch
//!
//! Packages one task's source images into a single multipart request against
//! the worker's batch endpoint, validates the synchronous response, then
//! persists every page's artifact. Nothing is written until the whole
//! response has been validated, so a failed dispatch leaves the bucket
//! exactly as it was.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use crate::error::DispatchError;
use crate::ocr::{result_file_name, BatchResponse, OcrArtifact};
use crate::storage::ObjectStore;
use crate::tasks::Task;

/// Dispatch seam, so the orchestration loop can be exercised without a live
/// worker.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, task: &Task, worker_address: &str) -> Result<(), DispatchError>;
}

/// Dispatches batch inference jobs to the worker's HTTP endpoint.
pub struct JobDispatcher {
    store: Arc<dyn ObjectStore>,
    http: reqwest::Client,
    worker_port: u16,
}

impl JobDispatcher {
    pub fn new(store: Arc<dyn ObjectStore>, worker_port: u16) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            worker_port,
        }
    }
}

#[async_trait]
impl Dispatch for JobDispatcher {
    async fn dispatch(&self, task: &Task, worker_address: &str) -> Result<(), DispatchError> {
        let mut form = Form::new().text("bookName", task.book.clone());
        for (index, page) in task.pages.iter().enumerate() {
            let bytes = self.store.get(&page.image_key).await?;
            let part =
                Part::bytes(bytes).file_name(format!("{}.{}", index, page.image_ext()));
            form = form.part("image", part);
        }

        let url = format!("http://{}:{}/start-ocr", worker_address, self.worker_port);
        tracing::info!(
            "Dispatching {}/{} ({} pages) to {}",
            task.owner,
            task.book,
            task.pages.len(),
            url
        );

        let response: BatchResponse = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.is_ok() {
            return Err(DispatchError::RejectedStatus(response.status));
        }

        // Validate the whole batch before writing anything back.
        let mut writes: Vec<(String, OcrArtifact)> = Vec::with_capacity(task.pages.len());
        for (index, page) in task.pages.iter().enumerate() {
            let name = result_file_name(index);
            let artifact = response
                .result
                .get(&name)
                .cloned()
                .ok_or_else(|| DispatchError::MissingResult(name))?;
            let artifact = if artifact.txt.is_some() {
                artifact
            } else {
                artifact.with_flattened_text()
            };
            writes.push((page.result_key(), artifact));
        }

        for (key, artifact) in writes {
            let body = serde_json::to_vec(&artifact)?;
            self.store.put(&key, body, "application/json").await?;
        }

        tracing::info!("Batch for {}/{} persisted", task.owner, task.book);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use axum::{extract::Multipart, routing::post, Json, Router};
    use serde_json::json;

    use crate::storage::memory::MemoryStore;
    use crate::tasks::TaskDiscovery;

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert("alice/b1/p1/img.avif", b"image-1".to_vec()).await;
        store.insert("alice/b1/p2/img.avif", b"image-2".to_vec()).await;
        store
    }

    fn sample_artifact(text: &str) -> OcrArtifact {
        serde_json::from_value(json!({
            "contents": [[0, 0, 5, 5, text]],
            "imginfo": {},
        }))
        .unwrap()
    }

    /// Bind a stub worker on an ephemeral port, return `(address, port)`.
    async fn spawn_worker_stub(response: BatchResponse) -> (String, u16) {
        let app = Router::new().route(
            "/start-ocr",
            post(move |mut multipart: Multipart| async move {
                // Drain the request so the client sees a clean response.
                while let Ok(Some(field)) = multipart.next_field().await {
                    let _ = field.bytes().await;
                }
                Json(response)
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        ("127.0.0.1".to_string(), port)
    }

    #[tokio::test]
    async fn full_batch_success_overwrites_every_page() {
        let store = seeded_store().await;
        let mut result = BTreeMap::new();
        result.insert("0.json".to_string(), sample_artifact("page one"));
        result.insert("1.json".to_string(), sample_artifact("page two"));
        let (address, port) = spawn_worker_stub(BatchResponse::ok(result)).await;

        let discovery = TaskDiscovery::new(store.clone());
        let task = discovery.next_task().await.unwrap().unwrap();
        assert_eq!(task.pages.len(), 2);

        let dispatcher = JobDispatcher::new(store.clone(), port);
        dispatcher.dispatch(&task, &address).await.unwrap();

        let stored = store.get("alice/b1/p1/ocr.json").await.unwrap();
        let artifact: OcrArtifact = serde_json::from_slice(&stored).unwrap();
        assert_eq!(artifact.txt.as_deref(), Some("page one"));
        assert!(store.exists("alice/b1/p2/ocr.json").await.unwrap());

        // The book no longer shows up as work.
        assert!(!discovery.has_unfinished_work().await.unwrap());
    }

    #[tokio::test]
    async fn rejected_status_leaves_storage_untouched() {
        let store = seeded_store().await;
        let response = BatchResponse {
            status: "error".to_string(),
            result: BTreeMap::new(),
            message: Some("gpu not found".to_string()),
        };
        let (address, port) = spawn_worker_stub(response).await;

        let task = TaskDiscovery::new(store.clone())
            .next_task()
            .await
            .unwrap()
            .unwrap();
        let dispatcher = JobDispatcher::new(store.clone(), port);

        let err = dispatcher.dispatch(&task, &address).await.unwrap_err();
        assert!(matches!(err, DispatchError::RejectedStatus(_)));
        assert!(!store.exists("alice/b1/p1/ocr.json").await.unwrap());
        assert!(!store.exists("alice/b1/p2/ocr.json").await.unwrap());
    }

    #[tokio::test]
    async fn missing_page_result_fails_without_partial_writes() {
        let store = seeded_store().await;
        let mut result = BTreeMap::new();
        result.insert("0.json".to_string(), sample_artifact("only page one"));
        let (address, port) = spawn_worker_stub(BatchResponse::ok(result)).await;

        let task = TaskDiscovery::new(store.clone())
            .next_task()
            .await
            .unwrap()
            .unwrap();
        let dispatcher = JobDispatcher::new(store.clone(), port);

        let err = dispatcher.dispatch(&task, &address).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingResult(name) if name == "1.json"));
        assert!(!store.exists("alice/b1/p1/ocr.json").await.unwrap());
    }
}
