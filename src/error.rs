//! Error types for the OCR orchestration daemon and worker

use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Compute provider error: {0}")]
    Compute(#[from] ComputeError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Inference engine failed: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid object body for {key}: {reason}")]
    InvalidObject { key: String, reason: String },

    #[error("S3 SDK error: {0}")]
    SdkError(String),
}

/// Errors from the cloud compute provider and instance lifecycle
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Instance provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("Instance did not become ready within {0} seconds")]
    ReadinessTimeout(u64),

    #[error("Instance metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Provider API error: {0}")]
    ApiError(String),
}

impl From<reqwest::Error> for ComputeError {
    fn from(e: reqwest::Error) -> Self {
        ComputeError::ApiError(e.to_string())
    }
}

/// Errors from a single batch dispatch attempt
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Worker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Worker rejected batch: status {0:?}")]
    RejectedStatus(String),

    #[error("Batch response is missing result for {0}")]
    MissingResult(String),

    #[error("Malformed batch response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Storage error during dispatch: {0}")]
    Storage(#[from] StorageError),
}
