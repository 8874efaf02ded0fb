//! Storage access for the OCR asset bucket
//!
//! The bucket is the single source of truth for queue state: a page is done
//! iff an `ocr.json` artifact exists next to its image. There is no separate
//! persisted queue anywhere.

mod s3_client;
mod tree;

#[cfg(test)]
pub mod memory;

pub use s3_client::S3Client;
pub use tree::{DirectoryTree, TreeNode};

use async_trait::async_trait;

use crate::error::StorageError;

/// Artifact file marking a page as done.
pub const OCR_RESULT_FILE: &str = "ocr.json";

/// Source images are stored as `img.<ext>` inside the page directory.
pub const IMAGE_FILE_PREFIX: &str = "img.";

/// Object storage operations the orchestrator and worker need.
///
/// Implemented by [`S3Client`] in production and by an in-memory store in
/// tests.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every key in the bucket, paginating through the full listing.
    async fn list_all_keys(&self) -> Result<Vec<String>, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str)
        -> Result<(), StorageError>;

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError>;
}

/// Convenience: full bucket listing folded into a directory tree.
pub async fn bucket_tree(store: &dyn ObjectStore) -> Result<DirectoryTree, StorageError> {
    let keys = store.list_all_keys().await?;
    Ok(DirectoryTree::from_keys(keys))
}

/// Key of a page's OCR-result artifact.
pub fn result_key(owner: &str, book: &str, page: &str) -> String {
    format!("{}/{}/{}/{}", owner, book, page, OCR_RESULT_FILE)
}
