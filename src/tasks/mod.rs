//! Task discovery
//!
//! There is no persisted job queue. The next unit of work is recomputed from
//! the bucket contents on every pass: the first book (in stable owner/book
//! order) that still has a page without an `ocr.json` artifact, together with
//! all of that book's unfinished pages. Batching a whole book amortizes the
//! cost of spinning up the GPU instance.

use std::sync::Arc;

use crate::error::StorageError;
use crate::storage::{
    bucket_tree, DirectoryTree, ObjectStore, IMAGE_FILE_PREFIX, OCR_RESULT_FILE,
};

/// One page still lacking an OCR result.
#[derive(Debug, Clone, PartialEq)]
pub struct UnfinishedPage {
    pub owner: String,
    pub book: String,
    pub page: String,
    /// Full object key of the page's source image.
    pub image_key: String,
}

impl UnfinishedPage {
    /// Key the OCR artifact will be written to.
    pub fn result_key(&self) -> String {
        crate::storage::result_key(&self.owner, &self.book, &self.page)
    }

    /// Image file extension, e.g. `avif`.
    pub fn image_ext(&self) -> &str {
        self.image_key
            .rsplit('.')
            .next()
            .unwrap_or("png")
    }
}

/// One batch of unfinished pages belonging to one book.
///
/// Value object: produced by one discovery pass, discarded after one dispatch
/// attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub owner: String,
    pub book: String,
    pub pages: Vec<UnfinishedPage>,
}

/// Every unfinished page in the bucket, in stable owner/book/page order.
///
/// A page counts only if it has an `img.*` file; owners and books without any
/// page directories are skipped rather than treated as unfinished. Shared by
/// orchestrator-side discovery (which takes the first book's group) and the
/// worker's boot sweep (which takes everything).
pub fn unfinished_pages(tree: &DirectoryTree) -> Vec<UnfinishedPage> {
    let mut result = Vec::new();
    for (owner, books) in tree.directories() {
        for (book, pages) in books.directories() {
            for (page, files) in pages.directories() {
                if files.contains_file(OCR_RESULT_FILE) {
                    continue;
                }
                let image = files
                    .files()
                    .find(|(name, _)| name.starts_with(IMAGE_FILE_PREFIX));
                if let Some((_, image_key)) = image {
                    result.push(UnfinishedPage {
                        owner: owner.to_string(),
                        book: book.to_string(),
                        page: page.to_string(),
                        image_key: image_key.to_string(),
                    });
                }
            }
        }
    }
    result
}

/// Derives the next unit of work from bucket contents.
pub struct TaskDiscovery {
    store: Arc<dyn ObjectStore>,
}

impl TaskDiscovery {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn has_unfinished_work(&self) -> Result<bool, StorageError> {
        let tree = bucket_tree(self.store.as_ref()).await?;
        Ok(!unfinished_pages(&tree).is_empty())
    }

    /// First book with at least one unfinished page, with all of its
    /// unfinished pages. Deterministic for unchanged bucket contents.
    pub async fn next_task(&self) -> Result<Option<Task>, StorageError> {
        let tree = bucket_tree(self.store.as_ref()).await?;
        let mut pages = unfinished_pages(&tree).into_iter();

        let Some(first) = pages.next() else {
            return Ok(None);
        };

        let mut task = Task {
            owner: first.owner.clone(),
            book: first.book.clone(),
            pages: vec![first],
        };
        task.pages.extend(
            pages.take_while(|p| p.owner == task.owner && p.book == task.book),
        );
        Ok(Some(task))
    }
}
