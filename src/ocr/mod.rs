//! OCR artifact and batch wire types
//!
//! The inference engine emits one JSON file per input image, shaped as
//! `{ contents: [[x0, y0, x1, y1, text, ...], ...], imginfo: {...} }`.
//! Before upload, a flattened `txt` field is derived by joining the text
//! column of every content row with newlines; the proofreading UI reads that
//! field. Rows are kept as raw JSON arrays so engine versions that append
//! extra columns (confidence, block ids) survive a round trip unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Index of the text column in an engine content row.
const TEXT_COLUMN: usize = 4;

/// Status value a successful batch response must carry.
pub const BATCH_STATUS_OK: &str = "ok";

/// One page's OCR result as stored at `{owner}/{book}/{page}/ocr.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OcrArtifact {
    /// Box rows: `[x0, y0, x1, y1, text, ...]`
    #[serde(default)]
    pub contents: Vec<Value>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub imginfo: Value,

    /// Flattened text, derived from `contents` before upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txt: Option<String>,

    /// Engine fields this code does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl OcrArtifact {
    /// Join the text column of every content row with newlines.
    pub fn flattened_text(&self) -> String {
        self.contents
            .iter()
            .filter_map(|row| row.get(TEXT_COLUMN).and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Derive and attach the `txt` field.
    pub fn with_flattened_text(mut self) -> Self {
        self.txt = Some(self.flattened_text());
        self
    }
}

/// Response body of the worker's `POST /start-ocr` endpoint.
///
/// `result` is keyed by the per-batch page index as `"<idx>.json"`, matching
/// the engine's output file names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub status: String,
    #[serde(default)]
    pub result: BTreeMap<String, OcrArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BatchResponse {
    pub fn ok(result: BTreeMap<String, OcrArtifact>) -> Self {
        Self {
            status: BATCH_STATUS_OK.to_string(),
            result,
            message: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == BATCH_STATUS_OK
    }
}

/// Output file name for the page at `index` within a batch.
pub fn result_file_name(index: usize) -> String {
    format!("{}.json", index)
}
