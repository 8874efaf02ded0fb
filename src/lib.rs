//! OCR job orchestration for book digitization
//!
//! Two independently deployed programs share this library and coordinate
//! only through object storage (artifact presence marks a page done):
//!
//! - `ocr-orchestrator` (main.rs): discovers unfinished work, provisions an
//!   ephemeral GPU instance on demand, dispatches batch inference jobs.
//! - `ocr-worker` (bin/worker.rs): runs inside that instance, sweeps all
//!   unfinished pages, invokes the containerized engine, uploads results and
//!   terminates its own host.
//!
//! # Modules
//!
//! - `tasks`: queue state recomputed from bucket contents
//! - `compute`: cloud provider API and instance lifecycle
//! - `runner`: the single-pass orchestration loop and dispatcher
//! - `worker`: worker-plane sweep, engine and batch endpoint

pub mod compute;
pub mod config;
pub mod error;
pub mod ocr;
pub mod runner;
pub mod storage;
pub mod tasks;
pub mod worker;
