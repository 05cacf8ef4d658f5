//! # Endpoint Store
//!
//! Everything a run persists: the run directory layout, the write-once
//! `run.json`, the append-only `index.jsonl` journal, the summary artifacts,
//! and the content-addressed `bodies/` store.

mod body_store;
mod capture_log;
mod error;

pub use body_store::{body_hash, BodyPlacement, BodyStore};
pub use capture_log::{generate_run_id, read_journal, CaptureLog};
pub use error::{Result, StoreError};
