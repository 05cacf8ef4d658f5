//! # Endpoint Protocol
//!
//! Shared data model for the capture pipeline: the journal record written for
//! every kept response, the per-endpoint rollup built from the journal, the
//! scored catalog entry, and the run-level metadata/summary artifacts.
//!
//! Everything here is plain serde data. Field names are camelCase on the wire
//! (journal lines, `summary.json`, `endpoints.jsonl`) so downstream tooling
//! sees one stable artifact format; the Rust side stays snake_case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

mod options;

pub use options::{CaptureOptions, ConsentAction, ConsentMode, OptionsError};

/// Why a record was persisted without its body.
///
/// Set iff the body is not persisted; at most one reason per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OmittedReason {
    /// Body exceeded the configured byte cap (declared or after reading).
    MaxBodyBytes,
    /// Body fetch failed (opaque response, closed context, IO error).
    Unavailable,
    /// Parse failed on content that never claimed to be JSON.
    NonJson,
    /// Parse failed on content that claimed to be JSON.
    ParseError,
    /// Response dropped by a gate before any body handling.
    Filtered,
    /// Status 204/304; no body read was attempted.
    EmptyBody,
}

/// Shallow structural fingerprint of one parsed JSON body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub is_array: bool,
    pub is_object: bool,
    pub is_primitive: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_length: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_keys: Option<usize>,

    /// First 20 top-level keys, sorted. Empty unless the body was an object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_level_keys: Vec<String>,

    pub depth_estimate: usize,

    pub has_id: bool,
    pub has_items: bool,
    pub has_results: bool,
    pub has_data: bool,

    /// Leaf key paths in dot / `[0]` notation, capped at 100.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_paths: Vec<String>,

    /// SHA-256 over the sorted top-level key set. Empty unless `is_object`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema_hash: String,
}

/// One observation of one response, frozen on append to the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    /// Wall-clock time of the observation, epoch milliseconds.
    pub timestamp: u64,
    pub method: String,
    /// Request URL after query-parameter redaction.
    pub url: String,
    pub status: u16,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub request_headers: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub response_headers: HashMap<String, String>,

    /// Bytes of body actually persisted; 0 when no body was kept.
    pub payload_size: u64,
    pub body_available: bool,
    /// Body dropped because it was oversized or empty by status.
    pub truncated: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub omitted_reason: Option<OmittedReason>,

    pub json_parse_success: bool,

    /// Redacted parse/fetch error, capped at 200 chars.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,

    /// Hex SHA-256 of the raw body bytes; empty when no bytes were read.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body_hash: String,

    /// Relative path of the externalized body. Mutually exclusive with
    /// `inline_body`; both absent for metadata-only records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_body: Option<serde_json::Value>,

    pub normalized_url: String,
    pub normalized_path: String,
    pub endpoint_key: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,
}

impl CaptureRecord {
    /// Dedup identity within a run: `(endpointKey, status, bodyHash)`.
    pub fn dedup_key(&self) -> (String, u16, String) {
        (
            self.endpoint_key.clone(),
            self.status,
            self.body_hash.clone(),
        )
    }
}

/// Per-endpoint rollup over all journal records sharing one endpoint key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointAggregate {
    pub endpoint_key: String,
    pub count: u64,
    pub status_counts: HashMap<u16, u64>,
    pub hosts: Vec<String>,
    pub payload_sizes: Vec<u64>,
    pub schema_hashes: Vec<String>,
    pub sample_paths: Vec<String>,
    pub first_seen: u64,
    pub last_seen: u64,
    pub body_available_count: u64,
    pub json_parse_success_count: u64,
    pub no_body_count: u64,
    pub has_array_structure: bool,
    pub has_data_flags: bool,
    pub avg_depth: f64,

    /// Number of records that contributed to `avg_depth`. Not part of the
    /// published artifact; only needed while the rollup is being built.
    #[serde(skip)]
    pub depth_samples: u64,
}

impl EndpointAggregate {
    pub fn new(endpoint_key: impl Into<String>) -> Self {
        Self {
            endpoint_key: endpoint_key.into(),
            count: 0,
            status_counts: HashMap::new(),
            hosts: Vec::new(),
            payload_sizes: Vec::new(),
            schema_hashes: Vec::new(),
            sample_paths: Vec::new(),
            first_seen: u64::MAX,
            last_seen: 0,
            body_available_count: 0,
            json_parse_success_count: 0,
            no_body_count: 0,
            has_array_structure: false,
            has_data_flags: false,
            avg_depth: 0.0,
            depth_samples: 0,
        }
    }
}

/// An aggregate with its score, reasons, and derived averages attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredEndpoint {
    #[serde(flatten)]
    pub aggregate: EndpointAggregate,

    /// Deterministic weighted score in `[0, 1]`.
    pub score: f64,
    /// Human-readable strings from the branches that contributed to the score.
    pub reasons: Vec<String>,

    pub avg_payload_size: f64,
    pub max_payload_size: u64,
    pub distinct_schemas: usize,
    pub body_available_rate: f64,
    pub body_rate: f64,
    pub body_evidence_factor: f64,
}

/// Fixed scoring weights, published in `summary.json` for reproducibility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringWeights {
    pub frequency: f64,
    pub payload_size: f64,
    pub structure: f64,
    pub stability: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            frequency: 0.30,
            payload_size: 0.30,
            structure: 0.20,
            stability: 0.20,
        }
    }
}

/// Parameters of the body-evidence gate, published alongside the weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyEvidence {
    pub scale: f64,
    pub min_factor: f64,
}

impl Default for BodyEvidence {
    fn default() -> Self {
        Self {
            scale: 1.5,
            min_factor: 0.05,
        }
    }
}

/// Written once to `run.json` when the run directory is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub url: String,
    /// Frozen snapshot of the effective options for this run.
    pub options: CaptureOptions,
}

/// The `summary.json` artifact: counters, scoring parameters, top endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub capture_dir: String,
    /// Responses delivered during the capture window, before any gate.
    pub total_responses: u64,
    /// Records persisted to the journal.
    pub json_captures: u64,
    pub duplicates_skipped: u64,
    pub total_endpoints: usize,
    pub scoring_weights: ScoringWeights,
    pub body_evidence: BodyEvidence,
    /// Top 20 endpoints by score; the full set lives in `endpoints.jsonl`.
    pub endpoints: Vec<ScoredEndpoint>,
}
