//! Per-response processing: classify, read, redact, normalize, fingerprint,
//! deduplicate, store, append. One invocation runs entirely inside one
//! limiter slot; its failures never escape past the returned outcome.

use crate::browser::{is_closed_session_error, ResponseEvent};
use crate::classifier::{Decision, ResponseClassifier};
use endpoint_analyze::{extract_features, FeatureBounds};
use endpoint_protocol::{CaptureOptions, CaptureRecord, OmittedReason};
use endpoint_sanitize::{endpoint_key, normalize_url, redact_error, redact_headers, redact_json, redact_url};
use endpoint_store::{body_hash, BodyPlacement, BodyStore, CaptureLog};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Mutable run state shared by all workers.
///
/// The capture-cap check and the dedup insert live behind one lock so they
/// form a single critical section: the persisted-record cap is exact, and a
/// second worker reaching an already-taken dedup key always observes it.
#[derive(Debug, Default)]
pub struct RunState {
    dedup: HashSet<(String, u16, String)>,
    pub persisted: u64,
    pub duplicates_skipped: u64,
}

/// Everything a response worker needs, shared across the run.
pub struct ResponseContext {
    pub options: Arc<CaptureOptions>,
    pub classifier: ResponseClassifier,
    pub log: Arc<CaptureLog>,
    pub bodies: BodyStore,
    pub state: Arc<Mutex<RunState>>,
    pub bounds: FeatureBounds,
}

/// What happened to one submitted response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Persisted,
    Duplicate,
    Dropped,
    /// The browser context went away while the task was reading.
    Skipped,
}

/// The body side of a record about to be persisted.
enum RecordBody {
    /// No body kept. `hash` is non-empty iff bytes were actually read.
    Absent {
        reason: OmittedReason,
        parse_error: Option<String>,
        hash: String,
    },
    /// A parsed JSON body to be placed by the body store.
    Json {
        raw_size: u64,
        hash: String,
        parsed: Value,
    },
}

pub async fn process_response(ctx: Arc<ResponseContext>, event: ResponseEvent) -> TaskOutcome {
    let decision = {
        let state = ctx.state.lock().await;
        ctx.classifier.classify(&event, state.persisted)
    };

    match decision {
        Decision::Drop(cause) => {
            log::debug!("dropped {} {}: {cause:?}", event.method, event.url);
            TaskOutcome::Dropped
        }
        Decision::MetadataOnly(reason) => {
            let body = RecordBody::Absent {
                reason,
                parse_error: None,
                hash: String::new(),
            };
            persist(&ctx, &event, body).await
        }
        Decision::ReadBody => read_and_persist(&ctx, &event).await,
    }
}

async fn read_and_persist(ctx: &ResponseContext, event: &ResponseEvent) -> TaskOutcome {
    let bytes = match event.body.read().await {
        Ok(bytes) => bytes,
        Err(err) if is_closed_session_error(&err) => {
            log::debug!("context gone under {}: {}", event.url, redact_error(&err));
            return TaskOutcome::Skipped;
        }
        Err(err) => {
            let body = RecordBody::Absent {
                reason: OmittedReason::Unavailable,
                parse_error: Some(redact_error(&err)),
                hash: String::new(),
            };
            return persist(ctx, event, body).await;
        }
    };

    let hash = body_hash(&bytes);

    if bytes.len() as u64 > ctx.options.max_body_bytes {
        let body = RecordBody::Absent {
            reason: OmittedReason::MaxBodyBytes,
            parse_error: None,
            hash,
        };
        return persist(ctx, event, body).await;
    }

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(parsed) => {
            let body = RecordBody::Json {
                raw_size: bytes.len() as u64,
                hash,
                parsed,
            };
            persist(ctx, event, body).await
        }
        Err(err) => {
            let json_claimed = ResponseClassifier::is_json_content_type(&event.content_type());
            let reason = if json_claimed || ctx.options.capture_all_json {
                OmittedReason::ParseError
            } else {
                OmittedReason::NonJson
            };
            let body = RecordBody::Absent {
                reason,
                parse_error: Some(redact_error(&err.to_string())),
                hash,
            };
            persist(ctx, event, body).await
        }
    }
}

async fn persist(ctx: &ResponseContext, event: &ResponseEvent, body: RecordBody) -> TaskOutcome {
    let url = redact_url(&event.url);
    let normalized = normalize_url(&url);
    let key = endpoint_key(&event.method, &normalized.normalized_path);

    let hash = match &body {
        RecordBody::Absent { hash, .. } => hash.clone(),
        RecordBody::Json { hash, .. } => hash.clone(),
    };

    // Cap check and dedup insert are one critical section.
    {
        let mut state = ctx.state.lock().await;
        if ctx.options.max_captures > 0 && state.persisted >= ctx.options.max_captures {
            log::debug!("capture cap reached; dropping {key}");
            return TaskOutcome::Dropped;
        }
        if !state.dedup.insert((key.clone(), event.status, hash.clone())) {
            state.duplicates_skipped += 1;
            log::debug!("duplicate of {key} ({})", event.status);
            return TaskOutcome::Duplicate;
        }
        state.persisted += 1;
    }

    let mut record = CaptureRecord {
        timestamp: unix_now_ms(),
        method: event.method.clone(),
        url,
        status: event.status,
        content_type: event.content_type(),
        request_headers: redact_headers(&event.request_headers),
        response_headers: redact_headers(&event.response_headers),
        payload_size: 0,
        body_available: !hash.is_empty(),
        truncated: false,
        omitted_reason: None,
        json_parse_success: false,
        parse_error: None,
        body_hash: hash,
        body_path: None,
        inline_body: None,
        normalized_url: normalized.normalized_url,
        normalized_path: normalized.normalized_path,
        endpoint_key: key.clone(),
        features: None,
    };

    match body {
        RecordBody::Absent {
            reason,
            parse_error,
            ..
        } => {
            record.omitted_reason = Some(reason);
            record.parse_error = parse_error;
            record.truncated = matches!(
                reason,
                OmittedReason::EmptyBody | OmittedReason::MaxBodyBytes
            );
        }
        RecordBody::Json {
            raw_size, parsed, ..
        } => {
            let redacted = redact_json(&parsed);
            record.json_parse_success = true;
            record.features = Some(extract_features(&redacted, &ctx.bounds));

            match ctx.bodies.place(raw_size, &record.body_hash, &redacted).await {
                BodyPlacement::Inline(value) => {
                    record.inline_body = Some(value);
                    record.payload_size = raw_size;
                }
                BodyPlacement::External(path) => {
                    record.body_path = Some(path);
                    record.payload_size = raw_size;
                }
                BodyPlacement::Omitted(reason) => {
                    record.omitted_reason = Some(reason);
                    record.truncated = reason == OmittedReason::MaxBodyBytes;
                }
            }
        }
    }

    if let Err(err) = ctx.log.append(&record).await {
        log::error!("journal append failed for {key}: {err}");
        return TaskOutcome::Dropped;
    }
    TaskOutcome::Persisted
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
