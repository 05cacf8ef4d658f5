//! # Endpoint Sanitize
//!
//! Pure text and value transforms applied to every response before it is
//! persisted: redaction of sensitive material and URL canonicalization.
//! Nothing in this crate fails; on malformed input every function degrades
//! to returning its input unchanged.

mod normalize;
mod redact;

pub use normalize::{endpoint_key, normalize_url, Normalized};
pub use redact::{redact_error, redact_headers, redact_json, redact_url, REDACTED};
