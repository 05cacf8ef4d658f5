//! # Endpoint Analyze
//!
//! The read side of the pipeline: shallow structural fingerprints of JSON
//! bodies, the streaming per-endpoint rollup over journal records, and the
//! deterministic scoring model that ranks the final catalog.

mod aggregate;
mod features;
mod score;

pub use aggregate::Aggregator;
pub use features::{extract_features, FeatureBounds};
pub use score::{score_endpoints, BODY_EVIDENCE, SCORING_WEIGHTS};
