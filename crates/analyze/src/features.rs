use endpoint_protocol::Features;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

/// Traversal limits for feature extraction.
///
/// The defaults keep the walk cheap on adversarial payloads; the soft budget
/// is a wall-clock escape hatch, not something bounded inputs ever hit.
#[derive(Debug, Clone)]
pub struct FeatureBounds {
    pub max_depth: usize,
    pub max_keys_per_object: usize,
    pub max_sample_paths: usize,
    pub max_top_level_keys: usize,
    pub budget: Duration,
}

impl Default for FeatureBounds {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_keys_per_object: 50,
            max_sample_paths: 100,
            max_top_level_keys: 20,
            budget: Duration::from_millis(100),
        }
    }
}

const ID_KEYS: [&str; 3] = ["id", "_id", "uuid"];
const ITEMS_KEYS: [&str; 4] = ["items", "results", "data", "list"];

/// Compute the shallow structural fingerprint of one parsed JSON value.
///
/// Deterministic for inputs that stay inside the bounds; the same value
/// always yields the same [`Features`].
pub fn extract_features(value: &Value, bounds: &FeatureBounds) -> Features {
    let mut features = Features::default();
    let mut walker = Walker::new(bounds);

    match value {
        Value::Object(map) => {
            features.is_object = true;
            features.num_keys = Some(map.len());

            let mut keys: Vec<String> = map.keys().cloned().collect();
            keys.sort_unstable();
            features.schema_hash = schema_hash(&keys);
            keys.truncate(bounds.max_top_level_keys);
            features.top_level_keys = keys;

            for key in map.keys() {
                let lowered = key.to_ascii_lowercase();
                if ID_KEYS.contains(&lowered.as_str()) {
                    features.has_id = true;
                }
                if ITEMS_KEYS.contains(&lowered.as_str()) {
                    features.has_items = true;
                }
                if lowered == "results" {
                    features.has_results = true;
                }
                if lowered == "data" {
                    features.has_data = true;
                }
            }

            features.depth_estimate = walker.walk(value, String::new(), 0).min(bounds.max_depth);
        }
        Value::Array(items) => {
            features.is_array = true;
            features.array_length = Some(items.len());
            features.depth_estimate = walker.walk(value, String::new(), 0).min(bounds.max_depth);
        }
        _ => {
            features.is_primitive = true;
        }
    }

    features.sample_paths = walker.paths;
    features
}

fn schema_hash(sorted_keys: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sorted_keys.join("|").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Depth-first walk collecting leaf paths and the depth estimate.
///
/// Arrays are only descended through their first element; objects through
/// their first `max_keys_per_object` keys.
struct Walker<'a> {
    bounds: &'a FeatureBounds,
    started: Instant,
    paths: Vec<String>,
}

impl<'a> Walker<'a> {
    fn new(bounds: &'a FeatureBounds) -> Self {
        Self {
            bounds,
            started: Instant::now(),
            paths: Vec::new(),
        }
    }

    fn over_budget(&self) -> bool {
        self.started.elapsed() > self.bounds.budget
    }

    fn push_path(&mut self, path: String) {
        if !path.is_empty() && self.paths.len() < self.bounds.max_sample_paths {
            self.paths.push(path);
        }
    }

    /// Returns the depth of the subtree, capped at `max_depth`.
    fn walk(&mut self, value: &Value, path: String, depth: usize) -> usize {
        if self.over_budget() {
            return 0;
        }
        match value {
            Value::Object(map) => {
                if map.is_empty() {
                    self.push_path(path);
                    return 1;
                }
                if depth >= self.bounds.max_depth {
                    return 1;
                }
                let mut deepest = 0;
                for (key, child) in map.iter().take(self.bounds.max_keys_per_object) {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    deepest = deepest.max(self.walk(child, child_path, depth + 1));
                }
                1 + deepest
            }
            Value::Array(items) => {
                let Some(first) = items.first() else {
                    self.push_path(path);
                    return 1;
                };
                if depth >= self.bounds.max_depth {
                    return 1;
                }
                let child_path = format!("{path}[0]");
                1 + self.walk(first, child_path, depth + 1)
            }
            _ => {
                self.push_path(path);
                0
            }
        }
    }
}
