use endpoint_protocol::{CaptureRecord, EndpointAggregate};
use std::collections::HashMap;
use url::Url;

/// Streaming per-endpoint rollup.
///
/// Records are folded in one at a time in journal order; list-valued fields
/// are deduplicated on insert so the rollup never grows with duplicates.
#[derive(Debug, Default)]
pub struct Aggregator {
    endpoints: HashMap<String, EndpointAggregate>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one journal record into its endpoint's aggregate.
    pub fn observe(&mut self, record: &CaptureRecord) {
        // Every persisted record carries an endpoint key, but a journal
        // written by an older build may not; fall back to the redacted URL.
        let key = if record.endpoint_key.is_empty() {
            record.url.clone()
        } else {
            record.endpoint_key.clone()
        };

        let aggregate = self
            .endpoints
            .entry(key.clone())
            .or_insert_with(|| EndpointAggregate::new(key));

        aggregate.count += 1;
        *aggregate.status_counts.entry(record.status).or_insert(0) += 1;

        if let Some(host) = host_of(&record.normalized_url).or_else(|| host_of(&record.url)) {
            if !aggregate.hosts.contains(&host) {
                aggregate.hosts.push(host);
            }
        }

        if record.payload_size > 0 {
            aggregate.payload_sizes.push(record.payload_size);
        }

        aggregate.first_seen = aggregate.first_seen.min(record.timestamp);
        aggregate.last_seen = aggregate.last_seen.max(record.timestamp);

        if record.body_available {
            aggregate.body_available_count += 1;
        } else {
            aggregate.no_body_count += 1;
        }
        if record.json_parse_success {
            aggregate.json_parse_success_count += 1;
        }

        if let Some(features) = &record.features {
            if !features.schema_hash.is_empty()
                && !aggregate.schema_hashes.contains(&features.schema_hash)
            {
                aggregate.schema_hashes.push(features.schema_hash.clone());
            }
            for path in &features.sample_paths {
                if !aggregate.sample_paths.contains(path) {
                    aggregate.sample_paths.push(path.clone());
                }
            }

            aggregate.has_array_structure |= features.is_array;
            aggregate.has_data_flags |= features.has_id
                || features.has_items
                || features.has_results
                || features.has_data;

            if features.depth_estimate > 0 {
                aggregate.depth_samples += 1;
                let n = aggregate.depth_samples as f64;
                aggregate.avg_depth += (features.depth_estimate as f64 - aggregate.avg_depth) / n;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Consume the rollup. Ordering is left to the scorer.
    pub fn finish(self) -> Vec<EndpointAggregate> {
        self.endpoints.into_values().collect()
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
}
