use endpoint_protocol::{BodyEvidence, EndpointAggregate, ScoredEndpoint, ScoringWeights};

/// Published in `summary.json` so a catalog can be reproduced.
pub const SCORING_WEIGHTS: ScoringWeights = ScoringWeights {
    frequency: 0.30,
    payload_size: 0.30,
    structure: 0.20,
    stability: 0.20,
};

/// Multiplicative gate suppressing endpoints that rarely yield a JSON body.
pub const BODY_EVIDENCE: BodyEvidence = BodyEvidence {
    scale: 1.5,
    min_factor: 0.05,
};

const SIZE_SATURATION_BYTES: f64 = 10_000.0;

/// Score and rank aggregates: score descending, ties broken by count.
pub fn score_endpoints(
    aggregates: Vec<EndpointAggregate>,
    total_captures: u64,
) -> Vec<ScoredEndpoint> {
    log::debug!(
        "scoring {} aggregate(s) over {total_captures} capture(s)",
        aggregates.len()
    );
    let mut scored: Vec<ScoredEndpoint> = aggregates
        .into_iter()
        .map(|aggregate| score_one(aggregate, total_captures))
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.aggregate.count.cmp(&a.aggregate.count))
    });
    scored
}

fn score_one(aggregate: EndpointAggregate, total_captures: u64) -> ScoredEndpoint {
    let count = aggregate.count;
    let avg_payload_size = if aggregate.payload_sizes.is_empty() {
        0.0
    } else {
        aggregate.payload_sizes.iter().sum::<u64>() as f64 / aggregate.payload_sizes.len() as f64
    };
    let max_payload_size = aggregate.payload_sizes.iter().copied().max().unwrap_or(0);
    let distinct_schemas = aggregate.schema_hashes.len();
    let body_available_rate = rate(aggregate.body_available_count, count);
    let body_rate = rate(aggregate.json_parse_success_count, count);

    let mut reasons = Vec::new();

    let frequency_ratio = if total_captures == 0 {
        0.0
    } else {
        count as f64 / total_captures as f64
    };
    let frequency_score = (frequency_ratio * 3.0).min(1.0) * SCORING_WEIGHTS.frequency;
    if frequency_score >= SCORING_WEIGHTS.frequency / 2.0 && count > 1 {
        reasons.push(format!(
            "high frequency ({count}/{total_captures}, {:.0}%)",
            frequency_ratio * 100.0
        ));
    }

    let size_score =
        (avg_payload_size / SIZE_SATURATION_BYTES).min(1.0) * SCORING_WEIGHTS.payload_size;
    if size_score >= SCORING_WEIGHTS.payload_size / 2.0 {
        reasons.push(format!("large payloads (avg {avg_payload_size:.0} bytes)"));
    }

    let mut structure_score = 0.0;
    if aggregate.has_array_structure {
        structure_score += 0.5 * SCORING_WEIGHTS.structure;
        reasons.push("has array structure".to_string());
    }
    if aggregate.has_data_flags {
        structure_score += 0.5 * SCORING_WEIGHTS.structure;
        reasons.push("has data-like keys".to_string());
    }
    let structure_score = structure_score.min(SCORING_WEIGHTS.structure);

    let stability_score = if distinct_schemas == 0 {
        0.0
    } else {
        (1.0 - 0.2 * (distinct_schemas as f64 - 1.0)).max(0.2) * SCORING_WEIGHTS.stability
    };
    if distinct_schemas == 1 {
        reasons.push("stable schema (1 variant)".to_string());
    }

    let raw = frequency_score + size_score + structure_score + stability_score;

    let body_evidence_factor = (body_rate * BODY_EVIDENCE.scale)
        .min(1.0)
        .max(BODY_EVIDENCE.min_factor);
    if body_rate >= 0.5 {
        reasons.push(format!(
            "strong JSON body evidence ({}/{count}, {:.0}%)",
            aggregate.json_parse_success_count,
            body_rate * 100.0
        ));
    }

    let score = (raw * body_evidence_factor).clamp(0.0, 1.0);

    ScoredEndpoint {
        aggregate,
        score,
        reasons,
        avg_payload_size,
        max_payload_size,
        distinct_schemas,
        body_available_rate,
        body_rate,
        body_evidence_factor,
    }
}

fn rate(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate(key: &str, count: u64) -> EndpointAggregate {
        let mut agg = EndpointAggregate::new(key);
        agg.count = count;
        agg.status_counts.insert(200, count);
        agg
    }

    fn with_bodies(mut agg: EndpointAggregate, size: u64, schema: &str) -> EndpointAggregate {
        for _ in 0..agg.count {
            agg.payload_sizes.push(size);
        }
        agg.body_available_count = agg.count;
        agg.json_parse_success_count = agg.count;
        if !agg.schema_hashes.contains(&schema.to_string()) {
            agg.schema_hashes.push(schema.to_string());
        }
        agg
    }

    #[test]
    fn list_endpoints_outrank_small_scalar_ones() {
        // 1 tiny ping, 20 large array responses, 5 medium objects.
        let ping = with_bodies(aggregate("GET /api/ping", 1), 50, "s0");

        let mut products = with_bodies(aggregate("GET /api/products", 20), 10_000, "s1");
        products.has_array_structure = true;
        products.has_data_flags = true;

        let mut profile = with_bodies(aggregate("GET /api/user/profile", 5), 2_000, "s2");
        profile.has_data_flags = true;

        let ranked = score_endpoints(vec![ping, profile, products], 26);
        assert_eq!(ranked[0].aggregate.endpoint_key, "GET /api/products");
        assert_eq!(ranked[1].aggregate.endpoint_key, "GET /api/user/profile");
        assert!(ranked[0].score > ranked[1].score);
        assert!(ranked[1].score > ranked[2].score);
    }

    #[test]
    fn scores_stay_in_unit_range() {
        let mut maxed = with_bodies(aggregate("GET /a", 100), 1_000_000, "s");
        maxed.has_array_structure = true;
        maxed.has_data_flags = true;

        let empty = aggregate("GET /b", 3);

        for scored in score_endpoints(vec![maxed, empty], 100) {
            assert!((0.0..=1.0).contains(&scored.score), "score {}", scored.score);
            assert!((0.0..=1.0).contains(&scored.body_rate));
        }
    }

    #[test]
    fn missing_bodies_suppress_the_score() {
        let with_evidence = with_bodies(aggregate("GET /a", 10), 5_000, "s");
        let mut without_evidence = aggregate("GET /b", 10);
        without_evidence.payload_sizes = vec![5_000; 10];

        let ranked = score_endpoints(vec![without_evidence, with_evidence], 20);
        assert_eq!(ranked[0].aggregate.endpoint_key, "GET /a");
        assert_eq!(ranked[1].body_evidence_factor, BODY_EVIDENCE.min_factor);
    }

    #[test]
    fn schema_variance_lowers_stability() {
        let stable = with_bodies(aggregate("GET /a", 5), 1_000, "s1");

        let mut churning = with_bodies(aggregate("GET /b", 5), 1_000, "s1");
        for i in 2..=6 {
            churning.schema_hashes.push(format!("s{i}"));
        }

        let ranked = score_endpoints(vec![churning, stable], 10);
        assert_eq!(ranked[0].aggregate.endpoint_key, "GET /a");
        assert!(ranked[0].reasons.iter().any(|r| r.contains("stable schema")));
    }

    #[test]
    fn ties_break_on_count() {
        // Both frequency components saturate, so the raw scores tie exactly.
        let a = aggregate("GET /a", 5);
        let b = aggregate("GET /b", 7);
        let ranked = score_endpoints(vec![a, b], 10);
        assert_eq!(ranked[0].aggregate.endpoint_key, "GET /b");
    }

    #[test]
    fn reasons_are_deterministic() {
        let mut agg = with_bodies(aggregate("GET /a", 10), 20_000, "s");
        agg.has_array_structure = true;
        agg.has_data_flags = true;

        let first = score_endpoints(vec![agg.clone()], 12);
        let second = score_endpoints(vec![agg], 12);
        assert_eq!(first[0].reasons, second[0].reasons);
        assert!(!first[0].reasons.is_empty());
    }

    #[test]
    fn zero_capture_runs_do_not_divide_by_zero() {
        let ranked = score_endpoints(vec![aggregate("GET /a", 0)], 0);
        assert_eq!(ranked[0].score, 0.0);
    }
}
