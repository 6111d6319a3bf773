//! Brute-force vector scan shared by every backend's fallback path.
//!
//! Every candidate with a vector at the requested field is scored on each
//! call. Re-scanning the whole collection does not scale past small
//! datasets, but it is deterministic and always correct, which is what a
//! fallback needs to be.

use ordered_float::OrderedFloat;

use pulse_embeddings::cosine_similarity;

use crate::record::Record;
use crate::repository::{VectorSearchOptions, VectorSearchResult};

/// Score candidates against the query vector and rank them.
///
/// Candidates without a vector at `field`, and stored vectors whose length
/// differs from the query's, are skipped. Results with `score >= min_score`
/// are sorted by descending score (stable, so ties keep encounter order) and
/// truncated to `limit`.
pub fn scan_by_similarity(
    candidates: Vec<Record>,
    field: &str,
    query: &[f32],
    options: &VectorSearchOptions,
) -> Vec<VectorSearchResult> {
    let mut results: Vec<VectorSearchResult> = Vec::new();

    for record in candidates {
        let Some(vector) = record.vector(field) else {
            continue;
        };
        if vector.len() != query.len() {
            continue;
        }
        let Ok(score) = cosine_similarity(query, &vector) else {
            continue;
        };
        if score >= options.min_score {
            results.push(VectorSearchResult { record, score });
        }
    }

    results.sort_by(|a, b| OrderedFloat(b.score).cmp(&OrderedFloat(a.score)));
    results.truncate(options.limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(id: &str, embedding: serde_json::Value) -> Record {
        Record::with_id(id).with_field("embedding", embedding)
    }

    #[test]
    fn test_orthogonal_vector_below_threshold() {
        let candidates = vec![doc("a", json!([1.0, 0.0, 0.0])), doc("b", json!([0.0, 1.0, 0.0]))];

        let results = scan_by_similarity(
            candidates,
            "embedding",
            &[1.0, 0.0, 0.0],
            &VectorSearchOptions {
                limit: 10,
                min_score: 0.5,
            },
        );

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, "a");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_min_score_keeps_exactly_matching_records() {
        // 2 of 5 candidates are similar enough to the query.
        let candidates = vec![
            doc("a", json!([1.0, 0.0])),
            doc("b", json!([0.0, 1.0])),
            doc("c", json!([0.9, 0.1])),
            doc("d", json!([-1.0, 0.0])),
            doc("e", json!([0.1, 0.9])),
        ];

        let results = scan_by_similarity(
            candidates,
            "embedding",
            &[1.0, 0.0],
            &VectorSearchOptions {
                limit: 10,
                min_score: 0.8,
            },
        );

        let ids: Vec<&str> = results.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_ties_keep_encounter_order() {
        let candidates = vec![
            doc("first", json!([1.0, 0.0])),
            doc("second", json!([2.0, 0.0])),
            doc("third", json!([3.0, 0.0])),
        ];

        // All three are colinear with the query and score 1.0.
        let results = scan_by_similarity(
            candidates,
            "embedding",
            &[1.0, 0.0],
            &VectorSearchOptions::default(),
        );

        let ids: Vec<&str> = results.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_mismatched_and_missing_vectors_are_skipped() {
        let candidates = vec![
            doc("ok", json!([1.0, 0.0])),
            doc("short", json!([1.0])),
            Record::with_id("none").with_field("title", "no vector"),
        ];

        let results = scan_by_similarity(
            candidates,
            "embedding",
            &[1.0, 0.0],
            &VectorSearchOptions::default(),
        );

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, "ok");
    }

    #[test]
    fn test_limit_truncates() {
        let candidates = (0..5)
            .map(|i| doc(&format!("r{i}"), json!([1.0, 0.0])))
            .collect();

        let results = scan_by_similarity(
            candidates,
            "embedding",
            &[1.0, 0.0],
            &VectorSearchOptions {
                limit: 2,
                min_score: 0.0,
            },
        );

        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_empty_candidates_yield_empty_results() {
        let results = scan_by_similarity(
            Vec::new(),
            "embedding",
            &[1.0, 0.0],
            &VectorSearchOptions::default(),
        );
        assert!(results.is_empty());
    }
}
