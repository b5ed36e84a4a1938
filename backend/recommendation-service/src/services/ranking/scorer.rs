//! Hybrid Scorer
//!
//! Fuses heterogeneous retrieval scores onto one [0, 1] scale:
//! `0.5 × content + 0.3 × collaborative + 0.2 × popularity`.

use crate::models::{Candidate, Signal};
use crate::utils::{clamp_unit, min_max_normalize};
use std::cmp::Ordering;
use tracing::debug;

pub const CONTENT_WEIGHT: f32 = 0.5;
pub const COLLABORATIVE_WEIGHT: f32 = 0.3;
pub const POPULARITY_WEIGHT: f32 = 0.2;

/// Neutral prior for products with no stored popularity.
pub const DEFAULT_POPULARITY: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SignalGroup {
    Content,
    Collaborative,
    Popularity,
    Search,
}

impl From<Signal> for SignalGroup {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Content | Signal::Category => SignalGroup::Content,
            Signal::Collaborative | Signal::CoPurchase => SignalGroup::Collaborative,
            Signal::Popularity => SignalGroup::Popularity,
            Signal::Search => SignalGroup::Search,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HybridScorer;

impl HybridScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score a merged, deduplicated candidate list.
    ///
    /// Each signal group is divided by its own maximum (negatives floor at
    /// 0, a zero maximum counts as 1). Output is sorted descending; ties
    /// keep retrieval order.
    pub fn score(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        if candidates.is_empty() {
            return candidates;
        }

        let max_of = |group: SignalGroup, cs: &[Candidate]| -> f32 {
            let max = cs
                .iter()
                .filter(|c| SignalGroup::from(c.signal) == group)
                .map(|c| c.score.max(0.0))
                .fold(0.0f32, f32::max);
            if max > 0.0 {
                max
            } else {
                1.0
            }
        };

        let content_max = max_of(SignalGroup::Content, &candidates);
        let collab_max = max_of(SignalGroup::Collaborative, &candidates);
        let popularity_max = max_of(SignalGroup::Popularity, &candidates);
        let search_max = max_of(SignalGroup::Search, &candidates);

        for c in candidates.iter_mut() {
            let raw = c.score.max(0.0);
            let prior = c
                .popularity_score
                .map(clamp_unit)
                .unwrap_or(DEFAULT_POPULARITY);

            let final_score = match SignalGroup::from(c.signal) {
                SignalGroup::Popularity => {
                    let norm = raw / popularity_max;
                    c.popularity_score = Some(norm);
                    norm
                }
                SignalGroup::Search => raw / search_max,
                SignalGroup::Content => {
                    let norm = raw / content_max;
                    c.content_score = Some(norm);
                    c.popularity_score = Some(prior);
                    CONTENT_WEIGHT * norm + POPULARITY_WEIGHT * prior
                }
                SignalGroup::Collaborative => {
                    let norm = raw / collab_max;
                    c.collaborative_score = Some(norm);
                    c.popularity_score = Some(prior);
                    COLLABORATIVE_WEIGHT * norm + POPULARITY_WEIGHT * prior
                }
            };

            c.score = clamp_unit(final_score);
        }

        sort_by_score(&mut candidates);
        debug!(count = candidates.len(), "Hybrid scoring completed");
        candidates
    }

    /// Cold start: no preference vector and no collaborative signal.
    /// Popularity scores are min-max normalized directly, no blend.
    pub fn score_cold_start(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
        min_max_normalize(&mut scores);

        for (c, s) in candidates.iter_mut().zip(scores) {
            c.popularity_score = Some(s);
            c.score = clamp_unit(s);
        }

        sort_by_score(&mut candidates);
        candidates
    }
}

/// Stable descending sort on `score`.
pub fn sort_by_score(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Product;

    fn candidate(id: &str, signal: Signal, score: f32, popularity: Option<f32>) -> Candidate {
        let product = Product {
            product_id: id.to_string(),
            name: id.to_string(),
            category: "c".to_string(),
            price: 10.0,
            stock: Some(1),
            is_active: true,
            popularity_score: popularity,
            description: None,
            image_url: None,
            embedding: None,
        };
        Candidate::from_product(&product, signal, score)
    }

    fn score_of(out: &[Candidate], id: &str) -> f32 {
        out.iter()
            .find(|c| c.product_id == id)
            .map(|c| c.score)
            .unwrap_or(f32::NAN)
    }

    #[test]
    fn test_groups_normalize_independently() {
        let scorer = HybridScorer::new();
        let out = scorer.score(vec![
            candidate("c1", Signal::Content, 0.8, Some(1.0)),
            candidate("c2", Signal::Content, 0.4, None),
            candidate("k1", Signal::Collaborative, 6.0, Some(0.0)),
            candidate("k2", Signal::CoPurchase, 3.0, None),
        ]);

        // 0.5 × 1.0 + 0.2 × 1.0
        assert!((score_of(&out, "c1") - 0.7).abs() < 1e-6);
        // 0.5 × 0.5 + 0.2 × 0.5
        assert!((score_of(&out, "c2") - 0.35).abs() < 1e-6);
        // 0.3 × 1.0 + 0.2 × 0.0
        assert!((score_of(&out, "k1") - 0.3).abs() < 1e-6);
        // 0.3 × 0.5 + 0.2 × 0.5
        assert!((score_of(&out, "k2") - 0.25).abs() < 1e-6);

        let ids: Vec<&str> = out.iter().map(|c| c.product_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "k1", "k2"]);
    }

    #[test]
    fn test_popularity_signal_is_its_own_score() {
        let scorer = HybridScorer::new();
        let out = scorer.score(vec![
            candidate("p1", Signal::Popularity, 0.4, Some(0.4)),
            candidate("p2", Signal::Popularity, 0.8, Some(0.8)),
        ]);
        assert_eq!(out[0].product_id, "p2");
        assert!((out[0].score - 1.0).abs() < 1e-6);
        assert!((out[1].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_scores_always_in_unit_range() {
        let scorer = HybridScorer::new();
        let out = scorer.score(vec![
            candidate("a", Signal::Collaborative, -5.0, Some(3.0)),
            candidate("b", Signal::Collaborative, 1e9, Some(-1.0)),
            candidate("c", Signal::Content, 1.0, None),
            candidate("d", Signal::Search, 0.0, None),
        ]);
        assert!(out.iter().all(|c| (0.0..=1.0).contains(&c.score)));
    }

    #[test]
    fn test_zero_max_treated_as_one() {
        let scorer = HybridScorer::new();
        let out = scorer.score(vec![
            candidate("a", Signal::Collaborative, 0.0, None),
            candidate("b", Signal::Collaborative, -1.0, None),
        ]);
        // only the popularity prior remains
        assert!(out.iter().all(|c| (c.score - 0.1).abs() < 1e-6));
        // stable on ties
        assert_eq!(out[0].product_id, "a");
    }

    #[test]
    fn test_cold_start_min_max() {
        let scorer = HybridScorer::new();
        let out = scorer.score_cold_start(vec![
            candidate("a", Signal::Popularity, 0.2, Some(0.2)),
            candidate("b", Signal::Popularity, 0.6, Some(0.6)),
            candidate("c", Signal::Popularity, 1.0, Some(1.0)),
        ]);
        let got: Vec<(&str, f32)> = out.iter().map(|c| (c.product_id.as_str(), c.score)).collect();
        assert_eq!(got[0], ("c", 1.0));
        assert!((got[1].1 - 0.5).abs() < 1e-6);
        assert_eq!(got[2], ("a", 0.0));
    }

    #[test]
    fn test_cold_start_equal_scores() {
        let scorer = HybridScorer::new();
        let out = scorer.score_cold_start(vec![
            candidate("a", Signal::Popularity, 0.5, None),
            candidate("b", Signal::Popularity, 0.5, None),
        ]);
        assert!(out.iter().all(|c| c.score == 0.5));
    }
}
