//! Offline ranking-quality evaluation.
//!
//! Temporal split: interactions from the last `test_days` are ground truth
//! (purchase / cart_add / view); users need `min_interactions` before the
//! cutoff to be evaluated. Recommendations come from the homepage pipeline.

mod metrics;

pub use metrics::{mrr, ndcg_at_k, novelty, precision_at_k, recall_at_k};

use crate::config::EvaluationConfig;
use crate::error::Result;
use crate::services::engine::HybridRecommendationEngine;
use crate::services::store::RecommendationStore;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

const RANDOM_BASELINE_DIVERSITY: f64 = 1.0;
const RANDOM_BASELINE_NOVELTY: f64 = 5.0;

fn round4<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64((value * 10_000.0).round() / 10_000.0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    #[serde(serialize_with = "round4")]
    pub precision_at_k: f64,
    #[serde(serialize_with = "round4")]
    pub recall_at_k: f64,
    #[serde(serialize_with = "round4")]
    pub ndcg_at_k: f64,
    #[serde(serialize_with = "round4")]
    pub mrr: f64,
    #[serde(serialize_with = "round4")]
    pub hit_rate: f64,
    #[serde(serialize_with = "round4")]
    pub catalog_coverage: f64,
    #[serde(serialize_with = "round4")]
    pub diversity: f64,
    #[serde(serialize_with = "round4")]
    pub novelty: f64,
    pub num_users_evaluated: usize,
    pub num_recommendations: usize,
    pub k: usize,
}

impl EvaluationMetrics {
    pub fn empty(k: usize) -> Self {
        Self {
            k,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyComparison {
    pub comparison: BTreeMap<String, EvaluationMetrics>,
    pub best_strategy: String,
    pub evaluated_at: DateTime<Utc>,
}

/// Per-user accuracy accumulators.
#[derive(Default)]
struct Accumulator {
    precision: Vec<f64>,
    recall: Vec<f64>,
    ndcg: Vec<f64>,
    mrr: Vec<f64>,
    hits: Vec<f64>,
}

impl Accumulator {
    fn push(&mut self, recommended: &[String], relevant: &HashSet<String>, k: usize) {
        self.precision.push(precision_at_k(recommended, relevant, k));
        self.recall.push(recall_at_k(recommended, relevant, k));
        self.ndcg.push(ndcg_at_k(recommended, relevant, k));
        self.mrr.push(mrr(recommended, relevant));
        let hit = recommended.iter().any(|id| relevant.contains(id));
        self.hits.push(if hit { 1.0 } else { 0.0 });
    }

    fn users(&self) -> usize {
        self.precision.len()
    }

    fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }
}

pub struct RecommendationEvaluator {
    engine: Arc<HybridRecommendationEngine>,
    store: Arc<dyn RecommendationStore>,
    config: EvaluationConfig,
    seed: Option<u64>,
}

impl RecommendationEvaluator {
    pub fn new(
        engine: Arc<HybridRecommendationEngine>,
        store: Arc<dyn RecommendationStore>,
        config: EvaluationConfig,
    ) -> Self {
        Self {
            engine,
            store,
            config,
            seed: None,
        }
    }

    /// Fixed seed for the random baseline.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn cutoff(&self) -> DateTime<Utc> {
        Utc::now() - Duration::days(self.config.test_days)
    }

    /// Evaluate the hybrid homepage pipeline.
    pub async fn evaluate(&self) -> Result<EvaluationMetrics> {
        let k = self.config.k;
        let cutoff = self.cutoff();
        info!(k, test_days = self.config.test_days, "Starting evaluation");

        let test_data = self.store.held_out_interactions(cutoff).await?;
        let users = self
            .store
            .users_with_history(cutoff, self.config.min_interactions)
            .await?;
        if users.is_empty() {
            warn!("No users with sufficient history for evaluation");
            return Ok(EvaluationMetrics::empty(k));
        }

        let all_products = self.store.active_product_ids().await?;
        let popularity = self.store.interaction_popularity().await?;

        let mut acc = Accumulator::default();
        let mut all_recommended: HashSet<String> = HashSet::new();
        let mut category_counts: Vec<usize> = Vec::new();

        for user_id in &users {
            let Some(relevant) = test_data.get(user_id).filter(|r| !r.is_empty()) else {
                continue;
            };

            let response = match self.engine.homepage(user_id, Some(k)).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Failed to get recommendations");
                    continue;
                }
            };

            let rec_ids = response.product_ids();
            acc.push(&rec_ids, relevant, k);
            all_recommended.extend(rec_ids);

            let categories: HashSet<&str> = response
                .recommendations
                .iter()
                .map(|r| r.category.as_str())
                .collect();
            category_counts.push(categories.len());
        }

        if acc.users() == 0 {
            return Ok(EvaluationMetrics::empty(k));
        }

        let catalog_coverage = if all_products.is_empty() {
            0.0
        } else {
            all_recommended.len() as f64 / all_products.len() as f64
        };
        let diversity = if category_counts.is_empty() || k == 0 {
            0.0
        } else {
            category_counts.iter().sum::<usize>() as f64 / category_counts.len() as f64 / k as f64
        };

        let metrics = EvaluationMetrics {
            precision_at_k: Accumulator::mean(&acc.precision),
            recall_at_k: Accumulator::mean(&acc.recall),
            ndcg_at_k: Accumulator::mean(&acc.ndcg),
            mrr: Accumulator::mean(&acc.mrr),
            hit_rate: Accumulator::mean(&acc.hits),
            catalog_coverage,
            diversity,
            novelty: novelty(&all_recommended, &popularity),
            num_users_evaluated: acc.users(),
            num_recommendations: all_recommended.len(),
            k,
        };

        info!(
            users = metrics.num_users_evaluated,
            ndcg = metrics.ndcg_at_k,
            hit_rate = metrics.hit_rate,
            "Evaluation complete"
        );
        Ok(metrics)
    }

    /// Same top-k popular items for every user.
    pub async fn evaluate_popularity_baseline(&self) -> Result<EvaluationMetrics> {
        let k = self.config.k;
        let test_data = self.store.held_out_interactions(self.cutoff()).await?;
        let popular: Vec<String> = self
            .store
            .popular_products(None, &[], k)
            .await?
            .into_iter()
            .map(|p| p.product_id)
            .collect();

        let mut acc = Accumulator::default();
        for relevant in test_data.values() {
            acc.push(&popular, relevant, k);
        }
        if acc.users() == 0 {
            return Ok(EvaluationMetrics::empty(k));
        }

        let total_products = self.store.active_product_ids().await?.len();
        let distinct: HashSet<&String> = popular.iter().collect();

        Ok(EvaluationMetrics {
            precision_at_k: Accumulator::mean(&acc.precision),
            recall_at_k: Accumulator::mean(&acc.recall),
            ndcg_at_k: Accumulator::mean(&acc.ndcg),
            mrr: 0.0,
            hit_rate: Accumulator::mean(&acc.hits),
            catalog_coverage: if total_products == 0 {
                0.0
            } else {
                distinct.len() as f64 / total_products as f64
            },
            diversity: 0.0,
            novelty: 0.0,
            num_users_evaluated: acc.users(),
            num_recommendations: popular.len(),
            k,
        })
    }

    /// Uniform sample of active products per user.
    pub async fn evaluate_random_baseline(&self) -> Result<EvaluationMetrics> {
        let k = self.config.k;
        let test_data = self.store.held_out_interactions(self.cutoff()).await?;
        let all_products = self.store.active_product_ids().await?;

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut acc = Accumulator::default();
        for relevant in test_data.values() {
            let sample: Vec<String> = all_products
                .choose_multiple(&mut rng, k.min(all_products.len()))
                .cloned()
                .collect();
            acc.push(&sample, relevant, k);
        }
        if acc.users() == 0 {
            return Ok(EvaluationMetrics::empty(k));
        }

        Ok(EvaluationMetrics {
            precision_at_k: Accumulator::mean(&acc.precision),
            recall_at_k: Accumulator::mean(&acc.recall),
            ndcg_at_k: Accumulator::mean(&acc.ndcg),
            mrr: 0.0,
            hit_rate: Accumulator::mean(&acc.hits),
            catalog_coverage: 1.0,
            diversity: RANDOM_BASELINE_DIVERSITY,
            novelty: RANDOM_BASELINE_NOVELTY,
            num_users_evaluated: acc.users(),
            num_recommendations: k,
            k,
        })
    }

    /// Hybrid vs popularity vs random; best by NDCG@k (first wins ties).
    pub async fn compare_strategies(&self) -> Result<StrategyComparison> {
        let results = vec![
            ("hybrid", self.evaluate().await?),
            ("popularity_baseline", self.evaluate_popularity_baseline().await?),
            ("random_baseline", self.evaluate_random_baseline().await?),
        ];

        let mut best: Option<(&str, f64)> = None;
        for (name, metrics) in &results {
            if best.map_or(true, |(_, ndcg)| metrics.ndcg_at_k > ndcg) {
                best = Some((name, metrics.ndcg_at_k));
            }
        }
        let best_strategy = best.map(|(name, _)| name.to_string()).unwrap_or_default();

        Ok(StrategyComparison {
            comparison: results
                .into_iter()
                .map(|(name, m)| (name.to_string(), m))
                .collect(),
            best_strategy,
            evaluated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_serialize_rounded() {
        let metrics = EvaluationMetrics {
            precision_at_k: 0.123456,
            ndcg_at_k: 2.0 / 3.0,
            k: 10,
            ..Default::default()
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["precision_at_k"], serde_json::json!(0.1235));
        assert_eq!(json["ndcg_at_k"], serde_json::json!(0.6667));
        assert_eq!(json["k"], serde_json::json!(10));
    }

    #[test]
    fn test_empty_metrics() {
        let m = EvaluationMetrics::empty(5);
        assert_eq!(m.k, 5);
        assert_eq!(m.num_users_evaluated, 0);
        assert_eq!(m.ndcg_at_k, 0.0);
    }
}
