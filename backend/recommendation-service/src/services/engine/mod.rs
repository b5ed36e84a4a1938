//! Hybrid Recommendation Engine
//!
//! Stage order per request is fixed:
//! 1. Recall (concurrent per signal) → merge / dedupe
//! 2. Hybrid scoring
//! 3. Optional rerank
//! 4. Diversity + stock rules → truncate → positions
//!
//! Entry points live in `contexts.rs`. Only `InvalidInput` is ever
//! returned as an error; every collaborator failure degrades.

mod contexts;

use crate::config::RecommenderConfig;
use crate::error::{RecommendationError, Result};
use crate::models::{
    Candidate, Product, RecommendationContext, RecommendationResponse, RecommendedProduct,
    UserPreference,
};
use crate::services::cache::{get_json, popular_key, preference_key, set_json, Cache};
use crate::services::embedding::EmbeddingProvider;
use crate::services::ranking::HybridScorer;
use crate::services::recall::{RecallLayer, RecallQuery};
use crate::services::rerank::Reranker;
use crate::services::store::RecommendationStore;
use crate::utils::clamp_unit;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

const DEFAULT_RERANK_MULTIPLIER: usize = 2;

pub struct HybridRecommendationEngine {
    store: Arc<dyn RecommendationStore>,
    cache: Arc<dyn Cache>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    recall: RecallLayer,
    scorer: HybridScorer,
    reranker: Reranker,
    config: RecommenderConfig,
    rerank_multiplier: usize,
    embedding_dimension: Option<usize>,
}

impl HybridRecommendationEngine {
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        cache: Arc<dyn Cache>,
        reranker: Reranker,
        config: RecommenderConfig,
    ) -> Self {
        Self {
            recall: RecallLayer::new(store.clone(), &config),
            store,
            cache,
            embedder: None,
            scorer: HybridScorer::new(),
            reranker,
            config,
            rerank_multiplier: DEFAULT_RERANK_MULTIPLIER,
            embedding_dimension: None,
        }
    }

    /// Query embeddings for search come from this provider.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_rerank_multiplier(mut self, multiplier: usize) -> Self {
        self.rerank_multiplier = multiplier.max(1);
        self
    }

    /// Embeddings of any other length are treated as missing.
    pub fn with_embedding_dimension(mut self, dimension: usize) -> Self {
        self.embedding_dimension = Some(dimension);
        self
    }

    pub fn config(&self) -> &RecommenderConfig {
        &self.config
    }

    /// `None` → default; anything outside `1..=max_limit` is rejected.
    pub(crate) fn resolve_limit(&self, limit: Option<usize>) -> Result<usize> {
        let limit = limit.unwrap_or(self.config.default_limit);
        if limit == 0 || limit > self.config.max_limit {
            return Err(RecommendationError::InvalidInput(format!(
                "limit must be between 1 and {}, got {}",
                self.config.max_limit, limit
            )));
        }
        Ok(limit)
    }

    /// Non-empty, non-zero, and of the configured dimension when one is set.
    pub(crate) fn accepts_embedding(&self, embedding: &[f32]) -> bool {
        !embedding.is_empty()
            && self
                .embedding_dimension
                .map_or(true, |dimension| embedding.len() == dimension)
            && embedding.iter().any(|x| *x != 0.0)
    }

    /// Product embedding the content path can use, if any.
    pub(crate) fn product_embedding<'a>(&self, product: &'a Product) -> Option<&'a [f32]> {
        product
            .usable_embedding()
            .filter(|embedding| self.accepts_embedding(embedding))
    }

    fn rerank_top_k(&self, limit: usize) -> usize {
        limit.saturating_mul(self.rerank_multiplier)
    }

    /// Preference record via cache, then store. Failures read as "none".
    pub(crate) async fn user_preference(&self, user_id: &str) -> Option<UserPreference> {
        let key = preference_key(user_id);
        if let Some(pref) = get_json::<UserPreference>(self.cache.as_ref(), &key).await {
            return Some(pref);
        }

        match self.store.get_preference(user_id).await {
            Ok(Some(pref)) => {
                set_json(
                    self.cache.as_ref(),
                    &key,
                    &pref,
                    self.config.preference_cache_ttl_secs,
                )
                .await;
                Some(pref)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load preference for user {}: {}", user_id, e);
                None
            }
        }
    }

    /// Popularity fallback list, cached per size, minus `exclude_ids`.
    pub(crate) async fn popular_fallback(
        &self,
        limit: usize,
        exclude_ids: &HashSet<String>,
    ) -> Vec<Candidate> {
        let key = popular_key(limit);
        let cached = get_json::<Vec<Candidate>>(self.cache.as_ref(), &key).await;

        let popular = match cached {
            Some(list) => list,
            None => {
                let list = self
                    .recall
                    .recall(
                        &self.recall.popularity,
                        &RecallQuery::Category(None),
                        limit,
                        &HashSet::new(),
                    )
                    .await;
                if !list.is_empty() {
                    set_json(
                        self.cache.as_ref(),
                        &key,
                        &list,
                        self.config.popularity_cache_ttl_secs,
                    )
                    .await;
                }
                list
            }
        };

        popular
            .into_iter()
            .filter(|c| !exclude_ids.contains(&c.product_id))
            .collect()
    }

    /// Truncate, assign 1-based positions, clamp scores.
    pub(crate) fn finalize(
        &self,
        context: RecommendationContext,
        user_id: Option<&str>,
        candidates: Vec<Candidate>,
        limit: usize,
    ) -> RecommendationResponse {
        let recommendations = candidates
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, c)| RecommendedProduct {
                product_id: c.product_id,
                name: c.name,
                category: c.category,
                price: c.price,
                image_url: c.image_url,
                score: clamp_unit(c.score),
                position: i + 1,
                signal: c.signal,
            })
            .collect();

        RecommendationResponse {
            request_id: Uuid::new_v4(),
            context,
            user_id: user_id.map(str::to_string),
            recommendations,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Signal;
    use crate::services::cache::NoopCache;
    use crate::services::recall::test_support::product;
    use crate::services::store::InMemoryStore;

    fn engine(store: Arc<InMemoryStore>) -> HybridRecommendationEngine {
        HybridRecommendationEngine::new(
            store,
            Arc::new(NoopCache),
            Reranker::disabled(),
            RecommenderConfig::default(),
        )
    }

    #[test]
    fn test_resolve_limit() {
        let engine = engine(Arc::new(InMemoryStore::new()));
        assert_eq!(engine.resolve_limit(None).unwrap(), 12);
        assert_eq!(engine.resolve_limit(Some(50)).unwrap(), 50);
        assert!(engine.resolve_limit(Some(0)).unwrap_err().is_invalid_input());
        assert!(engine.resolve_limit(Some(51)).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_product_embedding_respects_configured_dimension() {
        let unchecked = engine(Arc::new(InMemoryStore::new()));
        let checked = engine(Arc::new(InMemoryStore::new())).with_embedding_dimension(2);

        let ok = product("ok", "X", None, Some(vec![0.6, 0.8]));
        let long = product("long", "X", None, Some(vec![0.6, 0.8, 0.0]));
        let zero = product("zero", "X", None, Some(vec![0.0, 0.0]));
        let empty = product("empty", "X", None, Some(vec![]));

        assert!(checked.product_embedding(&ok).is_some());
        assert!(checked.product_embedding(&long).is_none());
        assert!(checked.product_embedding(&zero).is_none());
        assert!(checked.product_embedding(&empty).is_none());

        assert!(unchecked.product_embedding(&long).is_some());
        assert!(unchecked.product_embedding(&zero).is_none());
    }

    #[test]
    fn test_finalize_positions_and_clamps() {
        let engine = engine(Arc::new(InMemoryStore::new()));
        let a = Candidate::from_product(&product("a", "X", None, None), Signal::Content, 1.4);
        let b = Candidate::from_product(&product("b", "X", None, None), Signal::Content, 0.3);
        let c = Candidate::from_product(&product("c", "X", None, None), Signal::Content, 0.1);

        let resp = engine.finalize(RecommendationContext::Homepage, Some("u1"), vec![a, b, c], 2);
        assert_eq!(resp.recommendations.len(), 2);
        assert_eq!(resp.recommendations[0].position, 1);
        assert_eq!(resp.recommendations[1].position, 2);
        assert_eq!(resp.recommendations[0].score, 1.0);
        assert_eq!(resp.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_popular_fallback_excludes() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_product(product("a", "X", Some(0.9), None)).await;
        store.insert_product(product("b", "X", Some(0.8), None)).await;
        let engine = engine(store);

        let exclude: HashSet<String> = ["a".to_string()].into_iter().collect();
        let out = engine.popular_fallback(10, &exclude).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].product_id, "b");
    }

    #[tokio::test]
    async fn test_preference_store_failure_reads_as_none() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_on("get_preference");
        let engine = engine(store);
        assert!(engine.user_preference("u1").await.is_none());
    }
}
