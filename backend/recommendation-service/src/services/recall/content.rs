use super::{RecallQuery, Retriever};
use crate::error::Result;
use crate::models::{Candidate, Signal};
use crate::services::similarity::batch_cosine_similarity;
use crate::services::store::RecommendationStore;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Content Recall - 向量近鄰召回
///
/// Scores a popularity-bounded pool of embedded products against the query
/// vector. The pool is capped at `min(limit × multiplier, pool_cap)`, so
/// relevant but unpopular products outside it are never seen.
pub struct ContentRetriever {
    store: Arc<dyn RecommendationStore>,
    pool_multiplier: usize,
    pool_cap: usize,
}

impl ContentRetriever {
    pub fn new(store: Arc<dyn RecommendationStore>, pool_multiplier: usize, pool_cap: usize) -> Self {
        Self {
            store,
            pool_multiplier,
            pool_cap,
        }
    }

    fn pool_size(&self, limit: usize) -> usize {
        limit.saturating_mul(self.pool_multiplier).min(self.pool_cap)
    }
}

#[async_trait]
impl Retriever for ContentRetriever {
    async fn retrieve(
        &self,
        query: &RecallQuery,
        limit: usize,
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<Candidate>> {
        let RecallQuery::Embedding(query_vec) = query else {
            return Ok(Vec::new());
        };
        if query_vec.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let exclude: Vec<String> = exclude_ids.iter().cloned().collect();
        let pool = self
            .store
            .embedded_products(&exclude, self.pool_size(limit))
            .await?;

        // Zero-length or wrong-dimension embeddings cannot be compared
        let usable: Vec<_> = pool
            .iter()
            .filter(|p| !exclude_ids.contains(&p.product_id))
            .filter_map(|p| match p.usable_embedding() {
                Some(e) if e.len() == query_vec.len() => Some((p, e)),
                _ => None,
            })
            .collect();

        if usable.len() < pool.len() {
            debug!(
                skipped = pool.len() - usable.len(),
                "Skipped products without a comparable embedding"
            );
        }

        let matrix: Vec<&[f32]> = usable.iter().map(|(_, e)| *e).collect();
        let sims = batch_cosine_similarity(query_vec, &matrix);

        let mut candidates: Vec<Candidate> = usable
            .iter()
            .zip(sims)
            .map(|((product, _), sim)| {
                let mut c = Candidate::from_product(product, Signal::Content, sim);
                c.content_score = Some(sim);
                c
            })
            .collect();

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        candidates.truncate(limit);

        Ok(candidates)
    }

    fn signal(&self) -> Signal {
        Signal::Content
    }
}
