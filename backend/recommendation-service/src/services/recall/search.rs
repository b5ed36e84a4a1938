use super::{RecallQuery, Retriever};
use crate::error::Result;
use crate::models::{Candidate, Signal};
use crate::services::similarity::cosine_similarity;
use crate::services::store::{RecommendationStore, TextMatch};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

pub const TEXT_WEIGHT: f32 = 0.6;
pub const EMBEDDING_WEIGHT: f32 = 0.4;
pub const USER_CATEGORY_BOOST: f32 = 1.2;

/// Search Recall - 全文 + 模糊匹配 + 向量混合
///
/// text_score = (ts_rank × 2 + trigram) / 3, boosted for the user's
/// preferred categories. With a query embedding, products carrying a
/// comparable embedding are re-scored as
/// `0.6 × text_score + 0.4 × max(0, cosine)` (unboosted text score).
pub struct SearchRetriever {
    store: Arc<dyn RecommendationStore>,
}

impl SearchRetriever {
    pub fn new(store: Arc<dyn RecommendationStore>) -> Self {
        Self { store }
    }
}

pub fn text_score(ts_rank: f32, trigram: f32) -> f32 {
    (ts_rank * 2.0 + trigram) / 3.0
}

fn has_norm(v: &[f32]) -> bool {
    v.iter().any(|x| *x != 0.0)
}

fn score_match(
    m: &TextMatch,
    user_categories: &[String],
    query_embedding: Option<&[f32]>,
) -> Candidate {
    let text = text_score(m.ts_rank, m.trigram);
    let boost = if user_categories.contains(&m.product.category) {
        USER_CATEGORY_BOOST
    } else {
        1.0
    };

    let blended = query_embedding.filter(|q| has_norm(q)).and_then(|q| {
        m.product
            .usable_embedding()
            .filter(|e| e.len() == q.len() && has_norm(e))
            .map(|e| text * TEXT_WEIGHT + cosine_similarity(q, e).max(0.0) * EMBEDDING_WEIGHT)
    });

    let score = blended.unwrap_or(text * boost);
    let mut c = Candidate::from_product(&m.product, Signal::Search, score);
    c.text_score = Some(text);
    c
}

#[async_trait]
impl Retriever for SearchRetriever {
    async fn retrieve(
        &self,
        query: &RecallQuery,
        limit: usize,
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<Candidate>> {
        let RecallQuery::Text {
            query,
            category,
            user_categories,
            query_embedding,
        } = query
        else {
            return Ok(Vec::new());
        };

        let matches = self
            .store
            .text_search(query, category.as_deref(), limit)
            .await?;

        let mut candidates: Vec<Candidate> = matches
            .iter()
            .filter(|m| !exclude_ids.contains(&m.product.product_id))
            .map(|m| score_match(m, user_categories, query_embedding.as_deref()))
            .collect();

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(candidates)
    }

    fn signal(&self) -> Signal {
        Signal::Search
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::recall::test_support::product;
    use crate::services::store::InMemoryStore;

    fn text_query(q: &str, user_categories: Vec<String>, emb: Option<Vec<f32>>) -> RecallQuery {
        RecallQuery::Text {
            query: q.to_string(),
            category: None,
            user_categories,
            query_embedding: emb,
        }
    }

    #[test]
    fn test_text_score_formula() {
        assert!((text_score(0.1, 0.4) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_category_boost_applies_without_embedding() {
        let m = TextMatch {
            product: product("p1", "Shoes", None, None),
            ts_rank: 0.1,
            trigram: 0.4,
        };
        let plain = score_match(&m, &[], None);
        let boosted = score_match(&m, &["Shoes".to_string()], None);
        assert!((plain.score - 0.2).abs() < 1e-6);
        assert!((boosted.score - 0.24).abs() < 1e-6);
        assert_eq!(boosted.text_score, plain.text_score);
    }

    #[test]
    fn test_embedding_blend_uses_unboosted_text() {
        let m = TextMatch {
            product: product("p1", "Shoes", None, Some(vec![1.0, 0.0])),
            ts_rank: 0.1,
            trigram: 0.4,
        };
        let q = vec![1.0, 0.0];
        let c = score_match(&m, &["Shoes".to_string()], Some(q.as_slice()));
        // 0.6 × 0.2 + 0.4 × 1.0
        assert!((c.score - 0.52).abs() < 1e-5);

        let opposite = vec![-1.0, 0.0];
        let c = score_match(&m, &[], Some(opposite.as_slice()));
        assert!((c.score - 0.12).abs() < 1e-5);
    }

    #[test]
    fn test_mismatched_dimension_keeps_text_score() {
        let m = TextMatch {
            product: product("p1", "Shoes", None, Some(vec![1.0, 0.0, 0.0])),
            ts_rank: 0.1,
            trigram: 0.4,
        };
        let q = vec![1.0, 0.0];
        let c = score_match(&m, &[], Some(q.as_slice()));
        assert!((c.score - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_search_retrieval() {
        let store = Arc::new(InMemoryStore::new());
        let mut runner = product("p1", "Shoes", None, None);
        runner.name = "Trail Running Shoes".into();
        let mut mug = product("p2", "Kitchen", None, None);
        mug.name = "Coffee Mug".into();
        store.insert_product(runner).await;
        store.insert_product(mug).await;

        let retriever = SearchRetriever::new(store);
        let out = retriever
            .retrieve(&text_query("running shoes", vec![], None), 10, &HashSet::new())
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].product_id, "p1");
        assert_eq!(out[0].signal, Signal::Search);
        assert!(out[0].text_score.is_some());
    }
}
