mod co_purchase;
mod collaborative;
mod content;
mod popularity;
mod search;

use crate::config::RecommenderConfig;
use crate::error::Result;
use crate::models::{Candidate, RecallStats, Signal};
use crate::services::store::RecommendationStore;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub use co_purchase::CoPurchaseRetriever;
pub use collaborative::CollaborativeRetriever;
pub use content::ContentRetriever;
pub use popularity::{CategoryRetriever, PopularityRetriever};
pub use search::{SearchRetriever, EMBEDDING_WEIGHT, TEXT_WEIGHT, USER_CATEGORY_BOOST};

/// What a retriever searches from.
#[derive(Debug, Clone)]
pub enum RecallQuery {
    /// Query vector (user preference, source product, or aggregated cart).
    Embedding(Vec<f32>),
    User(String),
    Product(String),
    Category(Option<String>),
    Text {
        query: String,
        category: Option<String>,
        user_categories: Vec<String>,
        query_embedding: Option<Vec<f32>>,
    },
}

/// 召回策略
///
/// Returns raw, signal-local scores. An empty list means the signal is
/// unavailable for this query, never an error.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &RecallQuery,
        limit: usize,
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<Candidate>>;

    fn signal(&self) -> Signal;
}

/// 召回層：持有全部召回策略
pub struct RecallLayer {
    pub content: ContentRetriever,
    pub collaborative: CollaborativeRetriever,
    pub co_purchase: CoPurchaseRetriever,
    pub popularity: PopularityRetriever,
    pub category: CategoryRetriever,
    pub search: SearchRetriever,
}

impl RecallLayer {
    pub fn new(store: Arc<dyn RecommendationStore>, config: &RecommenderConfig) -> Self {
        Self {
            content: ContentRetriever::new(
                store.clone(),
                config.content_pool_multiplier,
                config.content_pool_cap,
            ),
            collaborative: CollaborativeRetriever::new(
                store.clone(),
                config.min_user_overlap,
                config.max_similar_users,
            ),
            co_purchase: CoPurchaseRetriever::new(store.clone()),
            popularity: PopularityRetriever::new(store.clone()),
            category: CategoryRetriever::new(store.clone()),
            search: SearchRetriever::new(store),
        }
    }

    /// Run one retriever; failures are logged and read as "no signal".
    pub async fn recall(
        &self,
        retriever: &dyn Retriever,
        query: &RecallQuery,
        limit: usize,
        exclude_ids: &HashSet<String>,
    ) -> Vec<Candidate> {
        match retriever.retrieve(query, limit, exclude_ids).await {
            Ok(candidates) => {
                debug!(
                    signal = %retriever.signal(),
                    count = candidates.len(),
                    "Recall strategy finished"
                );
                candidates
            }
            Err(e) => {
                warn!("Recall strategy {} failed: {}", retriever.signal(), e);
                Vec::new()
            }
        }
    }
}

/// Merge candidate lists in order. First occurrence of a product wins;
/// excluded ids are dropped.
pub fn deduplicate_and_merge(
    lists: Vec<Vec<Candidate>>,
    exclude_ids: &HashSet<String>,
) -> (Vec<Candidate>, RecallStats) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique: Vec<Candidate> = Vec::new();
    let mut stats = RecallStats::default();

    for list in lists {
        for candidate in list {
            stats.record(candidate.signal, 1);
            if exclude_ids.contains(&candidate.product_id) {
                continue;
            }
            if seen.insert(candidate.product_id.clone()) {
                unique.push(candidate);
            }
        }
    }

    stats.total_candidates = unique.len();
    (unique, stats)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::Product;

    pub fn product(id: &str, category: &str, popularity: Option<f32>, embedding: Option<Vec<f32>>) -> Product {
        Product {
            product_id: id.to_string(),
            name: format!("Product {}", id),
            category: category.to_string(),
            price: 20.0,
            stock: Some(5),
            is_active: true,
            popularity_score: popularity,
            description: None,
            image_url: None,
            embedding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Product;

    fn candidate(id: &str, signal: Signal, score: f32) -> Candidate {
        let product = Product {
            product_id: id.to_string(),
            name: id.to_string(),
            category: "c".to_string(),
            price: 1.0,
            stock: Some(1),
            is_active: true,
            popularity_score: None,
            description: None,
            image_url: None,
            embedding: None,
        };
        Candidate::from_product(&product, signal, score)
    }

    #[test]
    fn test_deduplicate_and_merge() {
        let lists = vec![
            vec![
                candidate("p1", Signal::Content, 0.9),
                candidate("p2", Signal::Content, 0.8),
            ],
            vec![
                candidate("p1", Signal::Collaborative, 4.0),
                candidate("p3", Signal::Collaborative, 2.0),
                candidate("p4", Signal::Collaborative, 1.0),
            ],
        ];
        let exclude: HashSet<String> = ["p4".to_string()].into_iter().collect();

        let (unique, stats) = deduplicate_and_merge(lists, &exclude);

        let ids: Vec<&str> = unique.iter().map(|c| c.product_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
        assert_eq!(unique[0].signal, Signal::Content);
        assert_eq!(stats.content_count, 2);
        assert_eq!(stats.collaborative_count, 3);
        assert_eq!(stats.total_candidates, 3);
    }
}
