use super::{RecallQuery, Retriever};
use crate::error::Result;
use crate::models::{Candidate, Product, Signal};
use crate::services::store::RecommendationStore;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

const DEFAULT_POPULARITY: f32 = 0.5;

fn popularity_candidate(product: &Product, signal: Signal) -> Candidate {
    let pop = product.popularity_score.unwrap_or(DEFAULT_POPULARITY);
    let mut c = Candidate::from_product(product, signal, pop);
    c.popularity_score = Some(pop);
    c
}

/// Popularity Recall - 熱門召回（冷啟動兜底）
pub struct PopularityRetriever {
    store: Arc<dyn RecommendationStore>,
}

impl PopularityRetriever {
    pub fn new(store: Arc<dyn RecommendationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Retriever for PopularityRetriever {
    async fn retrieve(
        &self,
        _query: &RecallQuery,
        limit: usize,
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<Candidate>> {
        let exclude: Vec<String> = exclude_ids.iter().cloned().collect();
        let products = self.store.popular_products(None, &exclude, limit).await?;
        Ok(products
            .iter()
            .map(|p| popularity_candidate(p, Signal::Popularity))
            .collect())
    }

    fn signal(&self) -> Signal {
        Signal::Popularity
    }
}

/// Category Recall - 同類熱門
///
/// Popular items within one category. Without a category it behaves like
/// plain popularity recall.
pub struct CategoryRetriever {
    store: Arc<dyn RecommendationStore>,
}

impl CategoryRetriever {
    pub fn new(store: Arc<dyn RecommendationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Retriever for CategoryRetriever {
    async fn retrieve(
        &self,
        query: &RecallQuery,
        limit: usize,
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<Candidate>> {
        let category = match query {
            RecallQuery::Category(c) => c.as_deref(),
            _ => None,
        };
        let signal = if category.is_some() {
            Signal::Category
        } else {
            Signal::Popularity
        };

        let exclude: Vec<String> = exclude_ids.iter().cloned().collect();
        let products = self
            .store
            .popular_products(category, &exclude, limit)
            .await?;
        Ok(products
            .iter()
            .map(|p| popularity_candidate(p, signal))
            .collect())
    }

    fn signal(&self) -> Signal {
        Signal::Category
    }
}
