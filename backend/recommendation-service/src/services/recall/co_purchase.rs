use super::collaborative::rank_by_frequency;
use super::{RecallQuery, Retriever};
use crate::error::Result;
use crate::models::{Candidate, Signal};
use crate::services::store::RecommendationStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Co-purchase Recall - 共同購買召回
///
/// Counts how often other items share an order with the source product.
pub struct CoPurchaseRetriever {
    store: Arc<dyn RecommendationStore>,
}

impl CoPurchaseRetriever {
    pub fn new(store: Arc<dyn RecommendationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Retriever for CoPurchaseRetriever {
    async fn retrieve(
        &self,
        query: &RecallQuery,
        limit: usize,
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<Candidate>> {
        let RecallQuery::Product(product_id) = query else {
            return Ok(Vec::new());
        };

        let orders = self.store.orders_containing(product_id).await?;
        let mut ranked = rank_by_frequency(orders.into_iter().flatten(), |id| {
            id == product_id.as_str() || exclude_ids.contains(id)
        });
        ranked.truncate(limit);
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let frequency: HashMap<String, u32> = ranked.into_iter().collect();

        Ok(self
            .store
            .get_active_products(&ids)
            .await?
            .iter()
            .map(|p| {
                let freq = frequency.get(&p.product_id).copied().unwrap_or(0) as f32;
                let mut c = Candidate::from_product(p, Signal::CoPurchase, freq);
                c.collaborative_score = Some(freq);
                c
            })
            .collect())
    }

    fn signal(&self) -> Signal {
        Signal::CoPurchase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::recall::test_support::product;
    use crate::services::store::InMemoryStore;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_counts_shared_orders() {
        let store = Arc::new(InMemoryStore::new());
        for id in ["phone", "case", "charger", "strap"] {
            store.insert_product(product(id, "Tech", None, None)).await;
        }
        let mut inactive = product("cable", "Tech", None, None);
        inactive.is_active = false;
        store.insert_product(inactive).await;

        store.insert_order("o1", ids(&["phone", "case", "charger"])).await;
        store.insert_order("o2", ids(&["phone", "charger", "cable"])).await;
        store.insert_order("o3", ids(&["case", "strap"])).await;

        let retriever = CoPurchaseRetriever::new(store);
        let out = retriever
            .retrieve(&RecallQuery::Product("phone".into()), 10, &HashSet::new())
            .await
            .unwrap();

        let got: Vec<(&str, f32)> = out.iter().map(|c| (c.product_id.as_str(), c.score)).collect();
        assert_eq!(got, vec![("charger", 2.0), ("case", 1.0)]);
        assert!(out.iter().all(|c| c.signal == Signal::CoPurchase));
    }

    #[tokio::test]
    async fn test_no_orders_is_empty() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_product(product("lonely", "Tech", None, None)).await;
        let retriever = CoPurchaseRetriever::new(store);
        let out = retriever
            .retrieve(&RecallQuery::Product("lonely".into()), 5, &HashSet::new())
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
