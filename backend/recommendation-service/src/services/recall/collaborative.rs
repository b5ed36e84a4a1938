use super::{RecallQuery, Retriever};
use crate::error::Result;
use crate::models::{Candidate, InteractionType, Signal};
use crate::services::store::RecommendationStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

const HIGH_INTENT: [InteractionType; 3] = [
    InteractionType::Purchase,
    InteractionType::CartAdd,
    InteractionType::WishlistAdd,
];

/// Collaborative Recall - 相似用戶召回
///
/// Two-hop walk: user → products touched → other users sharing at least
/// `min_overlap` of them → their high-intent products the user hasn't
/// touched, ranked by frequency. Scores are raw counts.
pub struct CollaborativeRetriever {
    store: Arc<dyn RecommendationStore>,
    min_overlap: usize,
    max_similar_users: usize,
}

impl CollaborativeRetriever {
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        min_overlap: usize,
        max_similar_users: usize,
    ) -> Self {
        Self {
            store,
            min_overlap,
            max_similar_users,
        }
    }

    /// Users ranked by overlap, ties kept in first-seen order.
    fn similar_users(&self, pairs: Vec<(String, String)>) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        let mut overlap: HashMap<String, HashSet<String>> = HashMap::new();

        for (user, product) in pairs {
            let products = overlap.entry(user.clone()).or_insert_with(|| {
                order.push(user);
                HashSet::new()
            });
            products.insert(product);
        }

        let mut ranked: Vec<(String, usize)> = order
            .into_iter()
            .map(|u| {
                let n = overlap.get(&u).map(|s| s.len()).unwrap_or(0);
                (u, n)
            })
            .filter(|(_, n)| *n >= self.min_overlap)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(self.max_similar_users);
        ranked.into_iter().map(|(u, _)| u).collect()
    }
}

/// Frequency per product, highest first, ties in first-seen order.
pub(crate) fn rank_by_frequency<I>(items: I, skip: impl Fn(&str) -> bool) -> Vec<(String, u32)>
where
    I: IntoIterator<Item = String>,
{
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u32> = HashMap::new();

    for id in items {
        if skip(&id) {
            continue;
        }
        let count = counts.entry(id.clone()).or_insert_with(|| {
            order.push(id);
            0
        });
        *count += 1;
    }

    let mut ranked: Vec<(String, u32)> = order
        .into_iter()
        .map(|id| {
            let n = counts.get(&id).copied().unwrap_or(0);
            (id, n)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

#[async_trait]
impl Retriever for CollaborativeRetriever {
    async fn retrieve(
        &self,
        query: &RecallQuery,
        limit: usize,
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<Candidate>> {
        let RecallQuery::User(user_id) = query else {
            return Ok(Vec::new());
        };

        let user_products = self.store.user_product_ids(user_id).await?;
        if user_products.is_empty() {
            return Ok(Vec::new());
        }

        let pairs = self.store.co_interactions(&user_products, user_id).await?;
        let similar = self.similar_users(pairs);
        if similar.is_empty() {
            debug!(user_id = %user_id, "No similar users found");
            return Ok(Vec::new());
        }

        let touched: HashSet<&str> = user_products.iter().map(|s| s.as_str()).collect();
        let interacted = self.store.interactions_by_users(&similar, &HIGH_INTENT).await?;

        let mut ranked = rank_by_frequency(interacted, |id| {
            touched.contains(id) || exclude_ids.contains(id)
        });
        ranked.truncate(limit);

        let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let frequency: HashMap<String, u32> = ranked.into_iter().collect();
        let products = self.store.get_active_products(&ids).await?;

        let candidates: Vec<Candidate> = products
            .iter()
            .map(|p| {
                let freq = frequency.get(&p.product_id).copied().unwrap_or(0) as f32;
                let mut c = Candidate::from_product(p, Signal::Collaborative, freq);
                c.collaborative_score = Some(freq);
                c
            })
            .collect();

        debug!(
            user_id = %user_id,
            similar_users = similar.len(),
            candidates = candidates.len(),
            "Collaborative recall completed"
        );

        Ok(candidates)
    }

    fn signal(&self) -> Signal {
        Signal::Collaborative
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Interaction;
    use crate::services::recall::test_support::product;
    use crate::services::store::InMemoryStore;
    use chrono::{Duration, Utc};

    async fn interact(store: &InMemoryStore, user: &str, product: &str, kind: InteractionType, age_secs: i64) {
        let mut i = Interaction::new(user, Some(product.to_string()), kind);
        i.created_at = Utc::now() - Duration::seconds(age_secs);
        store.insert_interaction(i).await;
    }

    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for id in ["a", "b", "c", "x", "y", "z"] {
            store.insert_product(product(id, "Cat", None, None)).await;
        }

        // target user touched a, b, c
        interact(&store, "me", "a", InteractionType::View, 100).await;
        interact(&store, "me", "b", InteractionType::View, 100).await;
        interact(&store, "me", "c", InteractionType::Purchase, 100).await;

        // u1 overlaps on a, b and bought x twice, y once
        interact(&store, "u1", "a", InteractionType::View, 90).await;
        interact(&store, "u1", "b", InteractionType::View, 80).await;
        interact(&store, "u1", "x", InteractionType::Purchase, 70).await;
        interact(&store, "u1", "x", InteractionType::CartAdd, 60).await;
        interact(&store, "u1", "y", InteractionType::WishlistAdd, 50).await;
        interact(&store, "u1", "z", InteractionType::View, 40).await;

        // u2 overlaps on a only
        interact(&store, "u2", "a", InteractionType::View, 30).await;
        interact(&store, "u2", "z", InteractionType::Purchase, 20).await;
        store
    }

    #[tokio::test]
    async fn test_two_hop_walk() {
        let store = seeded_store().await;
        let retriever = CollaborativeRetriever::new(store, 2, 10);

        let out = retriever
            .retrieve(&RecallQuery::User("me".into()), 10, &HashSet::new())
            .await
            .unwrap();

        let ids: Vec<&str> = out.iter().map(|c| c.product_id.as_str()).collect();
        // z is only a view from u1 and a purchase from u2 (overlap 1)
        assert_eq!(ids, vec!["x", "y"]);
        assert_eq!(out[0].score, 2.0);
        assert_eq!(out[1].score, 1.0);
        assert!(out.iter().all(|c| c.signal == Signal::Collaborative));
    }

    #[tokio::test]
    async fn test_unknown_user_is_empty() {
        let store = seeded_store().await;
        let retriever = CollaborativeRetriever::new(store, 2, 10);
        let out = retriever
            .retrieve(&RecallQuery::User("nobody".into()), 10, &HashSet::new())
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_rank_by_frequency_is_stable() {
        let items = vec!["b", "a", "c", "a", "b", "d"]
            .into_iter()
            .map(String::from);
        let ranked = rank_by_frequency(items, |id| id == "d");
        assert_eq!(
            ranked,
            vec![
                ("b".to_string(), 2),
                ("a".to_string(), 2),
                ("c".to_string(), 1)
            ]
        );
    }
}
