use super::{CatalogStore, InteractionStore, TextMatch};
use crate::error::{RecommendationError, Result};
use crate::models::{HistoryEntry, Interaction, InteractionType, Product, UserPreference};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    products: Vec<Product>,
    interactions: Vec<Interaction>,
    orders: Vec<(String, Vec<String>)>,
    preferences: HashMap<String, UserPreference>,
}

/// In-process store used by tests and local runs.
///
/// Operations named in `fail_on` return a store error, which lets callers
/// exercise their degradation paths.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    failing: std::sync::RwLock<HashSet<&'static str>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_product(&self, product: Product) {
        let mut inner = self.inner.write().await;
        inner.products.retain(|p| p.product_id != product.product_id);
        inner.products.push(product);
    }

    pub async fn insert_order(&self, order_id: impl Into<String>, product_ids: Vec<String>) {
        self.inner
            .write()
            .await
            .orders
            .push((order_id.into(), product_ids));
    }

    pub async fn insert_interaction(&self, interaction: Interaction) {
        self.inner.write().await.interactions.push(interaction);
    }

    pub async fn interaction_count(&self) -> usize {
        self.inner.read().await.interactions.len()
    }

    /// Make the named trait operation fail from now on.
    pub fn fail_on(&self, operation: &'static str) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(operation);
        }
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        let failing = self
            .failing
            .read()
            .map(|f| f.contains(operation))
            .unwrap_or(false);
        if failing {
            Err(RecommendationError::Store(format!(
                "injected failure: {}",
                operation
            )))
        } else {
            Ok(())
        }
    }
}

fn popularity_of(product: &Product) -> f32 {
    product.popularity_score.unwrap_or(0.5)
}

fn by_popularity_desc(a: &Product, b: &Product) -> Ordering {
    popularity_of(b)
        .partial_cmp(&popularity_of(a))
        .unwrap_or(Ordering::Equal)
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn trigrams(text: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    for word in tokens(text) {
        let padded: Vec<char> = format!("  {} ", word).chars().collect();
        for window in padded.windows(3) {
            out.insert(window.iter().collect());
        }
    }
    out
}

/// pg_trgm-style similarity: shared trigrams over the union.
fn trigram_similarity(a: &str, b: &str) -> f32 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f32 / union as f32
}

/// Fraction of query terms present in the document, scaled to ts_rank's range.
fn term_rank(query_terms: &[String], product: &Product) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let mut doc: HashSet<String> = tokens(&product.name).into_iter().collect();
    doc.extend(tokens(&product.category));
    if let Some(desc) = &product.description {
        doc.extend(tokens(desc));
    }
    let hits = query_terms.iter().filter(|t| doc.contains(*t)).count();
    0.1 * hits as f32 / query_terms.len() as f32
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>> {
        self.check("get_product")?;
        let inner = self.inner.read().await;
        Ok(inner
            .products
            .iter()
            .find(|p| p.product_id == product_id)
            .cloned())
    }

    async fn get_active_products(&self, product_ids: &[String]) -> Result<Vec<Product>> {
        self.check("get_active_products")?;
        let inner = self.inner.read().await;
        Ok(product_ids
            .iter()
            .filter_map(|id| {
                inner
                    .products
                    .iter()
                    .find(|p| &p.product_id == id && p.is_active)
                    .cloned()
            })
            .collect())
    }

    async fn embedded_products(
        &self,
        exclude_ids: &[String],
        pool_size: usize,
    ) -> Result<Vec<Product>> {
        self.check("embedded_products")?;
        let inner = self.inner.read().await;
        let mut pool: Vec<Product> = inner
            .products
            .iter()
            .filter(|p| p.is_active && p.embedding.is_some())
            .filter(|p| !exclude_ids.contains(&p.product_id))
            .cloned()
            .collect();
        pool.sort_by(by_popularity_desc);
        pool.truncate(pool_size);
        Ok(pool)
    }

    async fn popular_products(
        &self,
        category: Option<&str>,
        exclude_ids: &[String],
        limit: usize,
    ) -> Result<Vec<Product>> {
        self.check("popular_products")?;
        let inner = self.inner.read().await;
        let mut items: Vec<Product> = inner
            .products
            .iter()
            .filter(|p| p.is_active && p.stock.map_or(true, |s| s > 0))
            .filter(|p| category.map_or(true, |c| p.category == c))
            .filter(|p| !exclude_ids.contains(&p.product_id))
            .cloned()
            .collect();
        items.sort_by(by_popularity_desc);
        items.truncate(limit);
        Ok(items)
    }

    async fn orders_containing(&self, product_id: &str) -> Result<Vec<Vec<String>>> {
        self.check("orders_containing")?;
        let inner = self.inner.read().await;
        Ok(inner
            .orders
            .iter()
            .filter(|(_, items)| items.iter().any(|i| i == product_id))
            .map(|(_, items)| items.clone())
            .collect())
    }

    async fn text_search(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TextMatch>> {
        self.check("text_search")?;
        let inner = self.inner.read().await;
        let terms = tokens(query);

        let mut matches: Vec<TextMatch> = inner
            .products
            .iter()
            .filter(|p| p.is_active && p.stock.map_or(true, |s| s > 0))
            .filter(|p| category.map_or(true, |c| p.category == c))
            .filter_map(|p| {
                let ts_rank = term_rank(&terms, p);
                let trigram = trigram_similarity(&p.name, query);
                if ts_rank > 0.0 || trigram > 0.1 {
                    Some(TextMatch {
                        product: p.clone(),
                        ts_rank,
                        trigram,
                    })
                } else {
                    None
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            let sa = a.ts_rank * 2.0 + a.trigram;
            let sb = b.ts_rank * 2.0 + b.trigram;
            sb.partial_cmp(&sa).unwrap_or(Ordering::Equal)
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn products_missing_embedding(&self, limit: usize) -> Result<Vec<Product>> {
        self.check("products_missing_embedding")?;
        let inner = self.inner.read().await;
        Ok(inner
            .products
            .iter()
            .filter(|p| p.is_active && p.usable_embedding().is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_embedding(&self, product_id: &str, embedding: &[f32]) -> Result<()> {
        self.check("update_embedding")?;
        let mut inner = self.inner.write().await;
        match inner
            .products
            .iter_mut()
            .find(|p| p.product_id == product_id)
        {
            Some(product) => {
                product.embedding = Some(embedding.to_vec());
                Ok(())
            }
            None => Err(RecommendationError::Store(format!(
                "product not found: {}",
                product_id
            ))),
        }
    }

    async fn active_product_ids(&self) -> Result<Vec<String>> {
        self.check("active_product_ids")?;
        let inner = self.inner.read().await;
        Ok(inner
            .products
            .iter()
            .filter(|p| p.is_active)
            .map(|p| p.product_id.clone())
            .collect())
    }
}

#[async_trait]
impl InteractionStore for InMemoryStore {
    async fn record_interaction(&self, interaction: &Interaction) -> Result<()> {
        self.check("record_interaction")?;
        self.inner
            .write()
            .await
            .interactions
            .push(interaction.clone());
        Ok(())
    }

    async fn user_product_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.check("user_product_ids")?;
        let inner = self.inner.read().await;
        let mut seen = HashSet::new();
        Ok(inner
            .interactions
            .iter()
            .filter(|i| i.user_id == user_id)
            .filter_map(|i| i.product_id.clone())
            .filter(|p| seen.insert(p.clone()))
            .collect())
    }

    async fn co_interactions(
        &self,
        product_ids: &[String],
        exclude_user: &str,
    ) -> Result<Vec<(String, String)>> {
        self.check("co_interactions")?;
        let inner = self.inner.read().await;
        Ok(inner
            .interactions
            .iter()
            .filter(|i| i.user_id != exclude_user)
            .filter_map(|i| {
                i.product_id
                    .as_ref()
                    .filter(|p| product_ids.contains(p))
                    .map(|p| (i.user_id.clone(), p.clone()))
            })
            .collect())
    }

    async fn interactions_by_users(
        &self,
        user_ids: &[String],
        types: &[InteractionType],
    ) -> Result<Vec<String>> {
        self.check("interactions_by_users")?;
        let inner = self.inner.read().await;
        let mut rows: Vec<&Interaction> = inner
            .interactions
            .iter()
            .filter(|i| user_ids.contains(&i.user_id) && types.contains(&i.interaction_type))
            .collect();
        rows.sort_by_key(|i| i.created_at);
        Ok(rows.into_iter().filter_map(|i| i.product_id.clone()).collect())
    }

    async fn user_history(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoryEntry>> {
        self.check("user_history")?;
        let inner = self.inner.read().await;
        let mut entries: Vec<HistoryEntry> = inner
            .interactions
            .iter()
            .filter(|i| i.user_id == user_id && i.created_at >= since)
            .filter_map(|i| {
                let pid = i.product_id.as_ref()?;
                let product = inner.products.iter().find(|p| &p.product_id == pid)?;
                Some(HistoryEntry {
                    interaction_type: i.interaction_type,
                    created_at: i.created_at,
                    product: product.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn get_preference(&self, user_id: &str) -> Result<Option<UserPreference>> {
        self.check("get_preference")?;
        Ok(self.inner.read().await.preferences.get(user_id).cloned())
    }

    async fn upsert_preference(&self, preference: &UserPreference) -> Result<()> {
        self.check("upsert_preference")?;
        self.inner
            .write()
            .await
            .preferences
            .insert(preference.user_id.clone(), preference.clone());
        Ok(())
    }

    async fn active_users(
        &self,
        since: DateTime<Utc>,
        min_interactions: usize,
    ) -> Result<Vec<String>> {
        self.check("active_users")?;
        let inner = self.inner.read().await;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for i in inner.interactions.iter().filter(|i| i.created_at >= since) {
            *counts.entry(i.user_id.as_str()).or_insert(0) += 1;
        }
        let mut users: Vec<(&str, usize)> = counts
            .into_iter()
            .filter(|(_, c)| *c >= min_interactions)
            .collect();
        users.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(users.into_iter().map(|(u, _)| u.to_string()).collect())
    }

    async fn users_with_history(
        &self,
        before: DateTime<Utc>,
        min_interactions: usize,
    ) -> Result<Vec<String>> {
        self.check("users_with_history")?;
        let inner = self.inner.read().await;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for i in inner.interactions.iter().filter(|i| i.created_at < before) {
            *counts.entry(i.user_id.as_str()).or_insert(0) += 1;
        }
        let mut users: Vec<String> = counts
            .into_iter()
            .filter(|(_, c)| *c >= min_interactions)
            .map(|(u, _)| u.to_string())
            .collect();
        users.sort();
        Ok(users)
    }

    async fn held_out_interactions(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, HashSet<String>>> {
        self.check("held_out_interactions")?;
        let inner = self.inner.read().await;
        let mut out: HashMap<String, HashSet<String>> = HashMap::new();
        for i in inner.interactions.iter().filter(|i| {
            i.created_at >= since
                && matches!(
                    i.interaction_type,
                    InteractionType::Purchase | InteractionType::CartAdd | InteractionType::View
                )
        }) {
            if let Some(pid) = &i.product_id {
                out.entry(i.user_id.clone()).or_default().insert(pid.clone());
            }
        }
        Ok(out)
    }

    async fn interaction_popularity(&self) -> Result<HashMap<String, f64>> {
        self.check("interaction_popularity")?;
        let inner = self.inner.read().await;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for pid in inner.interactions.iter().filter_map(|i| i.product_id.as_ref()) {
            *counts.entry(pid.clone()).or_insert(0) += 1;
        }
        let total: usize = counts.values().sum();
        if total == 0 {
            return Ok(HashMap::new());
        }
        Ok(counts
            .into_iter()
            .map(|(pid, c)| (pid, c as f64 / total as f64))
            .collect())
    }
}
