//! Product / interaction store seam.
//!
//! The engine only sees these traits. `PgStore` talks to the recommender
//! schema in Postgres; `InMemoryStore` backs tests and local runs.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::error::Result;
use crate::models::{HistoryEntry, Interaction, InteractionType, Product, UserPreference};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Full-text + trigram match for a search query.
#[derive(Debug, Clone)]
pub struct TextMatch {
    pub product: Product,
    pub ts_rank: f32,
    pub trigram: f32,
}

/// Product catalog reads and embedding writes.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Product by id regardless of active flag.
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>>;

    /// Active products for the given ids, in input order; unknown ids are skipped.
    async fn get_active_products(&self, product_ids: &[String]) -> Result<Vec<Product>>;

    /// Active products carrying an embedding, excluding `exclude_ids`,
    /// highest popularity first, at most `pool_size`.
    async fn embedded_products(
        &self,
        exclude_ids: &[String],
        pool_size: usize,
    ) -> Result<Vec<Product>>;

    /// Active, in-stock products by popularity, optionally within a category.
    async fn popular_products(
        &self,
        category: Option<&str>,
        exclude_ids: &[String],
        limit: usize,
    ) -> Result<Vec<Product>>;

    /// Product lists of every order that contains `product_id`.
    async fn orders_containing(&self, product_id: &str) -> Result<Vec<Vec<String>>>;

    /// Active, in-stock products matching `query` by full text or trigram.
    async fn text_search(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TextMatch>>;

    /// Active products without an embedding yet.
    async fn products_missing_embedding(&self, limit: usize) -> Result<Vec<Product>>;

    async fn update_embedding(&self, product_id: &str, embedding: &[f32]) -> Result<()>;

    async fn active_product_ids(&self) -> Result<Vec<String>>;
}

/// Interaction log and preference records.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    async fn record_interaction(&self, interaction: &Interaction) -> Result<()>;

    /// Distinct products the user has touched (any interaction type).
    async fn user_product_ids(&self, user_id: &str) -> Result<Vec<String>>;

    /// `(user_id, product_id)` pairs from other users on any of `product_ids`.
    async fn co_interactions(
        &self,
        product_ids: &[String],
        exclude_user: &str,
    ) -> Result<Vec<(String, String)>>;

    /// Product ids of `types` interactions made by `user_ids`, oldest first.
    async fn interactions_by_users(
        &self,
        user_ids: &[String],
        types: &[InteractionType],
    ) -> Result<Vec<String>>;

    /// Interactions since `since` joined to their products, newest first.
    async fn user_history(&self, user_id: &str, since: DateTime<Utc>)
        -> Result<Vec<HistoryEntry>>;

    async fn get_preference(&self, user_id: &str) -> Result<Option<UserPreference>>;

    /// Replaces the whole record for the user in one write.
    async fn upsert_preference(&self, preference: &UserPreference) -> Result<()>;

    /// Users with at least `min_interactions` interactions since `since`, busiest first.
    async fn active_users(&self, since: DateTime<Utc>, min_interactions: usize)
        -> Result<Vec<String>>;

    /// Users with at least `min_interactions` interactions before `before`.
    async fn users_with_history(
        &self,
        before: DateTime<Utc>,
        min_interactions: usize,
    ) -> Result<Vec<String>>;

    /// Ground-truth items per user: purchase / cart_add / view since `since`.
    async fn held_out_interactions(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, HashSet<String>>>;

    /// Share of all interactions per product.
    async fn interaction_popularity(&self) -> Result<HashMap<String, f64>>;
}

/// Everything the engine and jobs read and write.
pub trait RecommendationStore: CatalogStore + InteractionStore {}

impl<T: CatalogStore + InteractionStore> RecommendationStore for T {}
