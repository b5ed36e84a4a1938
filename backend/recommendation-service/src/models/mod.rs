use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Catalog product as read from the product store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub product_id: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub stock: Option<i32>,
    pub is_active: bool,
    pub popularity_score: Option<f32>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Product {
    /// Empty embeddings count as missing.
    pub fn usable_embedding(&self) -> Option<&[f32]> {
        match self.embedding.as_deref() {
            Some(v) if !v.is_empty() => Some(v),
            _ => None,
        }
    }
}

/// 候選來源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Content,       // 向量相似
    Collaborative, // 相似用戶
    CoPurchase,    // 同單購買
    Popularity,    // 熱門兜底
    Category,      // 同類目兜底
    Search,        // 文本檢索
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Content => "content",
            Signal::Collaborative => "collaborative",
            Signal::CoPurchase => "co_purchase",
            Signal::Popularity => "popularity",
            Signal::Category => "category",
            Signal::Search => "search",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scored product proposal flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub product_id: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub stock: Option<i32>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub score: f32,
    pub signal: Signal,
    pub content_score: Option<f32>,
    pub collaborative_score: Option<f32>,
    pub popularity_score: Option<f32>,
    pub text_score: Option<f32>,
    pub rerank_score: Option<f32>,
}

impl Candidate {
    pub fn from_product(product: &Product, signal: Signal, score: f32) -> Self {
        Self {
            product_id: product.product_id.clone(),
            name: product.name.clone(),
            category: product.category.clone(),
            price: product.price,
            stock: product.stock,
            description: product.description.clone(),
            image_url: product.image_url.clone(),
            score,
            signal,
            content_score: None,
            collaborative_score: None,
            popularity_score: product.popularity_score,
            text_score: None,
            rerank_score: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    View,
    CartAdd,
    CartRemove,
    Purchase,
    WishlistAdd,
    Search,
    RecommendationClick,
    RecommendationView,
}

impl InteractionType {
    /// Preference weight before recency decay.
    pub fn base_weight(&self) -> f64 {
        match self {
            InteractionType::Purchase => 5.0,
            InteractionType::CartAdd => 3.0,
            InteractionType::WishlistAdd => 2.0,
            InteractionType::RecommendationClick => 1.5,
            InteractionType::View => 1.0,
            InteractionType::RecommendationView => 0.5,
            InteractionType::Search => 0.5,
            InteractionType::CartRemove => -1.0,
        }
    }

    /// Interactions that count as intent in the similar-user walk.
    pub fn is_high_intent(&self) -> bool {
        matches!(
            self,
            InteractionType::Purchase | InteractionType::CartAdd | InteractionType::WishlistAdd
        )
    }

    pub fn requires_product(&self) -> bool {
        !matches!(self, InteractionType::Search)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::View => "view",
            InteractionType::CartAdd => "cart_add",
            InteractionType::CartRemove => "cart_remove",
            InteractionType::Purchase => "purchase",
            InteractionType::WishlistAdd => "wishlist_add",
            InteractionType::Search => "search",
            InteractionType::RecommendationClick => "recommendation_click",
            InteractionType::RecommendationView => "recommendation_view",
        }
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "view" => Ok(InteractionType::View),
            "cart_add" => Ok(InteractionType::CartAdd),
            "cart_remove" => Ok(InteractionType::CartRemove),
            "purchase" => Ok(InteractionType::Purchase),
            "wishlist_add" => Ok(InteractionType::WishlistAdd),
            "search" => Ok(InteractionType::Search),
            "recommendation_click" => Ok(InteractionType::RecommendationClick),
            "recommendation_view" => Ok(InteractionType::RecommendationView),
            other => Err(format!("unknown interaction type: {}", other)),
        }
    }
}

/// Append-only interaction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: String,
    pub product_id: Option<String>,
    pub interaction_type: InteractionType,
    pub created_at: DateTime<Utc>,
    pub recommendation_context: Option<String>,
    pub recommendation_position: Option<u32>,
    pub recommendation_request_id: Option<String>,
    pub search_query: Option<String>,
    pub session_id: Option<String>,
}

impl Interaction {
    pub fn new(
        user_id: impl Into<String>,
        product_id: Option<String>,
        interaction_type: InteractionType,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            product_id,
            interaction_type,
            created_at: Utc::now(),
            recommendation_context: None,
            recommendation_position: None,
            recommendation_request_id: None,
            search_query: None,
            session_id: None,
        }
    }
}

/// An interaction joined to the product it touched.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub interaction_type: InteractionType,
    pub created_at: DateTime<Utc>,
    pub product: Product,
}

/// Aggregated preference record, one per user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPreference {
    pub user_id: String,
    pub embedding: Vec<f32>,
    pub top_categories: Vec<String>,
    pub avg_price_min: Option<f64>,
    pub avg_price_max: Option<f64>,
    pub interaction_count: usize,
    pub last_active_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationContext {
    Homepage,
    ProductPage,
    Cart,
    FrequentlyBoughtTogether,
    Search,
}

impl RecommendationContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationContext::Homepage => "homepage",
            RecommendationContext::ProductPage => "product_page",
            RecommendationContext::Cart => "cart",
            RecommendationContext::FrequentlyBoughtTogether => "frequently_bought_together",
            RecommendationContext::Search => "search",
        }
    }
}

impl fmt::Display for RecommendationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedProduct {
    pub product_id: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub image_url: Option<String>,
    pub score: f32,
    pub position: usize,
    pub signal: Signal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub request_id: Uuid,
    pub context: RecommendationContext,
    pub user_id: Option<String>,
    pub recommendations: Vec<RecommendedProduct>,
    pub generated_at: DateTime<Utc>,
}

impl RecommendationResponse {
    pub fn empty(context: RecommendationContext, user_id: Option<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            context,
            user_id,
            recommendations: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn product_ids(&self) -> Vec<String> {
        self.recommendations
            .iter()
            .map(|r| r.product_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecallStats {
    pub content_count: usize,
    pub collaborative_count: usize,
    pub co_purchase_count: usize,
    pub popularity_count: usize,
    pub search_count: usize,
    pub total_candidates: usize,
}

impl RecallStats {
    pub fn record(&mut self, signal: Signal, count: usize) {
        match signal {
            Signal::Content => self.content_count += count,
            Signal::Collaborative => self.collaborative_count += count,
            Signal::CoPurchase => self.co_purchase_count += count,
            Signal::Popularity | Signal::Category => self.popularity_count += count,
            Signal::Search => self.search_count += count,
        }
    }
}
