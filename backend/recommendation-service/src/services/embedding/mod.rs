//! Text → vector collaborators.
//!
//! `HttpEmbeddingProvider` calls the external embedding service.
//! `HashEmbeddingProvider` is a deterministic feature-hashing stand-in for
//! local runs and tests.

use crate::error::{RecommendationError, Result};
use crate::models::Product;
use crate::services::similarity::l2_normalize;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tracing::debug;

const DESCRIPTION_MAX_CHARS: usize = 500;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

/// Document used to embed a product.
///
/// `name | Category: c | description (≤500 chars) | price band`
pub fn product_text(product: &Product) -> String {
    let mut parts = vec![product.name.clone()];

    if !product.category.is_empty() {
        parts.push(format!("Category: {}", product.category));
    }

    if let Some(desc) = product.description.as_deref().filter(|d| !d.is_empty()) {
        parts.push(truncate_chars(desc, DESCRIPTION_MAX_CHARS));
    }

    parts.push(price_band(product.price).to_string());
    parts.join(" | ")
}

pub fn price_band(price: f64) -> &'static str {
    if price < 25.0 {
        "Budget friendly"
    } else if price < 100.0 {
        "Mid-range"
    } else if price < 500.0 {
        "Premium"
    } else {
        "Luxury"
    }
}

/// Truncate to `max` chars, appending "..." when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// JSON client for the embedding service (`POST {base}/embed`).
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    dimension: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: impl Into<String>, dimension: usize, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| RecommendationError::Embedding(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| RecommendationError::Embedding("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embed", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest { texts })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RecommendationError::Embedding(e.to_string()))?;

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RecommendationError::Embedding(e.to_string()))?;

        if body.embeddings.len() != texts.len() {
            return Err(RecommendationError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }
        if let Some(bad) = body.embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(RecommendationError::Embedding(format!(
                "expected dimension {}, got {}",
                self.dimension,
                bad.len()
            )));
        }

        debug!(count = texts.len(), "Embedded batch");
        Ok(body.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Signed feature hashing over lower-cased tokens, L2-normalized.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn hash_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        l2_normalize(&v)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.hash_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.hash_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::similarity::cosine_similarity;

    fn product(price: f64, description: Option<String>) -> Product {
        Product {
            product_id: "p1".into(),
            name: "Trail Runner".into(),
            category: "Shoes".into(),
            price,
            stock: Some(3),
            is_active: true,
            popularity_score: None,
            description,
            image_url: None,
            embedding: None,
        }
    }

    #[test]
    fn test_price_bands() {
        assert_eq!(price_band(10.0), "Budget friendly");
        assert_eq!(price_band(25.0), "Mid-range");
        assert_eq!(price_band(499.99), "Premium");
        assert_eq!(price_band(500.0), "Luxury");
    }

    #[test]
    fn test_product_text() {
        let text = product_text(&product(80.0, Some("Light and grippy".into())));
        assert_eq!(
            text,
            "Trail Runner | Category: Shoes | Light and grippy | Mid-range"
        );
    }

    #[test]
    fn test_product_text_truncates_description() {
        let long = "x".repeat(600);
        let text = product_text(&product(10.0, Some(long)));
        assert!(text.contains(&format!("{}...", "x".repeat(500))));
        assert!(!text.contains(&"x".repeat(501)));
    }

    #[tokio::test]
    async fn test_hash_embedding_is_deterministic() {
        let provider = HashEmbeddingProvider::new(384);
        let a = provider.embed("red running shoes").await.unwrap();
        let b = provider.embed("red running shoes").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);

        let related = provider.embed("running shoes").await.unwrap();
        let unrelated = provider.embed("ceramic teapot").await.unwrap();
        assert!(cosine_similarity(&a, &related) > cosine_similarity(&a, &unrelated));
    }
}
