// ============================================
// Embedding Refresh Job (商品向量補全任務)
// ============================================
//
// Backfills embeddings for active products that have none yet.
//
// Workflow:
// 1. Fetch up to `max_products` active products without an embedding
// 2. Build the embedding document per product
// 3. Embed in batches of `batch_size` and write each vector back
//
// Usage:
//   recommendation-service --mode embedding-refresh

use crate::services::embedding::{product_text, EmbeddingProvider};
use crate::services::store::RecommendationStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddingRefreshStats {
    pub products_found: usize,
    pub embedded: usize,
    pub errors: usize,
    pub total_duration_ms: u64,
}

pub struct EmbeddingRefreshJob {
    store: Arc<dyn RecommendationStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_products: usize,
}

impl EmbeddingRefreshJob {
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
            max_products: 10_000,
        }
    }

    pub fn with_max_products(mut self, max_products: usize) -> Self {
        self.max_products = max_products;
        self
    }

    pub async fn run(&self) -> Result<EmbeddingRefreshStats> {
        let start_time = Instant::now();
        let products = self
            .store
            .products_missing_embedding(self.max_products)
            .await?;

        let mut stats = EmbeddingRefreshStats {
            products_found: products.len(),
            ..Default::default()
        };
        info!(count = products.len(), "Products missing embeddings");

        for (batch_idx, batch) in products.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(product_text).collect();

            let vectors = match self.embedder.embed_batch(&texts).await {
                Ok(vectors) if vectors.len() == batch.len() => vectors,
                Ok(vectors) => {
                    warn!(
                        batch = batch_idx + 1,
                        expected = batch.len(),
                        got = vectors.len(),
                        "Embedding count mismatch, skipping batch"
                    );
                    stats.errors += batch.len();
                    continue;
                }
                Err(e) => {
                    warn!(batch = batch_idx + 1, error = %e, "Embedding batch failed");
                    stats.errors += batch.len();
                    continue;
                }
            };

            for (product, vector) in batch.iter().zip(vectors) {
                match self.store.update_embedding(&product.product_id, &vector).await {
                    Ok(()) => stats.embedded += 1,
                    Err(e) => {
                        stats.errors += 1;
                        warn!(product_id = %product.product_id, error = %e, "Failed to store embedding");
                    }
                }
            }
        }

        stats.total_duration_ms = start_time.elapsed().as_millis() as u64;
        info!(
            embedded = stats.embedded,
            errors = stats.errors,
            duration_ms = stats.total_duration_ms,
            "Embedding refresh completed"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecommendationError;
    use crate::services::embedding::{HashEmbeddingProvider, MockEmbeddingProvider};
    use crate::services::recall::test_support::product;
    use crate::services::store::{CatalogStore, InMemoryStore};

    #[tokio::test]
    async fn test_backfills_missing_embeddings() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_product(product("p1", "Shoes", None, None)).await;
        store.insert_product(product("p2", "Bags", None, None)).await;
        store
            .insert_product(product("p3", "Bags", None, Some(vec![1.0, 0.0])))
            .await;

        let job = EmbeddingRefreshJob::new(store.clone(), Arc::new(HashEmbeddingProvider::new(8)), 1);
        let stats = job.run().await.unwrap();

        assert_eq!(stats.products_found, 2);
        assert_eq!(stats.embedded, 2);
        assert_eq!(stats.errors, 0);
        assert!(store.products_missing_embedding(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_counted_as_errors() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_product(product("p1", "Shoes", None, None)).await;
        store.insert_product(product("p2", "Bags", None, None)).await;

        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed_batch()
            .returning(|_| Err(RecommendationError::Embedding("service down".into())));

        let job = EmbeddingRefreshJob::new(store.clone(), Arc::new(embedder), 10);
        let stats = job.run().await.unwrap();

        assert_eq!(stats.embedded, 0);
        assert_eq!(stats.errors, 2);
        assert_eq!(store.products_missing_embedding(10).await.unwrap().len(), 2);
    }
}
