// ============================================
// Postgres store (recommender schema)
// ============================================
//
// Tables:
//   recommender.product_embeddings         catalog + embedding (JSON text)
//   recommender.user_interactions          append-only interaction log
//   recommender.user_preference_embeddings one row per user
//   public.order_items                     synced order lines
//
// Interaction types are stored as the upper-case `interactiontype` enum;
// reads compare on lower(interaction_type::text).

use super::{CatalogStore, InteractionStore, TextMatch};
use crate::error::{RecommendationError, Result};
use crate::models::{HistoryEntry, Interaction, InteractionType, Product, UserPreference};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

type ProductRow = (
    String,
    String,
    Option<String>,
    Option<i32>,
    Option<i32>,
    bool,
    Option<f64>,
    Option<String>,
);

const PRODUCT_COLUMNS: &str = r#"
    pe.external_product_id,
    pe.name,
    pe.category,
    pe.price_cents,
    pe.stock,
    pe.is_active,
    pe.popularity_score::float8,
    pe.embedding::text
"#;

fn parse_embedding(product_id: &str, raw: Option<String>) -> Option<Vec<f32>> {
    let raw = raw?;
    match serde_json::from_str::<Vec<f32>>(&raw) {
        Ok(v) if !v.is_empty() => Some(v),
        Ok(_) => None,
        Err(e) => {
            warn!(product_id = %product_id, error = %e, "Unparseable embedding, treating as missing");
            None
        }
    }
}

fn product_from_row(row: ProductRow) -> Product {
    let (product_id, name, category, price_cents, stock, is_active, popularity, embedding) = row;
    let embedding = parse_embedding(&product_id, embedding);
    Product {
        product_id,
        name,
        category: category.unwrap_or_else(|| "Unknown".to_string()),
        price: price_cents.unwrap_or(0) as f64 / 100.0,
        stock,
        is_active,
        popularity_score: popularity.map(|p| p as f32),
        description: None,
        image_url: None,
        embedding,
    }
}

fn to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}

fn type_names(types: &[InteractionType]) -> Vec<String> {
    types.iter().map(|t| t.as_str().to_string()).collect()
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    async fn fetch_products<'q>(
        &self,
        query: sqlx::query::QueryAs<'q, sqlx::Postgres, ProductRow, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<Product>> {
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(product_from_row).collect())
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>> {
        let sql = format!(
            "SELECT {} FROM recommender.product_embeddings pe WHERE pe.external_product_id = $1",
            PRODUCT_COLUMNS
        );
        let products = self
            .fetch_products(sqlx::query_as(&sql).bind(product_id))
            .await?;
        Ok(products.into_iter().next())
    }

    async fn get_active_products(&self, product_ids: &[String]) -> Result<Vec<Product>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM recommender.product_embeddings pe \
             WHERE pe.external_product_id = ANY($1) AND pe.is_active = true",
            PRODUCT_COLUMNS
        );
        let found = self
            .fetch_products(sqlx::query_as(&sql).bind(product_ids))
            .await?;

        // Preserve caller order
        let mut by_id: HashMap<String, Product> = found
            .into_iter()
            .map(|p| (p.product_id.clone(), p))
            .collect();
        Ok(product_ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn embedded_products(
        &self,
        exclude_ids: &[String],
        pool_size: usize,
    ) -> Result<Vec<Product>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM recommender.product_embeddings pe
            WHERE pe.is_active = true
            AND pe.embedding IS NOT NULL
            AND pe.external_product_id != ALL($1)
            ORDER BY COALESCE(pe.popularity_score, 0.5) DESC, pe.id
            LIMIT $2
            "#,
            PRODUCT_COLUMNS
        );
        self.fetch_products(
            sqlx::query_as(&sql)
                .bind(exclude_ids)
                .bind(pool_size as i64),
        )
        .await
    }

    async fn popular_products(
        &self,
        category: Option<&str>,
        exclude_ids: &[String],
        limit: usize,
    ) -> Result<Vec<Product>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM recommender.product_embeddings pe
            WHERE pe.is_active = true
            AND pe.stock > 0
            AND ($1::text IS NULL OR pe.category = $1)
            AND pe.external_product_id != ALL($2)
            ORDER BY COALESCE(pe.popularity_score, 0.5) DESC, pe.id
            LIMIT $3
            "#,
            PRODUCT_COLUMNS
        );
        self.fetch_products(
            sqlx::query_as(&sql)
                .bind(category)
                .bind(exclude_ids)
                .bind(limit as i64),
        )
        .await
    }

    async fn orders_containing(&self, product_id: &str) -> Result<Vec<Vec<String>>> {
        let rows = sqlx::query_as::<_, (String, Vec<String>)>(
            r#"
            WITH source_orders AS (
                SELECT DISTINCT oi."orderId"
                FROM public.order_items oi
                WHERE oi."productId" = $1
            )
            SELECT oi."orderId"::text, array_agg(oi."productId"::text)
            FROM public.order_items oi
            JOIN source_orders so ON oi."orderId" = so."orderId"
            GROUP BY oi."orderId"
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(product_id = %product_id, orders = rows.len(), "Loaded co-purchase orders");
        Ok(rows.into_iter().map(|(_, items)| items).collect())
    }

    async fn text_search(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TextMatch>> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, Option<i32>, Option<i32>, bool, Option<f64>, Option<String>, f32, f32)>(
            r#"
            SELECT
                pe.external_product_id,
                pe.name,
                pe.category,
                pe.price_cents,
                pe.stock,
                pe.is_active,
                pe.popularity_score::float8,
                pe.embedding::text,
                ts_rank(pe.search_vector, plainto_tsquery('english', $1))::float4 AS ts_score,
                similarity(pe.name, $1)::float4 AS trgm_score
            FROM recommender.product_embeddings pe
            WHERE pe.is_active = true
            AND pe.stock > 0
            AND ($2::text IS NULL OR pe.category = $2)
            AND (
                pe.search_vector @@ plainto_tsquery('english', $1)
                OR similarity(pe.name, $1) > 0.1
            )
            ORDER BY
                (ts_rank(pe.search_vector, plainto_tsquery('english', $1)) * 2
                 + similarity(pe.name, $1)) DESC
            LIMIT $3
            "#,
        )
        .bind(query)
        .bind(category)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, cat, price, stock, active, pop, emb, ts_rank, trigram)| TextMatch {
                product: product_from_row((id, name, cat, price, stock, active, pop, emb)),
                ts_rank,
                trigram,
            })
            .collect())
    }

    async fn products_missing_embedding(&self, limit: usize) -> Result<Vec<Product>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM recommender.product_embeddings pe
            WHERE pe.is_active = true
            AND pe.embedding IS NULL
            ORDER BY pe.id
            LIMIT $1
            "#,
            PRODUCT_COLUMNS
        );
        self.fetch_products(sqlx::query_as(&sql).bind(limit as i64))
            .await
    }

    async fn update_embedding(&self, product_id: &str, embedding: &[f32]) -> Result<()> {
        let payload = serde_json::to_string(embedding)?;
        let result = sqlx::query(
            r#"
            UPDATE recommender.product_embeddings
            SET embedding = $2::json,
                embedding_updated_at = NOW(),
                updated_at = NOW()
            WHERE external_product_id = $1
            "#,
        )
        .bind(product_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RecommendationError::Store(format!(
                "product not found: {}",
                product_id
            )));
        }
        Ok(())
    }

    async fn active_product_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT external_product_id FROM recommender.product_embeddings WHERE is_active = true",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl InteractionStore for PgStore {
    async fn record_interaction(&self, interaction: &Interaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recommender.user_interactions
            (external_user_id, external_product_id, interaction_type, search_query,
             recommendation_context, recommendation_position, recommendation_request_id,
             session_id, created_at)
            VALUES ($1, $2, CAST(UPPER($3) AS recommender.interactiontype), $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&interaction.user_id)
        .bind(&interaction.product_id)
        .bind(interaction.interaction_type.as_str())
        .bind(&interaction.search_query)
        .bind(&interaction.recommendation_context)
        .bind(interaction.recommendation_position.map(|p| p as i32))
        .bind(&interaction.recommendation_request_id)
        .bind(&interaction.session_id)
        .bind(interaction.created_at.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn user_product_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT DISTINCT external_product_id
            FROM recommender.user_interactions
            WHERE external_user_id = $1
            AND external_product_id IS NOT NULL
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn co_interactions(
        &self,
        product_ids: &[String],
        exclude_user: &str,
    ) -> Result<Vec<(String, String)>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT external_user_id, external_product_id
            FROM recommender.user_interactions
            WHERE external_product_id = ANY($1)
            AND external_user_id != $2
            ORDER BY id
            "#,
        )
        .bind(product_ids)
        .bind(exclude_user)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn interactions_by_users(
        &self,
        user_ids: &[String],
        types: &[InteractionType],
    ) -> Result<Vec<String>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT external_product_id
            FROM recommender.user_interactions
            WHERE external_user_id = ANY($1)
            AND lower(interaction_type::text) = ANY($2)
            AND external_product_id IS NOT NULL
            ORDER BY created_at, id
            "#,
        )
        .bind(user_ids)
        .bind(type_names(types))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn user_history(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, (String, NaiveDateTime, String, String, Option<String>, Option<i32>, Option<i32>, bool, Option<f64>, Option<String>)>(
            r#"
            SELECT
                lower(ui.interaction_type::text),
                ui.created_at,
                pe.external_product_id,
                pe.name,
                pe.category,
                pe.price_cents,
                pe.stock,
                pe.is_active,
                pe.popularity_score::float8,
                pe.embedding::text
            FROM recommender.user_interactions ui
            JOIN recommender.product_embeddings pe
                ON ui.external_product_id = pe.external_product_id
            WHERE ui.external_user_id = $1
            AND ui.created_at >= $2
            ORDER BY ui.created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(since.naive_utc())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (kind, created_at, id, name, cat, price, stock, active, pop, emb) in rows {
            let interaction_type = match kind.parse::<InteractionType>() {
                Ok(t) => t,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Skipping interaction with unknown type");
                    continue;
                }
            };
            entries.push(HistoryEntry {
                interaction_type,
                created_at: to_utc(created_at),
                product: product_from_row((id, name, cat, price, stock, active, pop, emb)),
            });
        }
        Ok(entries)
    }

    async fn get_preference(&self, user_id: &str) -> Result<Option<UserPreference>> {
        let row = sqlx::query_as::<_, (Option<String>, Option<String>, Option<f64>, Option<f64>, Option<i32>, Option<NaiveDateTime>, NaiveDateTime)>(
            r#"
            SELECT
                embedding::text,
                top_categories::text,
                avg_price_min::float8,
                avg_price_max::float8,
                interaction_count,
                last_active_at,
                updated_at
            FROM recommender.user_preference_embeddings
            WHERE external_user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((embedding, categories, price_min, price_max, count, last_active, updated)) = row
        else {
            return Ok(None);
        };

        let embedding: Vec<f32> = match embedding {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        let top_categories: Vec<String> = match categories {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };

        Ok(Some(UserPreference {
            user_id: user_id.to_string(),
            embedding,
            top_categories,
            avg_price_min: price_min,
            avg_price_max: price_max,
            interaction_count: count.unwrap_or(0).max(0) as usize,
            last_active_at: to_utc(last_active.unwrap_or(updated)),
            updated_at: to_utc(updated),
        }))
    }

    async fn upsert_preference(&self, preference: &UserPreference) -> Result<()> {
        let embedding = serde_json::to_string(&preference.embedding)?;
        let categories = serde_json::to_string(&preference.top_categories)?;

        sqlx::query(
            r#"
            INSERT INTO recommender.user_preference_embeddings
            (external_user_id, embedding, top_categories, avg_price_min, avg_price_max,
             interaction_count, created_at, updated_at, last_active_at)
            VALUES ($1, $2::json, $3::json, $4, $5, $6, $7, $7, $8)
            ON CONFLICT (external_user_id) DO UPDATE SET
                embedding = EXCLUDED.embedding,
                top_categories = EXCLUDED.top_categories,
                avg_price_min = EXCLUDED.avg_price_min,
                avg_price_max = EXCLUDED.avg_price_max,
                interaction_count = EXCLUDED.interaction_count,
                updated_at = EXCLUDED.updated_at,
                last_active_at = EXCLUDED.last_active_at
            "#,
        )
        .bind(&preference.user_id)
        .bind(embedding)
        .bind(categories)
        .bind(preference.avg_price_min)
        .bind(preference.avg_price_max)
        .bind(preference.interaction_count as i32)
        .bind(preference.updated_at.naive_utc())
        .bind(preference.last_active_at.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_users(
        &self,
        since: DateTime<Utc>,
        min_interactions: usize,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT external_user_id, COUNT(*) AS interaction_count
            FROM recommender.user_interactions
            WHERE created_at >= $1
            GROUP BY external_user_id
            HAVING COUNT(*) >= $2
            ORDER BY COUNT(*) DESC, external_user_id
            "#,
        )
        .bind(since.naive_utc())
        .bind(min_interactions as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id, _)| id).collect())
    }

    async fn users_with_history(
        &self,
        before: DateTime<Utc>,
        min_interactions: usize,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT external_user_id
            FROM recommender.user_interactions
            WHERE created_at < $1
            GROUP BY external_user_id
            HAVING COUNT(*) >= $2
            ORDER BY external_user_id
            "#,
        )
        .bind(before.naive_utc())
        .bind(min_interactions as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn held_out_interactions(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, HashSet<String>>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT external_user_id, external_product_id
            FROM recommender.user_interactions
            WHERE created_at >= $1
            AND external_product_id IS NOT NULL
            AND lower(interaction_type::text) IN ('purchase', 'cart_add', 'view')
            "#,
        )
        .bind(since.naive_utc())
        .fetch_all(&self.pool)
        .await?;

        let mut out: HashMap<String, HashSet<String>> = HashMap::new();
        for (user_id, product_id) in rows {
            out.entry(user_id).or_default().insert(product_id);
        }
        Ok(out)
    }

    async fn interaction_popularity(&self) -> Result<HashMap<String, f64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT external_product_id, COUNT(*)
            FROM recommender.user_interactions
            WHERE external_product_id IS NOT NULL
            GROUP BY external_product_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = rows.iter().map(|(_, c)| c).sum();
        if total == 0 {
            return Ok(HashMap::new());
        }
        Ok(rows
            .into_iter()
            .map(|(id, c)| (id, c as f64 / total as f64))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_from_row_defaults() {
        let product = product_from_row((
            "sku-1".into(),
            "Desk".into(),
            None,
            Some(12999),
            None,
            true,
            None,
            Some("[0.1, 0.2]".into()),
        ));
        assert_eq!(product.category, "Unknown");
        assert!((product.price - 129.99).abs() < 1e-9);
        assert_eq!(product.embedding, Some(vec![0.1, 0.2]));
    }

    #[test]
    fn test_parse_embedding_rejects_empty_and_garbage() {
        assert!(parse_embedding("p", Some("[]".into())).is_none());
        assert!(parse_embedding("p", Some("not json".into())).is_none());
        assert!(parse_embedding("p", None).is_none());
    }
}
