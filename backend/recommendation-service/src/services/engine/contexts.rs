use super::HybridRecommendationEngine;
use crate::error::{RecommendationError, Result};
use crate::models::{Candidate, Product, RecommendationContext, RecommendationResponse};
use crate::services::diversity::{apply_stock_filter, BusinessRuleFilter};
use crate::services::ranking::sort_by_score;
use crate::services::recall::{deduplicate_and_merge, RecallQuery};
use crate::services::rerank::query_from_user_context;
use crate::services::similarity::aggregate_embeddings;
use crate::utils::clamp_unit;
use futures::future::join_all;
use std::collections::HashSet;
use tracing::{debug, info, warn};

const HOMEPAGE_RERANK_CONTEXT: &str = "homepage recommendations";
const CART_FALLBACK_QUERY: &str = "Cart completion recommendations";

// ============================================
// 推薦入口 (Pipeline entry points)
// ============================================

impl HybridRecommendationEngine {
    /// Personalized homepage feed.
    ///
    /// Content (from the preference vector) and collaborative recall run
    /// concurrently. A user with neither gets min-max normalized
    /// popularity instead of the hybrid blend.
    pub async fn homepage(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<RecommendationResponse> {
        let limit = self.resolve_limit(limit)?;
        info!(user_id = %user_id, limit, "Homepage recommendation request");

        let preference = self.user_preference(user_id).await;
        let top_categories = preference
            .as_ref()
            .map(|p| p.top_categories.clone())
            .unwrap_or_default();
        let pref_embedding = preference
            .as_ref()
            .map(|p| p.embedding.clone())
            .filter(|e| self.accepts_embedding(e));

        // 1. Recall 召回
        let per_signal = (limit * 5) / 2;
        let no_exclude = HashSet::new();

        let content_recall = async {
            match &pref_embedding {
                Some(embedding) => {
                    self.recall
                        .recall(
                            &self.recall.content,
                            &RecallQuery::Embedding(embedding.clone()),
                            per_signal,
                            &no_exclude,
                        )
                        .await
                }
                None => Vec::new(),
            }
        };
        let user_query = RecallQuery::User(user_id.to_string());
        let collaborative_recall = self.recall.recall(
            &self.recall.collaborative,
            &user_query,
            per_signal,
            &no_exclude,
        );
        let (content, collaborative) = tokio::join!(content_recall, collaborative_recall);

        let has_user_data = pref_embedding.is_some() || !collaborative.is_empty();
        let (candidates, stats) = deduplicate_and_merge(vec![content, collaborative], &no_exclude);

        // 2. Score 打分
        let scored = if !candidates.is_empty() {
            self.scorer.score(candidates)
        } else {
            let popular = self.popular_fallback(limit * 2, &no_exclude).await;
            if has_user_data {
                self.scorer.score(popular)
            } else {
                debug!(user_id = %user_id, "Cold start, serving popularity");
                self.scorer.score_cold_start(popular)
            }
        };

        // 3. Rerank 重排
        let reranked = if self.reranker.is_enabled() {
            let query = query_from_user_context(Some(HOMEPAGE_RERANK_CONTEXT), &top_categories);
            self.reranker
                .rerank(&query, scored, self.rerank_top_k(limit))
                .await
        } else {
            scored
        };

        // 4. Business rules 業務規則
        let filtered =
            BusinessRuleFilter::new(self.config.homepage_diversity_cap).apply(reranked);

        let response = self.finalize(
            RecommendationContext::Homepage,
            Some(user_id),
            filtered,
            limit,
        );

        info!(
            user_id = %user_id,
            has_user_data,
            content = stats.content_count,
            collaborative = stats.collaborative_count,
            returned = response.recommendations.len(),
            "Homepage recommendations generated"
        );
        Ok(response)
    }

    /// Products similar to `product_id`. Unknown products yield an empty list.
    pub async fn similar_products(
        &self,
        product_id: &str,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<RecommendationResponse> {
        let limit = self.resolve_limit(limit)?;

        let source = match self.store.get_product(product_id).await {
            Ok(Some(product)) => product,
            Ok(None) => {
                debug!(product_id = %product_id, "Unknown product, returning empty list");
                return Ok(RecommendationResponse::empty(
                    RecommendationContext::ProductPage,
                    user_id.map(str::to_string),
                ));
            }
            Err(e) => {
                warn!("Failed to load product {}: {}", product_id, e);
                return Ok(RecommendationResponse::empty(
                    RecommendationContext::ProductPage,
                    user_id.map(str::to_string),
                ));
            }
        };

        let exclude: HashSet<String> = [product_id.to_string()].into_iter().collect();

        let primary_recall = async {
            match self.product_embedding(&source) {
                Some(embedding) => {
                    self.recall
                        .recall(
                            &self.recall.content,
                            &RecallQuery::Embedding(embedding.to_vec()),
                            limit * 4,
                            &exclude,
                        )
                        .await
                }
                None => {
                    self.recall
                        .recall(
                            &self.recall.category,
                            &RecallQuery::Category(Some(source.category.clone())),
                            limit * 2,
                            &exclude,
                        )
                        .await
                }
            }
        };
        let product_query = RecallQuery::Product(product_id.to_string());
        let co_purchase_recall = self.recall.recall(
            &self.recall.co_purchase,
            &product_query,
            limit,
            &exclude,
        );
        let (primary, co_purchased) = tokio::join!(primary_recall, co_purchase_recall);

        let (mut candidates, _) = deduplicate_and_merge(vec![primary, co_purchased], &exclude);
        if candidates.is_empty() {
            candidates = self.popular_fallback(limit * 2, &exclude).await;
        }

        let scored = self.scorer.score(candidates);
        let reranked = if self.reranker.is_enabled() {
            let query = format!("{} {}", source.name, source.category);
            self.reranker
                .rerank(&query, scored, self.rerank_top_k(limit))
                .await
        } else {
            scored
        };

        let response = self.finalize(
            RecommendationContext::ProductPage,
            user_id,
            apply_stock_filter(reranked),
            limit,
        );
        info!(
            product_id = %product_id,
            returned = response.recommendations.len(),
            "Similar products generated"
        );
        Ok(response)
    }

    /// Complements for a cart. An empty cart is rejected before any recall.
    pub async fn cart(
        &self,
        user_id: Option<&str>,
        cart_product_ids: &[String],
        limit: Option<usize>,
    ) -> Result<RecommendationResponse> {
        if cart_product_ids.is_empty() {
            return Err(RecommendationError::InvalidInput(
                "cart_product_ids must not be empty".to_string(),
            ));
        }
        let limit = self.resolve_limit(limit)?;
        let exclude: HashSet<String> = cart_product_ids.iter().cloned().collect();

        let cart_products = match self.store.get_active_products(cart_product_ids).await {
            Ok(products) => products,
            Err(e) => {
                warn!("Failed to load cart products: {}", e);
                Vec::new()
            }
        };
        let aggregated = aggregate_cart_embedding(&cart_products, |e| self.accepts_embedding(e));
        let categories = distinct_categories(&cart_products);

        let content_recall = async {
            if aggregated.is_empty() {
                return Vec::new();
            }
            self.recall
                .recall(
                    &self.recall.content,
                    &RecallQuery::Embedding(aggregated.clone()),
                    limit * 4,
                    &exclude,
                )
                .await
        };
        let co_purchase_recall = join_all(
            cart_product_ids
                .iter()
                .take(self.config.cart_co_purchase_seeds)
                .map(|pid| {
                    let query = RecallQuery::Product(pid.clone());
                    let exclude = &exclude;
                    async move {
                        self.recall
                            .recall(&self.recall.co_purchase, &query, limit, exclude)
                            .await
                    }
                }),
        );
        let (content, co_purchased) = tokio::join!(content_recall, co_purchase_recall);

        let mut lists = vec![content];
        lists.extend(co_purchased);
        let (mut candidates, stats) = deduplicate_and_merge(lists, &exclude);
        if candidates.is_empty() {
            candidates = self.popular_fallback(limit * 2, &exclude).await;
        }

        let scored = self.scorer.score(candidates);
        let reranked = if self.reranker.is_enabled() {
            let query = if categories.is_empty() {
                CART_FALLBACK_QUERY.to_string()
            } else {
                format!("Products complementary to {}", categories.join(", "))
            };
            self.reranker
                .rerank(&query, scored, self.rerank_top_k(limit))
                .await
        } else {
            scored
        };

        let response = self.finalize(
            RecommendationContext::Cart,
            user_id,
            apply_stock_filter(reranked),
            limit,
        );
        info!(
            cart_size = cart_product_ids.len(),
            content = stats.content_count,
            co_purchase = stats.co_purchase_count,
            returned = response.recommendations.len(),
            "Cart recommendations generated"
        );
        Ok(response)
    }

    /// Co-purchased items first; short lists are padded with content-similar
    /// items (category popularity when the product has no embedding). No rerank.
    pub async fn frequently_bought_together(
        &self,
        product_id: &str,
        limit: Option<usize>,
    ) -> Result<RecommendationResponse> {
        let limit = self.resolve_limit(limit)?;
        let mut exclude: HashSet<String> = [product_id.to_string()].into_iter().collect();

        let co_purchased = self
            .recall
            .recall(
                &self.recall.co_purchase,
                &RecallQuery::Product(product_id.to_string()),
                limit * 2,
                &exclude,
            )
            .await;

        let mut chosen: Vec<Candidate> = apply_stock_filter(co_purchased);
        chosen.truncate(limit);
        normalize_by_max(&mut chosen);

        if chosen.len() < limit {
            let needed = limit - chosen.len();
            exclude.extend(chosen.iter().map(|c| c.product_id.clone()));

            let source = match self.store.get_product(product_id).await {
                Ok(source) => source,
                Err(e) => {
                    warn!("Failed to load product {}: {}", product_id, e);
                    None
                }
            };
            let floor = chosen.last().map(|c| c.score).unwrap_or(1.0);
            let padding = self.padding(source.as_ref(), needed, &exclude).await;

            debug!(
                product_id = %product_id,
                co_purchased = chosen.len(),
                padded = padding.len(),
                "Padding frequently bought together"
            );

            chosen.extend(padding.into_iter().map(|mut c| {
                c.score = clamp_unit(c.score) * floor;
                c
            }));
        }

        Ok(self.finalize(
            RecommendationContext::FrequentlyBoughtTogether,
            None,
            chosen,
            limit,
        ))
    }

    async fn padding(
        &self,
        source: Option<&Product>,
        needed: usize,
        exclude: &HashSet<String>,
    ) -> Vec<Candidate> {
        let fetch = needed * 2;
        let pool = match source {
            Some(product) => match self.product_embedding(product) {
                Some(embedding) => {
                    self.recall
                        .recall(
                            &self.recall.content,
                            &RecallQuery::Embedding(embedding.to_vec()),
                            fetch,
                            exclude,
                        )
                        .await
                }
                None => {
                    self.recall
                        .recall(
                            &self.recall.category,
                            &RecallQuery::Category(Some(product.category.clone())),
                            fetch,
                            exclude,
                        )
                        .await
                }
            },
            None => {
                self.recall
                    .recall(
                        &self.recall.category,
                        &RecallQuery::Category(None),
                        fetch,
                        exclude,
                    )
                    .await
            }
        };

        let mut padding: Vec<Candidate> = apply_stock_filter(pool)
            .into_iter()
            .filter(|c| !exclude.contains(&c.product_id))
            .collect();
        padding.truncate(needed);
        padding
    }

    /// Hybrid text + embedding product search.
    pub async fn search(
        &self,
        query: &str,
        user_id: Option<&str>,
        category: Option<&str>,
        limit: Option<usize>,
    ) -> Result<RecommendationResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RecommendationError::InvalidInput(
                "search query must not be empty".to_string(),
            ));
        }
        let limit = self.resolve_limit(limit)?;

        let user_categories = match user_id {
            Some(uid) => self
                .user_preference(uid)
                .await
                .map(|p| p.top_categories)
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let query_embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(query).await {
                Ok(embedding) => Some(embedding),
                Err(e) => {
                    warn!("Query embedding failed, using text scores only: {}", e);
                    None
                }
            },
            None => None,
        };

        let recall_query = RecallQuery::Text {
            query: query.to_string(),
            category: category.map(str::to_string),
            user_categories,
            query_embedding,
        };
        let candidates = self
            .recall
            .recall(&self.recall.search, &recall_query, limit * 3, &HashSet::new())
            .await;

        let scored = self.scorer.score(candidates);
        let reranked = if self.reranker.is_enabled() {
            self.reranker
                .rerank(query, scored, self.rerank_top_k(limit))
                .await
        } else {
            scored
        };

        let filtered =
            BusinessRuleFilter::new(self.config.search_diversity_cap).apply(reranked);
        let response = self.finalize(RecommendationContext::Search, user_id, filtered, limit);

        info!(
            query = %query,
            returned = response.recommendations.len(),
            "Search completed"
        );
        Ok(response)
    }
}

/// Mean of the cart embeddings `accepts` allows, normalized. Vectors whose
/// length differs from the first accepted one are skipped.
fn aggregate_cart_embedding(products: &[Product], accepts: impl Fn(&[f32]) -> bool) -> Vec<f32> {
    let mut vectors: Vec<Vec<f32>> = Vec::new();
    for embedding in products
        .iter()
        .filter_map(|p| p.usable_embedding())
        .filter(|e| accepts(*e))
    {
        if vectors.first().map_or(true, |first| first.len() == embedding.len()) {
            vectors.push(embedding.to_vec());
        }
    }
    aggregate_embeddings(&vectors, None)
}

fn distinct_categories(products: &[Product]) -> Vec<String> {
    let mut seen = HashSet::new();
    products
        .iter()
        .map(|p| p.category.clone())
        .filter(|c| !c.is_empty() && seen.insert(c.clone()))
        .collect()
}

/// Divide by the list maximum; used where only one signal is present.
fn normalize_by_max(candidates: &mut [Candidate]) {
    let max = candidates
        .iter()
        .map(|c| c.score.max(0.0))
        .fold(0.0f32, f32::max);
    let max = if max > 0.0 { max } else { 1.0 };
    for c in candidates.iter_mut() {
        c.score = clamp_unit(c.score.max(0.0) / max);
    }
    sort_by_score(candidates);
}
