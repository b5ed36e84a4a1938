use super::Result;
use crate::config::PreferenceConfig;
use crate::models::{HistoryEntry, UserPreference};
use crate::services::cache::{preference_key, Cache};
use crate::services::similarity::aggregate_embeddings;
use crate::services::store::RecommendationStore;
use crate::utils::recency_weight;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-user preference lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceState {
    /// No preference record yet.
    NoHistory,
    /// Record is current.
    Built,
    /// Interactions arrived after the last build.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Updated {
        interactions: usize,
        top_categories: Vec<String>,
    },
    /// No qualifying interactions; any existing record is left untouched.
    NoOp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub total_users: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Preference Builder (用戶偏好向量構建)
///
/// Weighted, recency-decayed mean of the embeddings of products a user
/// touched in the lookback window, L2-normalized, plus top categories and
/// the observed price range. The only writer of preference records.
pub struct PreferenceBuilder {
    store: Arc<dyn RecommendationStore>,
    cache: Arc<dyn Cache>,
    config: PreferenceConfig,
}

impl PreferenceBuilder {
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        cache: Arc<dyn Cache>,
        config: PreferenceConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &PreferenceConfig {
        &self.config
    }

    pub async fn state(&self, user_id: &str) -> Result<PreferenceState> {
        let Some(pref) = self.store.get_preference(user_id).await? else {
            return Ok(PreferenceState::NoHistory);
        };
        let newer = self.store.user_history(user_id, pref.updated_at).await?;
        if newer.iter().any(|e| e.created_at > pref.updated_at) {
            Ok(PreferenceState::Stale)
        } else {
            Ok(PreferenceState::Built)
        }
    }

    /// Rebuild one user's preference and swap it in with a single upsert.
    pub async fn build_user_preference(&self, user_id: &str) -> Result<BuildOutcome> {
        let now = Utc::now();
        let since = now - Duration::days(self.config.lookback_days);
        let history = self.store.user_history(user_id, since).await?;

        let Some(preference) = self.aggregate(user_id, &history, now) else {
            info!(user_id = %user_id, "No qualifying interactions, preference left unchanged");
            return Ok(BuildOutcome::NoOp);
        };

        self.store.upsert_preference(&preference).await?;
        self.cache.delete(&preference_key(user_id)).await;

        let leading: Vec<&String> = preference.top_categories.iter().take(3).collect();
        info!(
            user_id = %user_id,
            interactions = preference.interaction_count,
            top_categories = ?leading,
            "Updated user preference"
        );

        Ok(BuildOutcome::Updated {
            interactions: preference.interaction_count,
            top_categories: preference.top_categories,
        })
    }

    /// Pure aggregation over a newest-first history.
    pub fn aggregate(
        &self,
        user_id: &str,
        history: &[HistoryEntry],
        now: DateTime<Utc>,
    ) -> Option<UserPreference> {
        let mut vectors: Vec<Vec<f32>> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        let mut category_order: Vec<&str> = Vec::new();
        let mut category_counts: HashMap<&str, usize> = HashMap::new();
        let mut price_min: Option<f64> = None;
        let mut price_max: Option<f64> = None;
        let mut last_active: Option<DateTime<Utc>> = None;
        let mut dimension: Option<usize> = None;

        for entry in history {
            let Some(embedding) = entry.product.usable_embedding() else {
                continue;
            };
            match dimension {
                Some(d) if d != embedding.len() => {
                    debug!(
                        user_id = %user_id,
                        product_id = %entry.product.product_id,
                        "Skipping embedding with mismatched dimension"
                    );
                    continue;
                }
                None => dimension = Some(embedding.len()),
                _ => {}
            }

            let days_old = (now - entry.created_at).num_days().max(0) as f64;
            let weight = entry.interaction_type.base_weight()
                * recency_weight(days_old, self.config.recency_decay_days);
            vectors.push(embedding.to_vec());
            weights.push(weight);

            let category = entry.product.category.as_str();
            if !category.is_empty() {
                let count = category_counts.entry(category).or_insert_with(|| {
                    category_order.push(category);
                    0
                });
                *count += 1;
            }

            if entry.product.price > 0.0 {
                price_min = Some(price_min.map_or(entry.product.price, |p| p.min(entry.product.price)));
                price_max = Some(price_max.map_or(entry.product.price, |p| p.max(entry.product.price)));
            }

            last_active = Some(last_active.map_or(entry.created_at, |t| t.max(entry.created_at)));
        }

        if vectors.is_empty() {
            return None;
        }

        let embedding = aggregate_embeddings(&vectors, Some(weights.as_slice()));

        let mut ranked: Vec<(&str, usize)> = category_order
            .into_iter()
            .map(|c| (c, category_counts.get(c).copied().unwrap_or(0)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        let top_categories = ranked
            .into_iter()
            .take(self.config.top_categories)
            .map(|(c, _)| c.to_string())
            .collect();

        Some(UserPreference {
            user_id: user_id.to_string(),
            embedding,
            top_categories,
            avg_price_min: price_min,
            avg_price_max: price_max,
            interaction_count: vectors.len(),
            last_active_at: last_active.unwrap_or(now),
            updated_at: now,
        })
    }

    /// Batch sweep over users active in the lookback window.
    pub async fn rebuild_active_users(&self) -> Result<SweepSummary> {
        let started = Instant::now();
        let since = Utc::now() - Duration::days(self.config.lookback_days);
        let users = self
            .store
            .active_users(since, self.config.batch_min_interactions)
            .await?;

        info!(user_count = users.len(), "Starting preference sweep");

        let mut summary = SweepSummary {
            total_users: users.len(),
            ..Default::default()
        };

        for batch in users.chunks(self.config.batch_size.max(1)) {
            for user_id in batch {
                match self.build_user_preference(user_id).await {
                    Ok(BuildOutcome::Updated { .. }) => summary.updated += 1,
                    Ok(BuildOutcome::NoOp) => summary.skipped += 1,
                    Err(e) => {
                        summary.errors += 1;
                        warn!(user_id = %user_id, error = %e, "Failed to update user preference");
                    }
                }
            }
        }

        info!(
            updated = summary.updated,
            skipped = summary.skipped,
            errors = summary.errors,
            duration_ms = started.elapsed().as_millis() as u64,
            "Preference sweep completed"
        );

        Ok(summary)
    }
}
