use super::{PreferenceBuilder, PreferenceBuilderError, Result};
use crate::models::{Interaction, InteractionType};
use crate::services::cache::{preference_key, Cache};
use crate::services::store::RecommendationStore;
use std::sync::Arc;
use tracing::{debug, warn};

pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRecordSummary {
    pub recorded: usize,
    pub failed: usize,
}

/// Interaction write path.
///
/// Appends to the interaction log, drops the cached preference so the next
/// read sees the stale record from the store, and optionally rebuilds it.
pub struct InteractionRecorder {
    store: Arc<dyn RecommendationStore>,
    cache: Arc<dyn Cache>,
    builder: Option<Arc<PreferenceBuilder>>,
}

impl InteractionRecorder {
    pub fn new(store: Arc<dyn RecommendationStore>, cache: Arc<dyn Cache>) -> Self {
        Self {
            store,
            cache,
            builder: None,
        }
    }

    /// Rebuild the user's preference right after each write.
    pub fn with_rebuild(mut self, builder: Arc<PreferenceBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn validate(interaction: &Interaction) -> Result<()> {
        if interaction.user_id.trim().is_empty() {
            return Err(PreferenceBuilderError::InvalidInteraction(
                "user_id is required".to_string(),
            ));
        }
        if interaction.interaction_type.requires_product()
            && interaction
                .product_id
                .as_deref()
                .map_or(true, |p| p.trim().is_empty())
        {
            return Err(PreferenceBuilderError::InvalidInteraction(format!(
                "product_id is required for {} interactions",
                interaction.interaction_type
            )));
        }
        if interaction.interaction_type == InteractionType::Search
            && interaction
                .search_query
                .as_deref()
                .map_or(true, |q| q.trim().is_empty())
        {
            return Err(PreferenceBuilderError::InvalidInteraction(
                "search_query is required for search interactions".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn record(&self, interaction: &Interaction) -> Result<()> {
        Self::validate(interaction)?;
        self.store.record_interaction(interaction).await?;
        self.cache.delete(&preference_key(&interaction.user_id)).await;

        debug!(
            user_id = %interaction.user_id,
            interaction_type = %interaction.interaction_type,
            "Interaction recorded"
        );

        if let Some(builder) = &self.builder {
            // the write already succeeded; a failed rebuild leaves the record stale
            if let Err(e) = builder.build_user_preference(&interaction.user_id).await {
                warn!(
                    user_id = %interaction.user_id,
                    error = %e,
                    "Preference rebuild after write failed"
                );
            }
        }
        Ok(())
    }

    pub async fn record_batch(&self, interactions: &[Interaction]) -> Result<BatchRecordSummary> {
        if interactions.len() > MAX_BATCH_SIZE {
            return Err(PreferenceBuilderError::InvalidInteraction(format!(
                "batch of {} exceeds the maximum of {}",
                interactions.len(),
                MAX_BATCH_SIZE
            )));
        }

        let mut summary = BatchRecordSummary::default();
        for interaction in interactions {
            match self.record(interaction).await {
                Ok(()) => summary.recorded += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(user_id = %interaction.user_id, error = %e, "Failed to record interaction");
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreferenceConfig;
    use crate::services::cache::NoopCache;
    use crate::services::recall::test_support::product;
    use crate::services::store::{InMemoryStore, InteractionStore};

    fn view(user: &str, product: &str) -> Interaction {
        Interaction::new(user, Some(product.to_string()), InteractionType::View)
    }

    #[test]
    fn test_validate() {
        assert!(InteractionRecorder::validate(&view("u1", "p1")).is_ok());

        let missing_product = Interaction::new("u1", None, InteractionType::Purchase);
        assert!(InteractionRecorder::validate(&missing_product).is_err());

        let mut search = Interaction::new("u1", None, InteractionType::Search);
        assert!(InteractionRecorder::validate(&search).is_err());
        search.search_query = Some("red shoes".into());
        assert!(InteractionRecorder::validate(&search).is_ok());
    }

    #[tokio::test]
    async fn test_record_batch_counts_failures() {
        let store = Arc::new(InMemoryStore::new());
        let recorder = InteractionRecorder::new(store.clone(), Arc::new(NoopCache));

        let batch = vec![
            view("u1", "p1"),
            Interaction::new("u1", None, InteractionType::CartAdd),
            view("u1", "p2"),
        ];
        let summary = recorder.record_batch(&batch).await.unwrap();
        assert_eq!(summary, BatchRecordSummary { recorded: 2, failed: 1 });
        assert_eq!(store.interaction_count().await, 2);
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let recorder = InteractionRecorder::new(Arc::new(InMemoryStore::new()), Arc::new(NoopCache));
        let batch: Vec<Interaction> = (0..101).map(|i| view("u1", &format!("p{}", i))).collect();
        assert!(recorder.record_batch(&batch).await.is_err());
    }

    #[tokio::test]
    async fn test_record_with_rebuild() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_product(product("p1", "Shoes", None, Some(vec![1.0, 0.0])))
            .await;
        let cache: Arc<dyn Cache> = Arc::new(NoopCache);
        let builder = Arc::new(PreferenceBuilder::new(
            store.clone(),
            cache.clone(),
            PreferenceConfig::default(),
        ));
        let recorder = InteractionRecorder::new(store.clone(), cache).with_rebuild(builder);

        recorder.record(&view("u1", "p1")).await.unwrap();

        let pref = store.get_preference("u1").await.unwrap().unwrap();
        assert_eq!(pref.top_categories, vec!["Shoes"]);
        assert_eq!(pref.interaction_count, 1);
    }
}
