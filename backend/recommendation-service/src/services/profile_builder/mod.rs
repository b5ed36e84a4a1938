// ============================================
// User Preference Builder (用戶偏好構建器)
// ============================================
//
// Turns the interaction log into one preference record per user:
// 1. Weighted, recency-decayed embedding (purchase 5.0 ... cart_remove -1.0)
// 2. Top categories by interaction count
// 3. Observed price range
//
// Lifecycle per user:
//   NoHistory ──build──▶ Built ──new interaction──▶ Stale ──rebuild──▶ Built
//
// Triggers:
// - InteractionRecorder (after each write, optional)
// - jobs::preference_batch (scheduled sweep)

pub mod interaction_recorder;
pub mod preference_builder;

pub use interaction_recorder::{BatchRecordSummary, InteractionRecorder, MAX_BATCH_SIZE};
pub use preference_builder::{BuildOutcome, PreferenceBuilder, PreferenceState, SweepSummary};

use crate::error::RecommendationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreferenceBuilderError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid interaction: {0}")]
    InvalidInteraction(String),
}

pub type Result<T> = std::result::Result<T, PreferenceBuilderError>;

impl From<RecommendationError> for PreferenceBuilderError {
    fn from(err: RecommendationError) -> Self {
        match err {
            RecommendationError::InvalidInput(msg) => PreferenceBuilderError::InvalidInteraction(msg),
            other => PreferenceBuilderError::Store(other.to_string()),
        }
    }
}

impl From<PreferenceBuilderError> for RecommendationError {
    fn from(err: PreferenceBuilderError) -> Self {
        match err {
            PreferenceBuilderError::InvalidInteraction(msg) => RecommendationError::InvalidInput(msg),
            PreferenceBuilderError::Store(msg) => RecommendationError::Store(msg),
        }
    }
}
