/// Ranking Module
///
/// Signal fusion for recall candidates.
///
/// # Workflow
/// 1. Partition candidates by signal group
/// 2. Divide each group by its own maximum
/// 3. Blend content / collaborative / popularity with fixed weights
/// 4. Clamp to [0, 1] and sort (stable)
pub mod scorer;

pub use scorer::{
    sort_by_score, HybridScorer, COLLABORATIVE_WEIGHT, CONTENT_WEIGHT, DEFAULT_POPULARITY,
    POPULARITY_WEIGHT,
};
