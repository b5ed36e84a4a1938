pub mod cache;
pub mod diversity;
pub mod embedding;
pub mod engine;
pub mod evaluation;
pub mod profile_builder;
pub mod ranking;
pub mod recall;
pub mod rerank;
pub mod similarity;
pub mod store;

pub use cache::{Cache, NoopCache, RedisCache};
pub use diversity::BusinessRuleFilter;
pub use embedding::{EmbeddingProvider, HashEmbeddingProvider, HttpEmbeddingProvider};
pub use engine::HybridRecommendationEngine;
pub use evaluation::{EvaluationMetrics, RecommendationEvaluator, StrategyComparison};
pub use profile_builder::{InteractionRecorder, PreferenceBuilder};
pub use ranking::HybridScorer;
pub use recall::RecallLayer;
pub use rerank::{HttpRerankerModel, Reranker, RerankerModel};
pub use store::{CatalogStore, InMemoryStore, InteractionStore, PgStore, RecommendationStore};
