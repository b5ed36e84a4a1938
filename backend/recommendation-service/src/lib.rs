pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{RecommendationError, Result};
pub use services::{
    HybridRecommendationEngine, InteractionRecorder, PreferenceBuilder, RecallLayer,
    RecommendationEvaluator,
};
