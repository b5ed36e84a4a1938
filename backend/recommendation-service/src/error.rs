use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecommendationError>;

#[derive(Debug, Error)]
pub enum RecommendationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Reranker error: {0}")]
    Reranker(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RecommendationError {
    /// Only caller mistakes surface past the engine boundary.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, RecommendationError::InvalidInput(_))
    }
}

impl From<sqlx::Error> for RecommendationError {
    fn from(err: sqlx::Error) -> Self {
        RecommendationError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for RecommendationError {
    fn from(err: serde_json::Error) -> Self {
        RecommendationError::Serialization(err.to_string())
    }
}

impl From<envy::Error> for RecommendationError {
    fn from(err: envy::Error) -> Self {
        RecommendationError::Config(err.to_string())
    }
}
