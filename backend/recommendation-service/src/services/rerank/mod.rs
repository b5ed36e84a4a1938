//! Cross-encoder rerank stage.
//!
//! The model is an injected collaborator. When it is absent, slow, or
//! fails, `Reranker::rerank` passes the first `top_k` candidates through
//! unchanged.

use crate::config::RerankerConfig;
use crate::error::{RecommendationError, Result};
use crate::models::Candidate;
use crate::services::embedding::truncate_chars;
use crate::services::ranking::sort_by_score;
use crate::utils::{clamp_unit, min_max_normalize};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DESCRIPTION_MAX_CHARS: usize = 200;
const MAX_QUERY_CATEGORIES: usize = 3;
const DEFAULT_QUERY: &str = "Product recommendations";

/// Pairwise (query, document) relevance model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RerankerModel: Send + Sync {
    async fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>>;
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    pairs: &'a [(String, String)],
}

#[derive(Deserialize)]
struct PredictResponse {
    scores: Vec<f32>,
}

/// JSON client for the reranker service (`POST {base}/rerank`).
pub struct HttpRerankerModel {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRerankerModel {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RecommendationError::Reranker(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl RerankerModel for HttpRerankerModel {
    async fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        let url = format!("{}/rerank", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&PredictRequest { pairs })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RecommendationError::Reranker(e.to_string()))?;

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| RecommendationError::Reranker(e.to_string()))?;
        Ok(body.scores)
    }
}

/// Document text for one candidate: `name | Category: c | description`.
pub fn document_text(candidate: &Candidate) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !candidate.name.is_empty() {
        parts.push(candidate.name.clone());
    }
    if !candidate.category.is_empty() {
        parts.push(format!("Category: {}", candidate.category));
    }
    if let Some(desc) = candidate.description.as_deref().filter(|d| !d.is_empty()) {
        parts.push(truncate_chars(desc, DESCRIPTION_MAX_CHARS));
    }
    parts.join(" | ")
}

/// "<context> Interested in: a, b, c", or a generic query when both are empty.
pub fn query_from_user_context(context: Option<&str>, categories: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(ctx) = context.filter(|c| !c.is_empty()) {
        parts.push(ctx.to_string());
    }
    if !categories.is_empty() {
        let top: Vec<&str> = categories
            .iter()
            .take(MAX_QUERY_CATEGORIES)
            .map(|c| c.as_str())
            .collect();
        parts.push(format!("Interested in: {}", top.join(", ")));
    }
    if parts.is_empty() {
        DEFAULT_QUERY.to_string()
    } else {
        parts.join(" ")
    }
}

/// Rerank stage wrapping an optional model.
#[derive(Clone)]
pub struct Reranker {
    model: Option<Arc<dyn RerankerModel>>,
    timeout: Duration,
}

impl Reranker {
    pub fn new(model: Arc<dyn RerankerModel>, timeout: Duration) -> Self {
        Self {
            model: Some(model),
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            model: None,
            timeout: Duration::from_millis(0),
        }
    }

    pub fn from_config(config: &RerankerConfig) -> Result<Self> {
        match (&config.service_url, config.enabled) {
            (Some(url), true) => {
                info!("Reranker enabled: {}", url);
                let model = HttpRerankerModel::new(url.clone())?;
                Ok(Self::new(
                    Arc::new(model),
                    Duration::from_millis(config.timeout_ms),
                ))
            }
            _ => {
                info!("Reranker disabled, rerank stage is pass-through");
                Ok(Self::disabled())
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    /// Re-order candidates by model relevance to `query`, keep `top_k`.
    ///
    /// Returned scores are min-max normalized over the returned set; the raw
    /// model output is kept in `rerank_score`.
    pub async fn rerank(&self, query: &str, candidates: Vec<Candidate>, top_k: usize) -> Vec<Candidate> {
        if candidates.is_empty() {
            return candidates;
        }
        let Some(model) = &self.model else {
            return pass_through(candidates, top_k);
        };

        let pairs: Vec<(String, String)> = candidates
            .iter()
            .map(|c| (query.to_string(), document_text(c)))
            .collect();

        let scores = match tokio::time::timeout(self.timeout, model.predict(&pairs)).await {
            Ok(Ok(scores)) if scores.len() == candidates.len() => scores,
            Ok(Ok(scores)) => {
                warn!(
                    "Reranker returned {} scores for {} candidates, skipping rerank",
                    scores.len(),
                    candidates.len()
                );
                return pass_through(candidates, top_k);
            }
            Ok(Err(e)) => {
                warn!("Reranking failed, keeping original order: {}", e);
                return pass_through(candidates, top_k);
            }
            Err(_) => {
                warn!(
                    "Reranking timed out after {}ms, keeping original order",
                    self.timeout.as_millis()
                );
                return pass_through(candidates, top_k);
            }
        };

        let mut reranked: Vec<Candidate> = candidates
            .into_iter()
            .zip(scores)
            .map(|(mut c, s)| {
                c.rerank_score = Some(s);
                c.score = s;
                c
            })
            .collect();
        sort_by_score(&mut reranked);
        reranked.truncate(top_k);

        let mut normalized: Vec<f32> = reranked.iter().map(|c| c.score).collect();
        min_max_normalize(&mut normalized);
        for (c, s) in reranked.iter_mut().zip(normalized) {
            c.score = clamp_unit(s);
        }

        debug!(count = reranked.len(), "Rerank completed");
        reranked
    }
}

fn pass_through(mut candidates: Vec<Candidate>, top_k: usize) -> Vec<Candidate> {
    candidates.truncate(top_k);
    candidates
}
