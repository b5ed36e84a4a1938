use anyhow::{bail, Context};
use recommendation_service::{
    jobs::{EmbeddingRefreshJob, PreferenceBatchJob},
    services::{
        Cache, EmbeddingProvider, HashEmbeddingProvider, HttpEmbeddingProvider,
        HybridRecommendationEngine, NoopCache, PgStore, PreferenceBuilder, RecommendationEvaluator,
        RecommendationStore, RedisCache, Reranker,
    },
    Config,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    PreferenceBatch,
    EmbeddingRefresh,
    Evaluate,
}

impl Mode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "preference-batch" => Some(Mode::PreferenceBatch),
            "embedding-refresh" => Some(Mode::EmbeddingRefresh),
            "evaluate" => Some(Mode::Evaluate),
            _ => None,
        }
    }
}

fn mode_from_args() -> anyhow::Result<Mode> {
    let args: Vec<String> = std::env::args().collect();
    let value = args
        .iter()
        .position(|a| a == "--mode")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
        .unwrap_or("evaluate");

    match Mode::parse(value) {
        Some(mode) => Ok(mode),
        None => bail!(
            "unknown mode '{}' (expected preference-batch | embedding-refresh | evaluate)",
            value
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let json_logs = std::env::var("LOG_FORMAT").map_or(false, |v| v == "json");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let mode = mode_from_args()?;
    let config = Config::from_env().context("Failed to load config")?;

    info!(
        service = %config.service.service_name,
        env = %config.service.app_env,
        mode = ?mode,
        "Starting recommendation service"
    );

    let store: Arc<dyn RecommendationStore> = Arc::new(
        PgStore::connect(&config.database.url, config.database.max_connections)
            .await
            .context("Failed to connect to Postgres")?,
    );

    let cache: Arc<dyn Cache> = if config.redis.enabled {
        match RedisCache::new(&config.redis.url).await {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, running without cache");
                Arc::new(NoopCache)
            }
        }
    } else {
        Arc::new(NoopCache)
    };

    let embedder: Arc<dyn EmbeddingProvider> = match &config.embedding.service_url {
        Some(url) => Arc::new(HttpEmbeddingProvider::new(
            url.clone(),
            config.embedding.dimension,
            config.embedding.timeout_ms,
        )?),
        None => {
            warn!("EMBEDDING_SERVICE_URL not set, using hash embeddings");
            Arc::new(HashEmbeddingProvider::new(config.embedding.dimension))
        }
    };

    match mode {
        Mode::PreferenceBatch => {
            let builder = Arc::new(PreferenceBuilder::new(
                store.clone(),
                cache.clone(),
                config.preference.clone(),
            ));
            let stats = PreferenceBatchJob::new(builder).run().await?;
            info!(
                processed = stats.users_processed,
                updated = stats.users_updated,
                failed = stats.users_failed,
                "Preference batch job completed"
            );
        }
        Mode::EmbeddingRefresh => {
            let stats = EmbeddingRefreshJob::new(store.clone(), embedder, config.embedding.batch_size)
                .run()
                .await?;
            info!(
                embedded = stats.embedded,
                errors = stats.errors,
                "Embedding refresh job completed"
            );
        }
        Mode::Evaluate => {
            let reranker = Reranker::from_config(&config.reranker)?;
            let engine = Arc::new(
                HybridRecommendationEngine::new(
                    store.clone(),
                    cache.clone(),
                    reranker,
                    config.recommender.clone(),
                )
                .with_embedder(embedder)
                .with_embedding_dimension(config.embedding.dimension)
                .with_rerank_multiplier(config.reranker.candidate_multiplier),
            );
            let evaluator = RecommendationEvaluator::new(engine, store, config.evaluation.clone());
            let comparison = evaluator.compare_strategies().await?;
            println!("{}", serde_json::to_string_pretty(&comparison)?);
            info!(best = %comparison.best_strategy, "Evaluation completed");
        }
    }

    Ok(())
}
