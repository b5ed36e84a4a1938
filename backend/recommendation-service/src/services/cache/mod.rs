//! Optional key-value accelerator.
//!
//! Every call is infallible from the caller's side: a miss, a dead Redis,
//! or a bad payload all look like `None` / no-op, with a `warn!` logged.
//!
//! Cache keys:
//! - pref:{user_id}    → serialized UserPreference (1 hour)
//! - popular:{limit}   → serialized popularity fallback list (30 minutes)

use crate::error::{RecommendationError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str, ttl_secs: u64);
    async fn delete(&self, key: &str);
    async fn health_check(&self) -> bool;
}

pub fn preference_key(user_id: &str) -> String {
    format!("pref:{}", user_id)
}

pub fn popular_key(limit: usize) -> String {
    format!("popular:{}", limit)
}

/// Typed read; undecodable payloads count as a miss.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    let raw = cache.get(key).await?;
    match serde_json::from_str::<T>(&raw) {
        Ok(value) => {
            debug!("Cache hit for {}", key);
            Some(value)
        }
        Err(e) => {
            warn!("Cache deserialization failed for {}: {}", key, e);
            None
        }
    }
}

pub async fn set_json<T: Serialize + Sync>(cache: &dyn Cache, key: &str, value: &T, ttl_secs: u64) {
    match serde_json::to_string(value) {
        Ok(json) => cache.set(key, &json, ttl_secs).await,
        Err(e) => warn!("Cache serialization failed for {}: {}", key, e),
    }
}

/// Redis-backed cache using a shared connection manager.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RecommendationError::Cache(format!("Failed to create Redis client: {}", e)))?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            RecommendationError::Cache(format!("Failed to create Redis connection: {}", e))
        })?;

        Ok(Self { manager })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.manager.clone();
        match redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await
        {
            Ok(value) => {
                if value.is_none() {
                    debug!("Cache miss for {}", key);
                }
                value
            }
            Err(e) => {
                warn!("Redis GET failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) {
        let mut conn = self.manager.clone();
        if let Err(e) = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await
        {
            warn!("Redis SETEX failed for {}: {}", key, e);
        }
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.manager.clone();
        if let Err(e) = redis::cmd("DEL")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await
        {
            warn!("Redis DEL failed for {}: {}", key, e);
        }
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.manager.clone();
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Redis PING failed: {}", e);
                false
            }
        }
    }
}

/// Cache that stores nothing. Used when Redis is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) {}

    async fn delete(&self, _key: &str) {}

    async fn health_check(&self) -> bool {
        false
    }
}
