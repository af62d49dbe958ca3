//! Semantic cache: Redis-backed vector KNN lookup over an HNSW index, keyed
//! by `(query text, model, params fingerprint)`.
//!
//! Degrades to a pass-through no-op when the configured Redis connection is
//! unavailable — a cache-backend outage must never fail the request.

use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const KEY_PREFIX: &str = "cache:";
const INDEX_NAME: &str = "idx:semantic-cache";
const DEFAULT_SCORE_THRESHOLD: f64 = 0.15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub query: String,
    pub model: String,
    pub response: serde_json::Value,
    pub embedding: Vec<f32>,
    pub created_ts_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub hit: bool,
    pub response: Option<serde_json::Value>,
    pub score: Option<f64>,
}

/// Escapes all Redis query special characters in a TAG filter value. Model
/// identifiers are attacker-controlled only indirectly (via request body),
/// but escaping is cheap and closes the injection surface outright.
pub fn escape_tag_value(value: &str) -> String {
    const SPECIAL: &[char] = &['{', '}', '|', '@', '*', '(', ')', '!', '~', '"', '\'', '.', ':', '-', '/'];
    let mut escaped = String::with_capacity(value.len() * 2);
    for c in value.chars() {
        if SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub struct SemanticCacheConfig {
    pub redis_url: String,
    pub dimensions: usize,
    pub ttl_seconds: u64,
    pub score_threshold: f64,
}

impl SemanticCacheConfig {
    pub fn new(redis_url: impl Into<String>, dimensions: usize, ttl_seconds: u64) -> Self {
        Self {
            redis_url: redis_url.into(),
            dimensions,
            ttl_seconds,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

enum Backend {
    Connected(redis::Client),
    Disabled,
}

/// Semantic cache handle. Construction never fails: a Redis connection
/// error during `connect` degrades the cache to no-op rather than
/// propagating to the caller.
pub struct SemanticCache {
    backend: Arc<Backend>,
    config: SemanticCacheConfig,
}

impl SemanticCache {
    /// A cache handle that never attempts a Redis connection. Used when the
    /// cache is turned off entirely rather than merely unreachable.
    pub fn disabled() -> Self {
        Self {
            backend: Arc::new(Backend::Disabled),
            config: SemanticCacheConfig::new("redis://disabled/", 1, 1),
        }
    }

    pub async fn connect(config: SemanticCacheConfig) -> Self {
        match redis::Client::open(config.redis_url.as_str()) {
            Ok(client) => match client.get_multiplexed_async_connection().await {
                Ok(_) => {
                    if let Err(err) = ensure_index(&client, config.dimensions).await {
                        tracing::warn!(%err, "failed to create semantic cache index, continuing degraded");
                    }
                    Self { backend: Arc::new(Backend::Connected(client)), config }
                }
                Err(err) => {
                    tracing::warn!(%err, "semantic cache backend unreachable, degrading to no-op");
                    Self { backend: Arc::new(Backend::Disabled), config }
                }
            },
            Err(err) => {
                tracing::warn!(%err, "invalid semantic cache backend url, degrading to no-op");
                Self { backend: Arc::new(Backend::Disabled), config }
            }
        }
    }

    /// Whether the cache is backed by a live Redis connection right now.
    /// Used by the gateway's readiness probe; a disabled/degraded cache
    /// still reports `false` without making the probe itself fail-open.
    pub async fn is_connected(&self) -> bool {
        let client = match self.backend.as_ref() {
            Backend::Disabled => return false,
            Backend::Connected(c) => c,
        };
        client.get_multiplexed_async_connection().await.is_ok()
    }

    pub async fn lookup(
        &self,
        query: &str,
        model: &str,
        fingerprint: &str,
        embedding: Vec<f32>,
    ) -> CacheLookup {
        let client = match self.backend.as_ref() {
            Backend::Disabled => return CacheLookup { hit: false, response: None, score: None },
            Backend::Connected(c) => c,
        };

        let filter_model = format!("{}::{}", model, fingerprint);
        let escaped = escape_tag_value(&filter_model);
        let blob = vector_blob(&embedding);

        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(%err, "semantic cache connection lost, treating as miss");
                return CacheLookup { hit: false, response: None, score: None };
            }
        };

        let query_str = format!("(@model:{{{escaped}}})=>[KNN 1 @vector $blob AS score]");
        let result: redis::RedisResult<redis::Value> = redis::cmd("FT.SEARCH")
            .arg(INDEX_NAME)
            .arg(&query_str)
            .arg("PARAMS")
            .arg(2)
            .arg("blob")
            .arg(blob)
            .arg("SORTBY")
            .arg("score")
            .arg("DIALECT")
            .arg(2)
            .query_async(&mut conn)
            .await;

        let (_, fields) = match result.ok().and_then(parse_search_result) {
            Some(r) => r,
            None => return CacheLookup { hit: false, response: None, score: None },
        };

        let score: f64 = fields.get("score").and_then(|s| s.parse().ok()).unwrap_or(f64::INFINITY);
        if score >= self.config.score_threshold {
            return CacheLookup { hit: false, response: None, score: Some(score) };
        }
        let response = fields
            .get("$")
            .and_then(|raw| serde_json::from_str::<CacheEntry>(raw).ok())
            .map(|entry| entry.response);

        match response {
            Some(response) => CacheLookup { hit: true, response: Some(response), score: Some(score) },
            None => CacheLookup { hit: false, response: None, score: Some(score) },
        }
    }

    pub async fn store(
        &self,
        query: &str,
        model: &str,
        fingerprint: &str,
        response: serde_json::Value,
        embedding: Vec<f32>,
    ) -> Result<(), crate::error::ClientError> {
        if embedding.len() != self.config.dimensions {
            return Err(crate::error::ClientError::Cache {
                message: format!(
                    "embedding dimension {} does not match configured {}",
                    embedding.len(),
                    self.config.dimensions
                ),
            });
        }

        let client = match self.backend.as_ref() {
            Backend::Disabled => return Ok(()),
            Backend::Connected(c) => c,
        };
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(%err, "semantic cache connection lost, skipping store");
                return Ok(());
            }
        };

        let entry = CacheEntry {
            query: query.to_string(),
            model: format!("{}::{}", model, fingerprint),
            response,
            embedding,
            created_ts_ms: crate::registry::now_ms(),
        };
        let key = format!("{KEY_PREFIX}{}", Uuid::new_v4());
        let body = serde_json::to_string(&entry)
            .map_err(|e| crate::error::ClientError::Cache { message: e.to_string() })?;

        let _: redis::RedisResult<()> = redis::cmd("JSON.SET")
            .arg(&key)
            .arg("$")
            .arg(&body)
            .query_async(&mut conn)
            .await;
        let _: redis::RedisResult<()> =
            conn.expire::<_, ()>(&key, self.config.ttl_seconds as i64).await;

        Ok(())
    }
}

async fn ensure_index(client: &redis::Client, dimensions: usize) -> redis::RedisResult<()> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let result: redis::RedisResult<redis::Value> = redis::cmd("FT.CREATE")
        .arg(INDEX_NAME)
        .arg("ON")
        .arg("JSON")
        .arg("PREFIX")
        .arg(1)
        .arg(KEY_PREFIX)
        .arg("SCHEMA")
        .arg("$.embedding")
        .arg("AS")
        .arg("vector")
        .arg("VECTOR")
        .arg("HNSW")
        .arg(6)
        .arg("TYPE")
        .arg("FLOAT32")
        .arg("DIM")
        .arg(dimensions)
        .arg("DISTANCE_METRIC")
        .arg("COSINE")
        .arg("$.model")
        .arg("AS")
        .arg("model")
        .arg("TAG")
        .arg("$.query")
        .arg("AS")
        .arg("query")
        .arg("TEXT")
        .query_async(&mut conn)
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) if err.to_string().contains("Index already exists") => Ok(()),
        Err(err) => Err(err),
    }
}

fn vector_blob(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn parse_search_result(value: redis::Value) -> Option<(String, std::collections::HashMap<String, String>)> {
    // FT.SEARCH reply shape: [count, key1, fields1, key2, fields2, ...]
    if let redis::Value::Array(items) = value {
        if items.len() < 3 {
            return None;
        }
        let key = match &items[1] {
            redis::Value::BulkString(b) => String::from_utf8_lossy(b).to_string(),
            _ => return None,
        };
        let mut fields = std::collections::HashMap::new();
        if let redis::Value::Array(pairs) = &items[2] {
            let mut iter = pairs.iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                if let (redis::Value::BulkString(k), redis::Value::BulkString(v)) = (k, v) {
                    fields.insert(
                        String::from_utf8_lossy(k).to_string(),
                        String::from_utf8_lossy(v).to_string(),
                    );
                }
            }
        }
        return Some((key, fields));
    }
    None
}

#[allow(dead_code)]
fn timeout_hint() -> Duration {
    Duration::from_millis(250)
}
