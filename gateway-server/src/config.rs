//! Configuration: TOML file + environment overrides, validated before the
//! server binds. Durations use the same vocabulary ("500ms", "30s") that
//! `gateway-core` parses internally.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use gateway_core::duration_serde;
use serde::{Deserialize, Serialize};

use gateway_core::routing::RoutingStrategy;

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_timeout_ms() -> u64 {
    120_000
}
fn default_routing_strategy() -> String {
    "balanced".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_latency_window() -> usize {
    100
}
fn default_latency_alpha() -> f64 {
    0.3
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_base_ms() -> u64 {
    30_000
}
fn default_cooldown_max_ms() -> u64 {
    300_000
}
fn default_rate_limit_capacity() -> f64 {
    60.0
}
fn default_rate_limit_refill() -> f64 {
    1.0
}
fn default_cache_enabled() -> bool {
    true
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_cache_ttl_seconds() -> u64 {
    3600
}
fn default_similarity_threshold() -> f64 {
    0.15
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dimensions() -> usize {
    1536
}
fn default_cost_alert_threshold() -> f64 {
    100.0
}
fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default = "default_cost_alert_threshold")]
    pub cost_alert_threshold_usd: f64,
    #[serde(default)]
    pub gateway_api_key: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_duration_timeout", with = "duration_serde")]
    pub default_timeout_ms: Duration,
    #[serde(default = "default_duration_max_timeout", with = "duration_serde")]
    pub max_allowed_timeout_ms: Duration,
}

fn default_duration_timeout() -> Duration {
    Duration::from_millis(default_timeout_ms())
}
fn default_duration_max_timeout() -> Duration {
    Duration::from_millis(default_max_timeout_ms())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            default_timeout_ms: default_duration_timeout(),
            max_allowed_timeout_ms: default_duration_max_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_routing_strategy")]
    pub strategy: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
    #[serde(default = "default_latency_window")]
    pub latency_window_size: usize,
    #[serde(default = "default_latency_alpha")]
    pub latency_ema_alpha: f64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_duration_cooldown_base", with = "duration_serde")]
    pub cooldown_base_ms: Duration,
    #[serde(default = "default_duration_cooldown_max", with = "duration_serde")]
    pub cooldown_max_ms: Duration,
    #[serde(default = "default_rate_limit_capacity")]
    pub rate_limit_capacity: f64,
    #[serde(default = "default_rate_limit_refill")]
    pub rate_limit_refill_per_sec: f64,
}

fn default_duration_cooldown_base() -> Duration {
    Duration::from_millis(default_cooldown_base_ms())
}
fn default_duration_cooldown_max() -> Duration {
    Duration::from_millis(default_cooldown_max_ms())
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: default_routing_strategy(),
            max_retries: default_max_retries(),
            retry_backoff_base_ms: default_backoff_base_ms(),
            latency_window_size: default_latency_window(),
            latency_ema_alpha: default_latency_alpha(),
            failure_threshold: default_failure_threshold(),
            cooldown_base_ms: default_duration_cooldown_base(),
            cooldown_max_ms: default_duration_cooldown_max(),
            rate_limit_capacity: default_rate_limit_capacity(),
            rate_limit_refill_per_sec: default_rate_limit_refill(),
        }
    }
}

impl RoutingConfig {
    pub fn strategy(&self) -> Result<RoutingStrategy> {
        match self.strategy.to_lowercase().as_str() {
            "cost" => Ok(RoutingStrategy::Cost),
            "latency" => Ok(RoutingStrategy::Latency),
            "balanced" => Ok(RoutingStrategy::Balanced),
            "capability_first" | "capability-first" => Ok(RoutingStrategy::CapabilityFirst),
            other => bail!("unknown routing strategy: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            redis_url: default_redis_url(),
            ttl_seconds: default_cache_ttl_seconds(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { model: default_embedding_model(), dimensions: default_embedding_dimensions() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default)]
    pub openai_base_url: Option<String>,
    #[serde(default)]
    pub anthropic_base_url: Option<String>,
    #[serde(default)]
    pub google_base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            routing: RoutingConfig::default(),
            cache: CacheConfig::default(),
            embedding: EmbeddingConfig::default(),
            providers: ProvidersConfig::default(),
            cost_alert_threshold_usd: default_cost_alert_threshold(),
            gateway_api_key: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Loads `path` if it exists, otherwise starts from defaults; either way
    /// environment variables are applied on top and the result is validated.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            toml::from_str(&raw).with_context(|| format!("failed to parse config file {path}"))?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GATEWAY_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("DEFAULT_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.server.default_timeout_ms = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("MAX_ALLOWED_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.server.max_allowed_timeout_ms = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("ROUTING_STRATEGY") {
            self.routing.strategy = v;
        }
        if let Ok(v) = std::env::var("MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.routing.max_retries = n;
            }
        }
        if let Ok(v) = std::env::var("RETRY_BACKOFF_BASE_MS") {
            if let Ok(ms) = v.parse() {
                self.routing.retry_backoff_base_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("LATENCY_WINDOW_SIZE") {
            if let Ok(n) = v.parse() {
                self.routing.latency_window_size = n;
            }
        }
        if let Ok(v) = std::env::var("LATENCY_EMA_ALPHA") {
            if let Ok(n) = v.parse() {
                self.routing.latency_ema_alpha = n;
            }
        }
        if let Ok(v) = std::env::var("FAILURE_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.routing.failure_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("COOLDOWN_BASE_MS") {
            if let Ok(ms) = v.parse() {
                self.routing.cooldown_base_ms = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("COOLDOWN_MAX_MS") {
            if let Ok(ms) = v.parse() {
                self.routing.cooldown_max_ms = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.routing.rate_limit_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_REFILL_PER_SEC") {
            if let Ok(n) = v.parse() {
                self.routing.rate_limit_refill_per_sec = n;
            }
        }
        if let Ok(v) = std::env::var("CACHE_ENABLED") {
            if let Ok(b) = v.parse() {
                self.cache.enabled = b;
            }
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.cache.redis_url = v;
        }
        if let Ok(v) = std::env::var("CACHE_TTL_SECONDS") {
            if let Ok(n) = v.parse() {
                self.cache.ttl_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("CACHE_SIMILARITY_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.cache.similarity_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("EMBEDDING_DIMENSIONS") {
            if let Ok(n) = v.parse() {
                self.embedding.dimensions = n;
            }
        }
        if let Ok(v) = std::env::var("COST_ALERT_THRESHOLD_USD") {
            if let Ok(n) = v.parse() {
                self.cost_alert_threshold_usd = n;
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_API_KEY") {
            self.gateway_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.providers.openai_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            self.providers.anthropic_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("GOOGLE_API_KEY") {
            self.providers.google_api_key = Some(v);
        }
    }

    /// Applies CLI-flag overrides, which take priority over file and env.
    pub fn apply_cli_overrides(&mut self, host: Option<String>, port: Option<u16>, log_level: Option<String>) {
        if let Some(host) = host {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        if let Some(log_level) = log_level {
            self.log_level = log_level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        if self.server.default_timeout_ms.is_zero() {
            bail!("server.default_timeout_ms must be positive");
        }
        if self.server.max_allowed_timeout_ms < self.server.default_timeout_ms {
            bail!("server.max_allowed_timeout_ms must be >= server.default_timeout_ms");
        }
        self.routing.strategy().context("routing.strategy")?;
        if self.routing.rate_limit_capacity <= 0.0 || !self.routing.rate_limit_capacity.is_finite() {
            bail!("routing.rate_limit_capacity must be a positive finite number");
        }
        if self.routing.rate_limit_refill_per_sec <= 0.0 || !self.routing.rate_limit_refill_per_sec.is_finite() {
            bail!("routing.rate_limit_refill_per_sec must be a positive finite number");
        }
        if self.routing.failure_threshold == 0 {
            bail!("routing.failure_threshold must be non-zero");
        }
        if self.embedding.dimensions == 0 {
            bail!("embedding.dimensions must be non-zero");
        }
        if !(0.0..=2.0).contains(&self.cache.similarity_threshold) {
            bail!("cache.similarity_threshold must be between 0.0 and 2.0");
        }
        if self.providers.openai_api_key.is_none()
            && self.providers.anthropic_api_key.is_none()
            && self.providers.google_api_key.is_none()
        {
            bail!("at least one provider API key must be configured (OPENAI_API_KEY, ANTHROPIC_API_KEY, or GOOGLE_API_KEY)");
        }
        Ok(())
    }

    pub fn has_any_provider_enabled(&self) -> bool {
        self.providers.openai_api_key.is_some()
            || self.providers.anthropic_api_key.is_some()
            || self.providers.google_api_key.is_some()
    }
}
