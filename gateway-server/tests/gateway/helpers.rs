//! Shared test fixtures: a scripted `LanguageModel` fake plus a helper that
//! assembles an `AppState`/`Router` without touching a real provider or Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use axum_test::TestServer;

use gateway_core::cache::SemanticCache;
use gateway_core::circuit_breaker::CircuitBreakerConfig;
use gateway_core::cost::CostTracker;
use gateway_core::models::{ChatRequest, Usage};
use gateway_core::provider::{ChunkStream, GenerateResult, LanguageModel, ProviderId, UsageFuture};
use gateway_core::registry::ProviderRegistry;
use gateway_core::ProviderError;

use gateway_server::config::Config;
use gateway_server::handlers;
use gateway_server::server::AppState;

/// A `LanguageModel` that answers from a scripted queue of results (one per
/// call) and optionally sleeps first, so tests can drive retries, fallover,
/// and the timeout governor without a real upstream.
pub struct FakeModel {
    provider: ProviderId,
    queue: Mutex<VecDeque<Result<(String, u32, u32), ProviderError>>>,
    delay: Option<Duration>,
}

impl FakeModel {
    pub fn new(provider: ProviderId, queue: Vec<Result<(String, u32, u32), ProviderError>>) -> Self {
        Self { provider, queue: Mutex::new(queue.into()), delay: None }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl LanguageModel for FakeModel {
    fn provider_id(&self) -> ProviderId {
        self.provider
    }

    async fn generate(&self, _request: &ChatRequest) -> Result<GenerateResult, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.queue.lock().unwrap().pop_front().unwrap_or(Err(ProviderError::ServiceUnavailable));
        next.map(|(text, prompt_tokens, completion_tokens)| GenerateResult {
            text,
            usage: Usage { prompt_tokens, completion_tokens, total_tokens: prompt_tokens + completion_tokens },
        })
    }

    async fn stream(&self, _request: &ChatRequest) -> Result<(ChunkStream, UsageFuture), ProviderError> {
        Err(ProviderError::Configuration { message: "fake model does not stream".into() })
    }
}

/// A config with one provider key set (so `validate`/`has_any_provider_enabled`
/// are satisfied), caching disabled, and fast retry/backoff knobs.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.providers.openai_api_key = Some("test-key".into());
    config.cache.enabled = false;
    config.routing.max_retries = 1;
    config.routing.retry_backoff_base_ms = 1;
    config.routing.failure_threshold = 100;
    config
}

pub async fn build_server(models: HashMap<ProviderId, Arc<dyn LanguageModel>>, config: Config) -> TestServer {
    let enabled: Vec<ProviderId> = models.keys().copied().collect();
    let breaker_config = CircuitBreakerConfig {
        failure_threshold: config.routing.failure_threshold,
        cooldown_base: config.routing.cooldown_base_ms,
        cooldown_max: config.routing.cooldown_max_ms,
    };
    let registry = Arc::new(ProviderRegistry::new(
        enabled,
        breaker_config,
        config.routing.rate_limit_capacity,
        config.routing.rate_limit_refill_per_sec,
        config.routing.latency_window_size,
        config.routing.latency_ema_alpha,
    ));

    let state = AppState {
        config: Arc::new(config),
        registry,
        models: Arc::new(models),
        embedder: None,
        cache: Arc::new(SemanticCache::disabled()),
        cost_tracker: Arc::new(CostTracker::new(1_000_000.0)),
    };

    let router = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::ready_check))
        .route("/metrics", get(handlers::metrics))
        .route("/metrics/costs", get(handlers::metrics_costs))
        .with_state(state);

    TestServer::new(router).unwrap()
}
