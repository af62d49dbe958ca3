//! Axum application: state assembly and route table.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use gateway_core::provider::{Embedder, LanguageModel, ProviderId};
use gateway_core::registry::ProviderRegistry;
use gateway_core::cache::SemanticCache;
use gateway_core::cost::CostTracker;

use crate::config::Config;
use crate::gateway_error::GatewayError;
use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ProviderRegistry>,
    pub models: Arc<HashMap<ProviderId, Arc<dyn LanguageModel>>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub cache: Arc<SemanticCache>,
    pub cost_tracker: Arc<CostTracker>,
}

fn build_models(config: &Config) -> anyhow::Result<HashMap<ProviderId, Arc<dyn LanguageModel>>> {
    let mut models: HashMap<ProviderId, Arc<dyn LanguageModel>> = HashMap::new();
    let timeout = config.server.default_timeout_ms;

    if let Some(key) = &config.providers.openai_api_key {
        let adapter = gateway_core::providers::OpenAiModel::new(key, config.providers.openai_base_url.clone(), timeout)?;
        models.insert(ProviderId::OpenAi, Arc::new(adapter));
    }
    if let Some(key) = &config.providers.anthropic_api_key {
        let adapter =
            gateway_core::providers::AnthropicModel::new(key, config.providers.anthropic_base_url.clone(), timeout)?;
        models.insert(ProviderId::Anthropic, Arc::new(adapter));
    }
    if let Some(key) = &config.providers.google_api_key {
        let adapter = gateway_core::providers::GoogleModel::new(key, config.providers.google_base_url.clone(), timeout)?;
        models.insert(ProviderId::Google, Arc::new(adapter));
    }

    Ok(models)
}

pub async fn create_server(config: Arc<Config>) -> anyhow::Result<Router> {
    let models = build_models(&config)?;
    let enabled: Vec<ProviderId> = models.keys().copied().collect();

    let breaker_config = gateway_core::circuit_breaker::CircuitBreakerConfig {
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

    let embedder: Option<Arc<dyn Embedder>> = if config.cache.enabled {
        config.providers.openai_api_key.as_ref().map(|key| {
            Arc::new(
                gateway_core::providers::OpenAiEmbedder::new(
                    key,
                    None,
                    config.embedding.model.clone(),
                    config.embedding.dimensions,
                    config.server.default_timeout_ms,
                )
                .expect("embedder construction is infallible for well-formed config"),
            ) as Arc<dyn Embedder>
        })
    } else {
        None
    };

    let cache = if config.cache.enabled {
        let cache_config = gateway_core::cache::SemanticCacheConfig::new(
            config.cache.redis_url.clone(),
            config.embedding.dimensions,
            config.cache.ttl_seconds,
        );
        Arc::new(SemanticCache::connect(cache_config).await)
    } else {
        Arc::new(SemanticCache::disabled())
    };

    let cost_tracker = Arc::new(CostTracker::new(config.cost_alert_threshold_usd));

    let state = AppState {
        config: config.clone(),
        registry,
        models: Arc::new(models),
        embedder,
        cache,
        cost_tracker,
    };

    let mut router = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::ready_check))
        .route("/metrics", get(handlers::metrics))
        .route("/metrics/costs", get(handlers::metrics_costs))
        .with_state(state);

    if config.gateway_api_key.is_some() {
        router = router.layer(middleware::from_fn_with_state(config.clone(), auth_middleware));
    }

    router = router.layer(CorsLayer::permissive()).layer(TraceLayer::new_for_http());

    Ok(router)
}

async fn auth_middleware(
    State(config): State<Arc<Config>>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let expected = config.gateway_api_key.as_deref().unwrap_or_default();
    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v: &HeaderValue| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(next.run(request).await),
        _ => Err(GatewayError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_builds_with_a_single_configured_provider() {
        let mut config = Config::default();
        config.providers.openai_api_key = Some("sk-test".into());
        config.cache.enabled = false;
        let router = create_server(Arc::new(config)).await;
        assert!(router.is_ok());
    }
}
