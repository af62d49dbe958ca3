//! HTTP handlers: chat dispatch plus the liveness/readiness/metrics surface.

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use async_stream::stream;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use gateway_core::models::{ChatRequest, ChatResponse, Choice, Message};
use gateway_core::selector::ModelSelector;
use gateway_core::timeout::{resolve_deadline_ms, DeadlineGuard, ProviderTimeouts};
use gateway_core::{ClientError, ProviderError};

use crate::gateway_error::GatewayError;
use crate::server::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";
const COST_HEADER: &str = "x-cost-usd";
const INPUT_TOKENS_HEADER: &str = "x-input-tokens";
const OUTPUT_TOKENS_HEADER: &str = "x-output-tokens";

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn flattened_query(request: &ChatRequest) -> String {
    request
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn validate_request(request: &ChatRequest) -> Result<(), GatewayError> {
    if request.model.trim().is_empty() {
        return Err(GatewayError::InvalidRequest { message: "model must not be empty".into() });
    }
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest { message: "messages must not be empty".into() });
    }
    Ok(())
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, GatewayError> {
    validate_request(&request)?;
    let req_id = request_id(&headers);

    let owner = gateway_core::provider::provider_for_model(&request.model);
    let default_ms = state.config.server.default_timeout_ms.as_millis() as u64;
    let max_allowed_ms = state.config.server.max_allowed_timeout_ms.as_millis() as u64;
    let timeout_header = headers.get("x-timeout-ms").and_then(|v| v.to_str().ok());
    let deadline_ms = resolve_deadline_ms(timeout_header, owner, &ProviderTimeouts::default(), default_ms, max_allowed_ms);
    let guard = DeadlineGuard::new(deadline_ms);

    let skip_cache = headers
        .get("x-skip-cache")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let fingerprint = request.params_fingerprint();
    let query = flattened_query(&request);

    if !skip_cache && state.config.cache.enabled {
        if let Some(embedder) = &state.embedder {
            if let Ok(embedding) = embedder.embed(&query).await {
                let lookup = state.cache.lookup(&query, &request.model, &fingerprint, embedding).await;
                if lookup.hit {
                    if let Some(value) = lookup.response {
                        if let Ok(response) = serde_json::from_value::<ChatResponse>(value) {
                            return Ok(respond(&req_id, &response, None, response.usage));
                        }
                    }
                }
            }
        }
    }

    let strategy = state.config.routing.strategy().map_err(|e| GatewayError::Internal { message: e.to_string() })?;

    if request.stream.unwrap_or(false) {
        return stream_chat_completions(state, req_id, request, strategy, guard).await;
    }

    let registry = state.registry.clone();
    let selector = ModelSelector::new(&registry, state.config.routing.max_retries, state.config.routing.retry_backoff_base_ms);
    let models = state.models.clone();
    let token = guard.token.clone();
    let model_id = request.model.clone();
    let dispatch_request = request.clone();
    let result = selector
        .select_with_fallback(&model_id, strategy, move |provider, _model| {
            let request = dispatch_request.clone();
            let models = models.clone();
            let token = token.clone();
            async move {
                let model = models.get(&provider).ok_or(ProviderError::ModelNotFound { model: request.model.clone() })?;
                tokio::select! {
                    result = model.generate(&request) => result,
                    _ = token.cancelled() => Err(ProviderError::Cancelled),
                }
            }
        })
        .await;

    let result = match result {
        Ok(r) => r,
        Err(ClientError::AllProvidersFailed { .. }) if guard.token.is_cancelled() => {
            return Err(GatewayError::Client(ClientError::Timeout { timeout_ms: deadline_ms, provider: owner.map(|p| p.to_string()) }));
        }
        Err(err) => return Err(GatewayError::Client(err)),
    };

    let cost = state.cost_tracker.record(result.provider_id, &request.model, result.value.usage.prompt_tokens, result.value.usage.completion_tokens);

    let response = ChatResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: request.model.clone(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(result.value.text.clone()),
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(result.value.usage),
        system_fingerprint: None,
    };

    if state.config.cache.enabled && !skip_cache {
        if let Some(embedder) = &state.embedder {
            if let Ok(embedding) = embedder.embed(&query).await {
                let _ = state
                    .cache
                    .store(&query, &request.model, &fingerprint, serde_json::to_value(&response).unwrap_or(json!({})), embedding)
                    .await;
            }
        }
    }

    Ok(respond(&req_id, &response, Some(cost.cost_usd), response.usage))
}

async fn stream_chat_completions(
    state: AppState,
    req_id: String,
    request: ChatRequest,
    strategy: gateway_core::RoutingStrategy,
    guard: DeadlineGuard,
) -> Result<Response, GatewayError> {
    let registry = state.registry.clone();
    let selector = ModelSelector::new(&registry, state.config.routing.max_retries, state.config.routing.retry_backoff_base_ms);
    let models = state.models.clone();
    let token = guard.token.clone();
    let model_id_for_dispatch = request.model.clone();
    let dispatch_request = request.clone();
    let result = selector
        .select_with_fallback(&model_id_for_dispatch, strategy, move |provider, _model| {
            let request = dispatch_request.clone();
            let models = models.clone();
            let token = token.clone();
            async move {
                let model = models.get(&provider).ok_or(ProviderError::ModelNotFound { model: request.model.clone() })?;
                tokio::select! {
                    result = model.stream(&request) => result,
                    _ = token.cancelled() => Err(ProviderError::Cancelled),
                }
            }
        })
        .await
        .map_err(GatewayError::Client)?;

    let provider_id = result.provider_id;
    let model_id = request.model.clone();
    let (chunk_stream, usage_future) = result.value;
    let cost_tracker = state.cost_tracker.clone();

    // `guard` is moved into the generator so the deadline timer keeps running
    // (and can abort an overlong stream) for as long as the stream is live.
    let sse_stream = stream! {
        let _guard = guard;
        let mut stream = chunk_stream;
        loop {
            tokio::select! {
                item = stream.next() => {
                    match item {
                        Some(Ok(chunk)) => {
                            if let Ok(data) = serde_json::to_string(&chunk) {
                                yield Ok::<_, std::convert::Infallible>(Event::default().data(data));
                            }
                        }
                        Some(Err(_)) | None => break,
                    }
                }
                _ = _guard.token.cancelled() => break,
            }
        }
        if let Ok(usage) = usage_future.await {
            cost_tracker.record(provider_id, &model_id, usage.prompt_tokens, usage.completion_tokens);
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    let mut response = Sse::new(sse_stream).keep_alive(KeepAlive::default()).into_response();
    response.headers_mut().insert(REQUEST_ID_HEADER, HeaderValue::from_str(&req_id).unwrap_or(HeaderValue::from_static("")));
    Ok(response)
}

fn respond<T: Serialize>(req_id: &str, body: &T, cost_usd: Option<f64>, usage: Option<gateway_core::models::Usage>) -> Response {
    let mut response = Json(body).into_response();
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(req_id) {
        headers.insert(REQUEST_ID_HEADER, v);
    }
    if let Some(cost) = cost_usd {
        if let Ok(v) = HeaderValue::from_str(&format!("{cost:.8}")) {
            headers.insert(COST_HEADER, v);
        }
    }
    if let Some(usage) = usage {
        if let Ok(v) = HeaderValue::from_str(&usage.prompt_tokens.to_string()) {
            headers.insert(INPUT_TOKENS_HEADER, v);
        }
        if let Ok(v) = HeaderValue::from_str(&usage.completion_tokens.to_string()) {
            headers.insert(OUTPUT_TOKENS_HEADER, v);
        }
    }
    response
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn ready_check(State(state): State<AppState>) -> Response {
    let redis_ok = !state.config.cache.enabled || state.cache.is_connected().await;
    let providers_ok = state.config.has_any_provider_enabled();

    if redis_ok && providers_ok {
        Json(json!({ "status": "ready" })).into_response()
    } else {
        (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "redis_ok": redis_ok, "providers_ok": providers_ok })),
        )
            .into_response()
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot();
    let providers: Vec<_> = snapshot
        .into_iter()
        .map(|s| {
            let stats = state.registry.latency_stats(s.id);
            json!({
                "provider": s.id.as_str(),
                "enabled": s.enabled,
                "available": s.available,
                "rate_limit_remaining": s.rate_limit_remaining,
                "consecutive_failures": s.consecutive_failures,
                "latency": {
                    "sample_count": stats.sample_count,
                    "ema_ms": stats.ema_ms,
                    "p50_ms": stats.p50_ms,
                    "p95_ms": stats.p95_ms,
                    "p99_ms": stats.p99_ms,
                }
            })
        })
        .collect();
    Json(json!({ "providers": providers }))
}

pub async fn metrics_costs(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.cost_tracker.summary();
    Json(json!({
        "total_usd": summary.total_usd,
        "total_input_tokens": summary.total_input_tokens,
        "total_output_tokens": summary.total_output_tokens,
        "by_provider": summary.by_provider.iter().map(|(k, v)| (k.clone(), json!({
            "total_usd": v.total_usd,
            "input_tokens": v.input_tokens,
            "output_tokens": v.output_tokens,
        }))).collect::<std::collections::HashMap<_, _>>(),
        "by_model": summary.by_model.iter().map(|(k, v)| (k.clone(), json!({
            "total_usd": v.total_usd,
            "input_tokens": v.input_tokens,
            "output_tokens": v.output_tokens,
        }))).collect::<std::collections::HashMap<_, _>>(),
    }))
}
