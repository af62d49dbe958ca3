use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use serde_json::Value;

use gateway_core::provider::{LanguageModel, ProviderId};
use gateway_core::ProviderError;

use super::helpers::{build_server, test_config, FakeModel};

type Models = HashMap<ProviderId, Arc<dyn LanguageModel>>;

#[tokio::test]
async fn happy_path_non_streaming_returns_the_upstream_answer_and_cost_header() {
    let openai = FakeModel::new(ProviderId::OpenAi, vec![Ok(("4".to_string(), 5, 1))]);
    let mut models: Models = HashMap::new();
    models.insert(ProviderId::OpenAi, Arc::new(openai));

    let server = build_server(models, test_config()).await;
    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "2+2?"}],
            "stream": false,
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "4");
    assert_eq!(body["usage"]["total_tokens"], 6);

    let cost: f64 = response.headers().get("x-cost-usd").unwrap().to_str().unwrap().parse().unwrap();
    // 5/1000 * 0.0025 + 1/1000 * 0.01
    assert!((cost - 0.0000225).abs() < 1e-9, "unexpected cost header: {cost}");
}

#[tokio::test]
async fn fallback_to_secondary_provider_after_primary_exhausts_retries() {
    let openai = FakeModel::new(
        ProviderId::OpenAi,
        vec![
            Err(ProviderError::Api { code: 500, message: "boom".into() }),
            Err(ProviderError::Api { code: 500, message: "boom".into() }),
        ],
    );
    let anthropic = FakeModel::new(ProviderId::Anthropic, vec![Ok(("hi from claude".to_string(), 3, 2))]);

    let mut models: Models = HashMap::new();
    models.insert(ProviderId::OpenAi, Arc::new(openai));
    models.insert(ProviderId::Anthropic, Arc::new(anthropic));

    // "custom-model" matches no known prefix, so both providers are
    // candidates and the fallback handler can fail over between them.
    let server = build_server(models, test_config()).await;
    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "custom-model",
            "messages": [{"role": "user", "content": "hello"}],
            "stream": false,
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "hi from claude");
}

#[tokio::test]
async fn all_providers_failing_surfaces_a_503_provider_error() {
    let failing = |provider| {
        FakeModel::new(
            provider,
            vec![
                Err(ProviderError::Api { code: 500, message: "boom".into() }),
                Err(ProviderError::Api { code: 500, message: "boom".into() }),
            ],
        )
    };

    let mut models: Models = HashMap::new();
    models.insert(ProviderId::OpenAi, Arc::new(failing(ProviderId::OpenAi)));
    models.insert(ProviderId::Anthropic, Arc::new(failing(ProviderId::Anthropic)));

    let server = build_server(models, test_config()).await;
    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "custom-model",
            "messages": [{"role": "user", "content": "hello"}],
            "stream": false,
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "provider_error");
}

#[tokio::test]
async fn timeout_header_cancels_a_slow_provider_before_it_answers() {
    let slow = FakeModel::new(ProviderId::OpenAi, vec![Ok(("too slow".to_string(), 1, 1))])
        .with_delay(Duration::from_millis(500));

    let mut models: Models = HashMap::new();
    models.insert(ProviderId::OpenAi, Arc::new(slow));

    let mut config = test_config();
    config.routing.max_retries = 0;

    let server = build_server(models, config).await;
    let response = server
        .post("/v1/chat/completions")
        .add_header("x-timeout-ms", "50")
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false,
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::REQUEST_TIMEOUT);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "timeout_error");
}

#[tokio::test]
async fn empty_messages_is_rejected_as_invalid_request() {
    let models: Models = HashMap::new();
    let server = build_server(models, test_config()).await;
    let response = server
        .post("/v1/chat/completions")
        .json(&json!({ "model": "gpt-4o", "messages": [] }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}
