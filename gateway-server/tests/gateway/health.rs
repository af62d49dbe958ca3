use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::Value;

use gateway_core::provider::{LanguageModel, ProviderId};

use super::helpers::{build_server, test_config, FakeModel};

type Models = HashMap<ProviderId, Arc<dyn LanguageModel>>;

#[tokio::test]
async fn health_check_is_always_ok() {
    let models: Models = HashMap::new();
    let server = build_server(models, test_config()).await;
    let response = server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn ready_check_reports_ready_once_a_provider_key_is_configured() {
    let openai = FakeModel::new(ProviderId::OpenAi, vec![]);
    let mut models: Models = HashMap::new();
    models.insert(ProviderId::OpenAi, Arc::new(openai));

    let server = build_server(models, test_config()).await;
    let response = server.get("/ready").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn metrics_endpoint_reports_every_provider_with_enabled_flags() {
    let openai = FakeModel::new(ProviderId::OpenAi, vec![]);
    let mut models: Models = HashMap::new();
    models.insert(ProviderId::OpenAi, Arc::new(openai));

    let server = build_server(models, test_config()).await;
    let response = server.get("/metrics").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    let providers = body["providers"].as_array().unwrap();
    // the registry always tracks all three known providers; only the
    // ones passed to `ProviderRegistry::new` are marked enabled.
    assert_eq!(providers.len(), 3);
    let openai_entry = providers.iter().find(|p| p["provider"] == "openai").unwrap();
    assert_eq!(openai_entry["enabled"], true);
    let google_entry = providers.iter().find(|p| p["provider"] == "google").unwrap();
    assert_eq!(google_entry["enabled"], false);
}

#[tokio::test]
async fn cost_metrics_endpoint_starts_at_zero() {
    let models: Models = HashMap::new();
    let server = build_server(models, test_config()).await;
    let response = server.get("/metrics/costs").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["total_usd"], 0.0);
}
