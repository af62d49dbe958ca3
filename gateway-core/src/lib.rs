//! # gateway-core
//!
//! The routing engine behind an OpenAI-compatible chat completions gateway:
//! provider health tracking (circuit breaker + rate limiter + latency
//! tracker), a weighted rules engine, retry/fallback orchestration, a
//! timeout governor, cost accounting, and a Redis-backed semantic cache.
//!
//! This crate knows nothing about HTTP framing — it dispatches against the
//! abstract [`provider::LanguageModel`] capability. The binary crate wires
//! concrete adapters (OpenAI, Anthropic, Google) and the axum surface on
//! top of it.

pub mod cache;
pub mod circuit_breaker;
pub mod cost;
pub mod duration_serde;
pub mod error;
pub mod fallback;
pub mod latency;
pub mod models;
pub mod provider;
pub mod providers;
pub mod rate_limiter;
pub mod registry;
pub mod retry;
pub mod routing;
pub mod selector;
pub mod timeout;

pub use error::{ClientError, ProviderError};
pub use models::{ChatRequest, ChatResponse, Choice, Message, Role, StreamChunk, Usage};
pub use provider::{Embedder, GenerateResult, LanguageModel, ProviderId};
pub use registry::ProviderRegistry;
pub use routing::RoutingStrategy;
pub use selector::ModelSelector;

/// Result type for core operations, using [`ClientError`] as the error type.
pub type Result<T> = std::result::Result<T, ClientError>;
