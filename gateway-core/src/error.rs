//! Error taxonomy for the routing engine and its provider adapters.
//!
//! `ProviderError` is what an adapter's HTTP call can fail with;
//! `ClientError` is the layer above that the selector and fallback
//! handler deal in. Both convert into the gateway's HTTP-facing
//! `GatewayError` one level up.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("no providers available")]
    NoProvidersAvailable,

    #[error("all providers failed")]
    AllProvidersFailed { attempts: usize },

    #[error("timeout after {timeout_ms}ms")]
    Timeout {
        timeout_ms: u64,
        provider: Option<String>,
    },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("cache error: {message}")]
    Cache { message: String },
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {code} - {message}")]
    Api { code: u16, message: String },

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("timeout")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response format")]
    InvalidResponse,

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Status code carried by this error, if any came from an upstream HTTP response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Api { code, .. } => Some(*code),
            ProviderError::InvalidApiKey => Some(401),
            ProviderError::RateLimit => Some(429),
            ProviderError::ServiceUnavailable => Some(503),
            _ => None,
        }
    }
}
