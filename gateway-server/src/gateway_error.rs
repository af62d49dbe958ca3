//! HTTP-facing error type. Wraps `gateway-core`'s `ClientError`/`ProviderError`
//! and maps every variant to the JSON error envelope and status code the
//! HTTP surface promises callers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::{ClientError, ProviderError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    fn parts(&self) -> (StatusCode, String, &'static str) {
        match self {
            GatewayError::InvalidRequest { message } => {
                (StatusCode::BAD_REQUEST, message.clone(), "invalid_request_error")
            }
            GatewayError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "missing or invalid API key".to_string(),
                "authentication_error",
            ),
            GatewayError::Internal { message } => {
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone(), "server_error")
            }
            GatewayError::Client(client_err) => client_parts(client_err),
        }
    }
}

fn client_parts(err: &ClientError) -> (StatusCode, String, &'static str) {
    match err {
        ClientError::Timeout { timeout_ms, provider } => (
            StatusCode::REQUEST_TIMEOUT,
            match provider {
                Some(p) => format!("request timed out after {timeout_ms}ms (provider: {p})"),
                None => format!("request timed out after {timeout_ms}ms"),
            },
            "timeout_error",
        ),
        ClientError::NoProvidersAvailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            "no provider is available to serve this model".to_string(),
            "provider_error",
        ),
        ClientError::AllProvidersFailed { attempts } => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("all providers failed after {attempts} attempt(s)"),
            "provider_error",
        ),
        ClientError::Configuration { message } => {
            (StatusCode::INTERNAL_SERVER_ERROR, message.clone(), "server_error")
        }
        ClientError::Cache { message } => {
            (StatusCode::INTERNAL_SERVER_ERROR, message.clone(), "server_error")
        }
        ClientError::Provider(provider_err) => provider_parts(provider_err),
    }
}

fn provider_parts(err: &ProviderError) -> (StatusCode, String, &'static str) {
    match err {
        ProviderError::RateLimit => {
            (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded".to_string(), "rate_limit_error")
        }
        ProviderError::InvalidApiKey => {
            (StatusCode::SERVICE_UNAVAILABLE, "upstream provider rejected its API key".to_string(), "provider_error")
        }
        ProviderError::ModelNotFound { model } => {
            (StatusCode::BAD_REQUEST, format!("model not found: {model}"), "invalid_request_error")
        }
        ProviderError::ServiceUnavailable | ProviderError::Timeout | ProviderError::Cancelled => {
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string(), "provider_error")
        }
        ProviderError::Api { code, message } if *code == 429 => {
            (StatusCode::TOO_MANY_REQUESTS, message.clone(), "rate_limit_error")
        }
        ProviderError::Api { code, message } => {
            let status = StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, message.clone(), "provider_error")
        }
        ProviderError::Http(_) | ProviderError::Serialization(_) | ProviderError::InvalidResponse => {
            (StatusCode::BAD_GATEWAY, err.to_string(), "provider_error")
        }
        ProviderError::Configuration { message } => {
            (StatusCode::INTERNAL_SERVER_ERROR, message.clone(), "server_error")
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message, error_type) = self.parts();
        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_408() {
        let err = GatewayError::Client(ClientError::Timeout { timeout_ms: 500, provider: None });
        let (status, _, error_type) = err.parts();
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(error_type, "timeout_error");
    }

    #[test]
    fn all_providers_failed_maps_to_503() {
        let err = GatewayError::Client(ClientError::AllProvidersFailed { attempts: 3 });
        let (status, _, error_type) = err.parts();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_type, "provider_error");
    }

    #[test]
    fn rate_limit_maps_to_429() {
        let err = GatewayError::Client(ClientError::Provider(ProviderError::RateLimit));
        let (status, _, error_type) = err.parts();
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(error_type, "rate_limit_error");
    }

    #[test]
    fn invalid_request_maps_to_400() {
        let err = GatewayError::InvalidRequest { message: "missing model".into() };
        let (status, _, error_type) = err.parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_type, "invalid_request_error");
    }
}
