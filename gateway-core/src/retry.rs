//! Retry classification and full-jitter backoff.

use rand::Rng;

use crate::error::ProviderError;

const BACKOFF_CAP_MS: u64 = 10_000;

/// Whether an error is worth retrying against a (possibly different)
/// provider. Status-carrying errors are judged by status code; everything
/// else falls back to a well-known-transient-phrase heuristic.
pub fn is_retryable(error: &ProviderError) -> bool {
    if let Some(status) = error.status_code() {
        return status == 429 || status >= 500;
    }
    match error {
        ProviderError::Http(e) => is_transient_message(&e.to_string()),
        ProviderError::Timeout | ProviderError::Cancelled => true,
        ProviderError::Serialization(_) | ProviderError::InvalidResponse => false,
        ProviderError::Configuration { .. } => false,
        ProviderError::Api { .. } | ProviderError::InvalidApiKey | ProviderError::ModelNotFound { .. } => false,
        ProviderError::ServiceUnavailable | ProviderError::RateLimit => true,
    }
}

fn is_transient_message(message: &str) -> bool {
    const PHRASES: &[&str] = &[
        "timeout",
        "timed out",
        "connection reset",
        "connection refused",
        "socket hang up",
        "network",
        "fetch failed",
        "abort",
    ];
    let lower = message.to_lowercase();
    PHRASES.iter().any(|p| lower.contains(p))
}

/// Full-jitter backoff: `uniform(0, min(cap, base * 2^attempt))`. Full
/// jitter (rather than decorrelated jitter) is used so concurrently
/// failing requests don't re-align on the next retry wave.
pub fn backoff(attempt: u32, base_ms: u64) -> std::time::Duration {
    let exp = base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX).max(1));
    let upper = exp.min(BACKOFF_CAP_MS);
    let jittered = if upper == 0 { 0 } else { rand::thread_rng().gen_range(0..=upper) };
    std::time::Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert!(is_retryable(&ProviderError::RateLimit));
        assert!(is_retryable(&ProviderError::Api { code: 503, message: "down".into() }));
        assert!(is_retryable(&ProviderError::ServiceUnavailable));
    }

    #[test]
    fn client_errors_are_not_retryable() {
        assert!(!is_retryable(&ProviderError::InvalidApiKey));
        assert!(!is_retryable(&ProviderError::ModelNotFound { model: "x".into() }));
        assert!(!is_retryable(&ProviderError::Api { code: 400, message: "bad".into() }));
    }

    #[test]
    fn timeout_and_cancellation_are_retryable() {
        assert!(is_retryable(&ProviderError::Timeout));
        assert!(is_retryable(&ProviderError::Cancelled));
    }

    #[test]
    fn backoff_never_exceeds_cap() {
        for attempt in 0..20 {
            let d = backoff(attempt, 1000);
            assert!(d.as_millis() as u64 <= BACKOFF_CAP_MS);
        }
    }

    #[test]
    fn backoff_is_zero_when_base_is_zero() {
        assert_eq!(backoff(3, 0).as_millis(), 0);
    }
}
