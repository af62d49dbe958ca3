//! Fallback handler: walks an ordered candidate list, retrying each
//! provider per [`crate::retry`] policy before failing over to the next.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::ProviderError;
use crate::provider::ProviderId;
use crate::retry::{backoff, is_retryable};

#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub provider_id: ProviderId,
    pub attempt: u32,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub start_ts_ms: u64,
}

#[derive(Debug)]
pub struct AllProvidersFailed {
    pub attempts: Vec<RetryAttempt>,
}

impl std::fmt::Display for AllProvidersFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "all providers failed after {} attempts", self.attempts.len())
    }
}

impl std::error::Error for AllProvidersFailed {}

pub struct FallbackResult<T> {
    pub value: T,
    pub provider_id: ProviderId,
    pub attempts: Vec<RetryAttempt>,
}

/// Runs `exec` against each candidate in order, retrying a provider up to
/// `max_retries` times (full-jitter backoff between retries) before moving
/// to the next. Every attempt, success or failure, is appended to the
/// attempt log exactly once.
pub async fn run_with_fallback<T, F, Fut>(
    candidates: &[ProviderId],
    max_retries: u32,
    base_backoff_ms: u64,
    mut exec: F,
) -> Result<FallbackResult<T>, AllProvidersFailed>
where
    F: FnMut(ProviderId, u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempts = Vec::new();

    for &provider_id in candidates {
        for attempt in 0..=max_retries {
            let start = Instant::now();
            let start_ts_ms = crate::registry::now_ms();
            match exec(provider_id, attempt).await {
                Ok(value) => {
                    attempts.push(RetryAttempt {
                        provider_id,
                        attempt,
                        error: None,
                        latency_ms: start.elapsed().as_millis() as u64,
                        start_ts_ms,
                    });
                    return Ok(FallbackResult { value, provider_id, attempts });
                }
                Err(err) => {
                    let retryable = is_retryable(&err);
                    attempts.push(RetryAttempt {
                        provider_id,
                        attempt,
                        error: Some(err.to_string()),
                        latency_ms: start.elapsed().as_millis() as u64,
                        start_ts_ms,
                    });
                    if retryable && attempt < max_retries {
                        tokio::time::sleep(backoff(attempt, base_backoff_ms)).await;
                        continue;
                    }
                    break;
                }
            }
        }
    }

    Err(AllProvidersFailed { attempts })
}

/// Sleeps are awaited with an explicit `Duration` parameter in tests so the
/// backoff schedule can be asserted without real delay.
#[allow(dead_code)]
fn deterministic_backoff_for_tests(attempt: u32) -> Duration {
    backoff(attempt, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn first_success_short_circuits_remaining_candidates() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = run_with_fallback(
            &[ProviderId::OpenAi, ProviderId::Anthropic],
            1,
            1,
            move |_provider, _attempt| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ProviderError>(42) }
            },
        )
        .await
        .unwrap();
        assert_eq!(result.value, 42);
        assert_eq!(result.provider_id, ProviderId::OpenAi);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.attempts.len(), 1);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_over_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = run_with_fallback(
            &[ProviderId::OpenAi, ProviderId::Anthropic],
            3,
            1,
            move |provider, _attempt| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async move {
                    if provider == ProviderId::OpenAi {
                        Err(ProviderError::InvalidApiKey)
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(result.value, 7);
        // one failed attempt on openai (no retries, non-retryable), one success on anthropic
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.attempts.len(), 2);
    }

    #[tokio::test]
    async fn retryable_error_retries_before_failing_over() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = run_with_fallback(
            &[ProviderId::OpenAi],
            2,
            1,
            move |_provider, attempt| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(ProviderError::RateLimit)
                    } else {
                        Ok(1)
                    }
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(result.value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.attempts.len(), 3);
    }

    #[tokio::test]
    async fn exhausting_all_candidates_surfaces_full_attempt_log() {
        let err = run_with_fallback(
            &[ProviderId::OpenAi, ProviderId::Anthropic],
            0,
            1,
            |_provider, _attempt| async { Err::<u32, _>(ProviderError::InvalidApiKey) },
        )
        .await
        .unwrap_err();
        assert_eq!(err.attempts.len(), 2);
    }
}
