//! Timeout governor: resolves the effective per-request deadline and wires
//! a [`CancellationToken`] that fires at that deadline.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::provider::ProviderId;

/// Upper bound on any resolved deadline, regardless of source.
pub const MAX_ALLOWED_TIMEOUT_MS: u64 = 300_000;
const MIN_ALLOWED_TIMEOUT_MS: u64 = 1;

#[derive(Debug, Clone)]
pub struct TimeoutError {
    pub timeout_ms: u64,
    pub provider: Option<ProviderId>,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.provider {
            Some(p) => write!(f, "request timed out after {}ms (provider: {p})", self.timeout_ms),
            None => write!(f, "request timed out after {}ms", self.timeout_ms),
        }
    }
}

impl std::error::Error for TimeoutError {}

/// Per-provider timeout overrides, keyed by provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderTimeouts {
    pub openai_ms: Option<u64>,
    pub anthropic_ms: Option<u64>,
    pub google_ms: Option<u64>,
}

impl ProviderTimeouts {
    fn get(&self, provider: ProviderId) -> Option<u64> {
        match provider {
            ProviderId::OpenAi => self.openai_ms,
            ProviderId::Anthropic => self.anthropic_ms,
            ProviderId::Google => self.google_ms,
        }
    }
}

/// Resolves the effective deadline in priority order: request header,
/// per-provider override, configured default. Invalid header values are
/// ignored (logged) rather than rejecting the request. Every source is
/// clamped to `max_allowed_ms`, which callers should cap at
/// [`MAX_ALLOWED_TIMEOUT_MS`] themselves (the hard ceiling no configured
/// value may exceed).
pub fn resolve_deadline_ms(
    header_value: Option<&str>,
    provider: Option<ProviderId>,
    provider_timeouts: &ProviderTimeouts,
    default_ms: u64,
    max_allowed_ms: u64,
) -> u64 {
    let max_allowed_ms = max_allowed_ms.min(MAX_ALLOWED_TIMEOUT_MS);
    if let Some(raw) = header_value {
        match raw.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => {
                return ms.clamp(MIN_ALLOWED_TIMEOUT_MS, max_allowed_ms);
            }
            _ => {
                tracing::warn!(raw, "ignoring invalid X-Timeout-Ms header");
            }
        }
    }
    if let Some(provider) = provider {
        if let Some(ms) = provider_timeouts.get(provider) {
            return ms.clamp(MIN_ALLOWED_TIMEOUT_MS, max_allowed_ms);
        }
    }
    default_ms.clamp(MIN_ALLOWED_TIMEOUT_MS, max_allowed_ms)
}

/// A deadline-bound cancellation token. Dropping the guard before the
/// deadline fires cancels the scheduled abort task.
pub struct DeadlineGuard {
    pub token: CancellationToken,
    _abort: tokio::task::AbortHandle,
}

impl DeadlineGuard {
    pub fn new(timeout_ms: u64) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            child.cancel();
        });
        Self { token, _abort: handle.abort_handle() }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self._abort.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_takes_priority_over_provider_and_default() {
        let timeouts = ProviderTimeouts { openai_ms: Some(5000), ..Default::default() };
        let resolved = resolve_deadline_ms(Some("2000"), Some(ProviderId::OpenAi), &timeouts, 9000, MAX_ALLOWED_TIMEOUT_MS);
        assert_eq!(resolved, 2000);
    }

    #[test]
    fn invalid_header_falls_through_to_provider_override() {
        let timeouts = ProviderTimeouts { anthropic_ms: Some(4000), ..Default::default() };
        let resolved =
            resolve_deadline_ms(Some("not-a-number"), Some(ProviderId::Anthropic), &timeouts, 9000, MAX_ALLOWED_TIMEOUT_MS);
        assert_eq!(resolved, 4000);
    }

    #[test]
    fn no_header_or_override_uses_default() {
        let timeouts = ProviderTimeouts::default();
        let resolved = resolve_deadline_ms(None, Some(ProviderId::Google), &timeouts, 9000, MAX_ALLOWED_TIMEOUT_MS);
        assert_eq!(resolved, 9000);
    }

    #[test]
    fn header_is_clamped_to_the_hard_ceiling() {
        let timeouts = ProviderTimeouts::default();
        let resolved = resolve_deadline_ms(Some("999999999"), None, &timeouts, 9000, MAX_ALLOWED_TIMEOUT_MS);
        assert_eq!(resolved, MAX_ALLOWED_TIMEOUT_MS);
    }

    #[test]
    fn header_is_clamped_to_a_lower_configured_maximum() {
        let timeouts = ProviderTimeouts::default();
        let resolved = resolve_deadline_ms(Some("200000"), None, &timeouts, 9000, 120_000);
        assert_eq!(resolved, 120_000);
    }

    #[test]
    fn provider_override_above_configured_maximum_is_also_clamped() {
        let timeouts = ProviderTimeouts { google_ms: Some(250_000), ..Default::default() };
        let resolved = resolve_deadline_ms(None, Some(ProviderId::Google), &timeouts, 9000, 120_000);
        assert_eq!(resolved, 120_000);
    }

    #[test]
    fn configured_maximum_above_the_hard_ceiling_is_itself_clamped() {
        let timeouts = ProviderTimeouts::default();
        let resolved = resolve_deadline_ms(Some("999999999"), None, &timeouts, 9000, 10_000_000);
        assert_eq!(resolved, MAX_ALLOWED_TIMEOUT_MS);
    }

    #[tokio::test]
    async fn token_cancels_once_deadline_elapses() {
        let guard = DeadlineGuard::new(10);
        assert!(!guard.token.is_cancelled());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(guard.token.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_guard_before_deadline_prevents_cancellation_task_leak() {
        let guard = DeadlineGuard::new(50);
        drop(guard);
        tokio::time::sleep(Duration::from_millis(80)).await;
        // no panic / assertion: the abort handle cancelled the sleeping task.
    }
}
