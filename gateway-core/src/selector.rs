//! Model selector: orchestrates registry snapshot → rules engine ranking →
//! admissibility filter → fallback execution.

use std::future::Future;

use crate::error::{ClientError, ProviderError};
use crate::fallback::{run_with_fallback, FallbackResult};
use crate::provider::ProviderId;
use crate::registry::{CallAdmission, ProviderRegistry};
use crate::routing::{rank_providers, RoutingStrategy};

pub struct ModelSelector<'a> {
    registry: &'a ProviderRegistry,
    max_retries: u32,
    base_backoff_ms: u64,
}

impl<'a> ModelSelector<'a> {
    pub fn new(registry: &'a ProviderRegistry, max_retries: u32, base_backoff_ms: u64) -> Self {
        Self { registry, max_retries, base_backoff_ms }
    }

    /// Builds the ranked-and-admissible candidate list for `model_id` under
    /// `strategy`. Empty means no provider can serve this model right now.
    fn candidates(&self, model_id: &str, strategy: RoutingStrategy) -> Vec<ProviderId> {
        let states = self.registry.snapshot();
        rank_providers(model_id, &states, strategy)
            .into_iter()
            .map(|r| r.provider_id)
            .collect()
    }

    /// Selects the single best admissible provider, without running
    /// anything. Mirrors the ranking `selectWithFallback` would use, for
    /// callers that only need to know who would be picked.
    pub fn select_provider(
        &self,
        model_id: &str,
        strategy: RoutingStrategy,
    ) -> Result<ProviderId, ClientError> {
        self.candidates(model_id, strategy)
            .into_iter()
            .next()
            .ok_or(ClientError::NoProvidersAvailable)
    }

    /// Ranks candidates, then runs `exec` through the fallback handler.
    ///
    /// Before each attempt this checks the provider's circuit breaker and
    /// rate limiter admission (the CAS that moves a breaker from Open to
    /// HalfOpen for its single probe lives here); a rejected attempt never
    /// calls `exec` and is recorded as a retryable failure so the fallback
    /// handler moves on to the next candidate or provider. Every admitted
    /// attempt reports success/error back into the registry so later
    /// candidates (and future requests) see updated health state
    /// immediately.
    pub async fn select_with_fallback<T, F, Fut>(
        &self,
        model_id: &str,
        strategy: RoutingStrategy,
        mut exec: F,
    ) -> Result<FallbackResult<T>, ClientError>
    where
        F: FnMut(ProviderId, &str) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let candidates = self.candidates(model_id, strategy);
        if candidates.is_empty() {
            return Err(ClientError::NoProvidersAvailable);
        }

        let registry = self.registry;
        let result = run_with_fallback(&candidates, self.max_retries, self.base_backoff_ms, move |provider, _attempt| {
            let admission = registry.check_admission(provider);
            let admitted = matches!(admission, CallAdmission::Admit | CallAdmission::AdmitAsProbe);
            let started = std::time::Instant::now();
            let fut = exec(provider, model_id);
            async move {
                if !admitted {
                    return Err(match admission {
                        CallAdmission::RejectRateLimited => ProviderError::RateLimit,
                        _ => ProviderError::ServiceUnavailable,
                    });
                }
                let outcome = fut.await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &outcome {
                    Ok(_) => registry.report_success(provider, model_id, elapsed_ms, elapsed_ms),
                    Err(_) => registry.report_error(provider, model_id, elapsed_ms),
                }
                outcome
            }
        })
        .await;

        result.map_err(|failed| ClientError::AllProvidersFailed { attempts: failed.attempts.len() })
    }
}
