//! Provider registry: owns the per-provider circuit breaker, rate limiter,
//! and latency tracker, and exposes point-in-time health snapshots to the
//! selector.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::latency::{LatencyStats, LatencyTracker};
use crate::provider::ProviderId;
use crate::rate_limiter::RateLimiter;

/// Point-in-time snapshot of one provider's health, used by the rules
/// engine and model selector. Cheap to copy; does not borrow the registry.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub id: ProviderId,
    pub enabled: bool,
    pub available: bool,
    pub rate_limit_remaining: u64,
    pub consecutive_failures: u32,
    pub last_failure_ts_ms: Option<u64>,
    pub ema_ms: f64,
    pub p95_ms: u64,
}

impl ProviderState {
    /// `enabled ∧ available ∧ rateLimitRemaining > 0`.
    pub fn is_admissible(&self) -> bool {
        self.enabled && self.available && self.rate_limit_remaining > 0
    }
}

struct ProviderEntry {
    breaker: CircuitBreaker,
    enabled: bool,
    last_failure_ts_ms: AtomicU64,
}

pub struct ProviderRegistry {
    entries: HashMap<ProviderId, ProviderEntry>,
    rate_limiter: RateLimiter,
    latency: LatencyTracker,
}

/// Whether a provider call may proceed right now, and whether it counts as
/// the single half-open probe (so the caller knows a failure here reopens
/// the circuit with a longer cooldown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAdmission {
    Admit,
    AdmitAsProbe,
    RejectCircuitOpen,
    RejectRateLimited,
    RejectDisabled,
}

impl ProviderRegistry {
    pub fn new(
        enabled: impl IntoIterator<Item = ProviderId>,
        breaker_config: CircuitBreakerConfig,
        rate_capacity: f64,
        rate_refill_per_sec: f64,
        latency_window: usize,
        latency_ema_alpha: f64,
    ) -> Self {
        let enabled: std::collections::HashSet<ProviderId> = enabled.into_iter().collect();
        let mut entries = HashMap::new();
        for provider in ProviderId::all() {
            entries.insert(
                provider,
                ProviderEntry {
                    breaker: CircuitBreaker::new(provider.as_str(), breaker_config.clone()),
                    enabled: enabled.contains(&provider),
                    last_failure_ts_ms: AtomicU64::new(0),
                },
            );
        }
        Self {
            entries,
            rate_limiter: RateLimiter::new(rate_capacity, rate_refill_per_sec),
            latency: LatencyTracker::new(latency_window, latency_ema_alpha),
        }
    }

    /// Checks circuit + rate limit admission for a provider without
    /// consuming a rate-limit token twice; callers should call this once per
    /// attempt immediately before dispatching.
    pub fn check_admission(&self, provider: ProviderId) -> CallAdmission {
        let entry = match self.entries.get(&provider) {
            Some(e) => e,
            None => return CallAdmission::RejectDisabled,
        };
        if !entry.enabled {
            return CallAdmission::RejectDisabled;
        }
        match entry.breaker.check_admission() {
            Admission::Reject => return CallAdmission::RejectCircuitOpen,
            Admission::Admit | Admission::AdmitAsProbe => {}
        }
        let admission = self.rate_limiter.try_acquire(provider);
        if !admission.admitted {
            return CallAdmission::RejectRateLimited;
        }
        match entry.breaker.state() {
            CircuitState::HalfOpen => CallAdmission::AdmitAsProbe,
            _ => CallAdmission::Admit,
        }
    }

    pub fn report_success(&self, provider: ProviderId, model: &str, ttfb_ms: u64, total_ms: u64) {
        if let Some(entry) = self.entries.get(&provider) {
            entry.breaker.on_success();
        }
        self.latency.record_latency(provider, model, ttfb_ms, total_ms, true);
    }

    pub fn report_error(&self, provider: ProviderId, model: &str, total_ms: u64) {
        if let Some(entry) = self.entries.get(&provider) {
            entry.breaker.on_failure();
            entry.last_failure_ts_ms.store(now_ms(), Ordering::Relaxed);
        }
        self.latency.record_latency(provider, model, total_ms, total_ms, false);
    }

    /// Full latency distribution for one provider, for the `/metrics` endpoint.
    pub fn latency_stats(&self, provider: ProviderId) -> LatencyStats {
        self.latency.get_stats(provider)
    }

    /// A point-in-time snapshot of every provider's health, for the rules
    /// engine to score against.
    pub fn snapshot(&self) -> Vec<ProviderState> {
        ProviderId::all()
            .into_iter()
            .map(|id| {
                let entry = &self.entries[&id];
                let stats = self.latency.get_stats(id);
                ProviderState {
                    id,
                    enabled: entry.enabled,
                    available: entry.breaker.would_admit(),
                    rate_limit_remaining: self.rate_limiter.remaining(id),
                    consecutive_failures: entry.breaker.consecutive_failures(),
                    last_failure_ts_ms: match entry.last_failure_ts_ms.load(Ordering::Relaxed) {
                        0 => None,
                        ts => Some(ts),
                    },
                    ema_ms: stats.ema_ms,
                    p95_ms: stats.p95_ms,
                }
            })
            .collect()
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new(
            [ProviderId::OpenAi, ProviderId::Anthropic],
            CircuitBreakerConfig {
                failure_threshold: 2,
                cooldown_base: Duration::from_millis(50),
                cooldown_max: Duration::from_secs(1),
            },
            100.0,
            1000.0,
            100,
            0.3,
        )
    }

    #[test]
    fn disabled_provider_is_never_admitted() {
        let reg = registry();
        assert_eq!(reg.check_admission(ProviderId::Google), CallAdmission::RejectDisabled);
    }

    #[test]
    fn circuit_opens_after_threshold_and_blocks_admission() {
        let reg = registry();
        reg.report_error(ProviderId::OpenAi, "gpt-4o", 10);
        reg.report_error(ProviderId::OpenAi, "gpt-4o", 10);
        assert_eq!(
            reg.check_admission(ProviderId::OpenAi),
            CallAdmission::RejectCircuitOpen
        );
        let snap = reg.snapshot();
        let openai = snap.iter().find(|s| s.id == ProviderId::OpenAi).unwrap();
        assert!(!openai.available);
    }

    #[test]
    fn snapshot_becomes_available_again_once_cooldown_elapses_and_probe_can_close_it() {
        let reg = registry();
        reg.report_error(ProviderId::OpenAi, "gpt-4o", 10);
        reg.report_error(ProviderId::OpenAi, "gpt-4o", 10);
        assert!(!reg.snapshot().iter().find(|s| s.id == ProviderId::OpenAi).unwrap().available);

        std::thread::sleep(Duration::from_millis(60));
        assert!(reg.snapshot().iter().find(|s| s.id == ProviderId::OpenAi).unwrap().available);

        assert_eq!(reg.check_admission(ProviderId::OpenAi), CallAdmission::AdmitAsProbe);
        reg.report_success(ProviderId::OpenAi, "gpt-4o", 5, 5);
        let snap = reg.snapshot();
        let openai = snap.iter().find(|s| s.id == ProviderId::OpenAi).unwrap();
        assert!(openai.available);
        assert_eq!(openai.consecutive_failures, 0);
    }

    #[test]
    fn snapshot_records_last_failure_timestamp() {
        let reg = registry();
        reg.report_error(ProviderId::OpenAi, "gpt-4o", 10);
        let snap = reg.snapshot();
        let openai = snap.iter().find(|s| s.id == ProviderId::OpenAi).unwrap();
        assert!(openai.last_failure_ts_ms.is_some());
    }

    #[test]
    fn snapshot_reflects_successful_latency() {
        let reg = registry();
        reg.report_success(ProviderId::Anthropic, "claude-3-haiku-20240307", 5, 120);
        let snap = reg.snapshot();
        let anthropic = snap.iter().find(|s| s.id == ProviderId::Anthropic).unwrap();
        assert!(anthropic.ema_ms > 0.0);
        assert!(anthropic.available);
    }
}
