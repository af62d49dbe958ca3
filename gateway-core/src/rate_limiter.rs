//! Per-provider token-bucket admission control. Fails closed: an unknown
//! provider or a malformed request is denied, never silently admitted.

use std::time::Instant;

use dashmap::DashMap;

use crate::provider::ProviderId;

#[derive(Debug, Clone, Copy)]
pub struct AdmissionResult {
    pub admitted: bool,
    pub retry_after_ms: u64,
}

struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    current_tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            current_tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> AdmissionResult {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.current_tokens = (self.current_tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.current_tokens >= 1.0 {
            self.current_tokens -= 1.0;
            AdmissionResult {
                admitted: true,
                retry_after_ms: 0,
            }
        } else {
            let deficit = 1.0 - self.current_tokens;
            let retry_after_ms = (deficit / self.refill_per_sec * 1000.0).ceil() as u64;
            AdmissionResult {
                admitted: false,
                retry_after_ms,
            }
        }
    }

    fn remaining(&self) -> u64 {
        self.current_tokens.floor().max(0.0) as u64
    }
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: DashMap<ProviderId, Bucket>,
}

impl RateLimiter {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            buckets: DashMap::new(),
        }
    }

    /// Admission check for a known provider. Fails closed: a non-finite or
    /// non-positive configured rate is treated as "no tokens available".
    pub fn try_acquire(&self, provider: ProviderId) -> AdmissionResult {
        if !self.capacity.is_finite() || !self.refill_per_sec.is_finite() || self.refill_per_sec <= 0.0 {
            return AdmissionResult {
                admitted: false,
                retry_after_ms: u64::MAX,
            };
        }
        let mut bucket = self
            .buckets
            .entry(provider)
            .or_insert_with(|| Bucket::new(self.capacity, self.refill_per_sec));
        bucket.try_acquire()
    }

    pub fn remaining(&self, provider: ProviderId) -> u64 {
        self.buckets
            .get(&provider)
            .map(|b| b.remaining())
            .unwrap_or(self.capacity.floor().max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_capacity_then_denies() {
        let limiter = RateLimiter::new(2.0, 0.0001);
        assert!(limiter.try_acquire(ProviderId::OpenAi).admitted);
        assert!(limiter.try_acquire(ProviderId::OpenAi).admitted);
        let denied = limiter.try_acquire(ProviderId::OpenAi);
        assert!(!denied.admitted);
        assert!(denied.retry_after_ms > 0);
    }

    #[test]
    fn tokens_never_exceed_capacity_or_go_negative() {
        let limiter = RateLimiter::new(5.0, 1000.0);
        for _ in 0..20 {
            limiter.try_acquire(ProviderId::Anthropic);
        }
        let remaining = limiter.remaining(ProviderId::Anthropic);
        assert!(remaining <= 5);
    }

    #[test]
    fn unconfigured_rate_fails_closed() {
        let limiter = RateLimiter::new(10.0, 0.0);
        let result = limiter.try_acquire(ProviderId::Google);
        assert!(!result.admitted);
    }
}
