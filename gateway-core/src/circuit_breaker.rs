//! Per-provider health state machine: Closed / Open / HalfOpen.
//!
//! The half-open probe admission is a compare-and-set on the state itself:
//! the thread whose `compare_exchange(Open, HalfOpen, ..)` succeeds is the
//! one and only probe for that cooldown window. Every other concurrent
//! caller observes either `Open` (cooldown not elapsed) or `HalfOpen`
//! (someone else already won the race) and is rejected either way.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "crate::duration_serde")]
    pub cooldown_base: Duration,
    #[serde(with = "crate::duration_serde")]
    pub cooldown_max: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_base: Duration::from_secs(30),
            cooldown_max: Duration::from_secs(300),
        }
    }
}

struct Cooldown {
    until: Instant,
    current: Duration,
}

/// Health state machine for a single provider.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    cooldown: Mutex<Cooldown>,
}

/// Outcome of an admission check against the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Admitted as the single half-open probe for this cooldown window.
    AdmitAsProbe,
    Reject,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let base = config.cooldown_base;
        Self {
            name: name.into(),
            config,
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicU32::new(0),
            cooldown: Mutex::new(Cooldown {
                until: Instant::now(),
                current: base,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Whether a call would be admitted right now, without performing the
    /// half-open compare-and-set. Used to decide candidacy for ranking; the
    /// actual gate (and the probe CAS) is [`Self::check_admission`].
    pub fn would_admit(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooldown = self.cooldown.lock().unwrap();
                Instant::now() >= cooldown.until
            }
        }
    }

    /// Whether a new call may be admitted right now. Exactly one concurrent
    /// caller sees `AdmitAsProbe` per cooldown window.
    pub fn check_admission(&self) -> Admission {
        match self.state() {
            CircuitState::Closed => Admission::Admit,
            CircuitState::HalfOpen => Admission::Reject,
            CircuitState::Open => {
                let elapsed = {
                    let cooldown = self.cooldown.lock().unwrap();
                    Instant::now() >= cooldown.until
                };
                if !elapsed {
                    return Admission::Reject;
                }
                match self.state.compare_exchange(
                    STATE_OPEN,
                    STATE_HALF_OPEN,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        tracing::info!(provider = %self.name, "circuit half-open, admitting probe");
                        Admission::AdmitAsProbe
                    }
                    Err(_) => Admission::Reject,
                }
            }
        }
    }

    pub fn on_success(&self) {
        let prior = self.state.swap(STATE_CLOSED, Ordering::AcqRel);
        self.consecutive_failures.store(0, Ordering::Release);
        if prior == STATE_HALF_OPEN {
            let mut cooldown = self.cooldown.lock().unwrap();
            cooldown.current = self.config.cooldown_base;
            tracing::info!(provider = %self.name, "circuit closed after successful probe");
        }
    }

    pub fn on_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let was_half_open = self.state.load(Ordering::Acquire) == STATE_HALF_OPEN;

        if was_half_open {
            let mut cooldown = self.cooldown.lock().unwrap();
            cooldown.current = (cooldown.current * 2).min(self.config.cooldown_max);
            cooldown.until = Instant::now() + cooldown.current;
            self.state.store(STATE_OPEN, Ordering::Release);
            tracing::warn!(provider = %self.name, cooldown_ms = cooldown.current.as_millis() as u64, "probe failed, circuit re-opened");
            return;
        }

        if failures >= self.config.failure_threshold
            && self.state.load(Ordering::Acquire) == STATE_CLOSED
        {
            let mut cooldown = self.cooldown.lock().unwrap();
            cooldown.current = self.config.cooldown_base;
            cooldown.until = Instant::now() + cooldown.current;
            self.state.store(STATE_OPEN, Ordering::Release);
            tracing::warn!(provider = %self.name, failures, "circuit opened");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cb(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown_base: Duration::from_millis(50),
                cooldown_max: Duration::from_secs(1),
            },
        )
    }

    #[test]
    fn opens_exactly_at_threshold() {
        let breaker = cb(3);
        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn rejects_all_while_open() {
        let breaker = cb(1);
        breaker.on_failure();
        assert_eq!(breaker.check_admission(), Admission::Reject);
    }

    #[test]
    fn would_admit_reflects_elapsed_cooldown_without_mutating_state() {
        let breaker = cb(1);
        breaker.on_failure();
        assert!(!breaker.would_admit());
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.would_admit());
        // peeking must not itself perform the half-open CAS
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.check_admission(), Admission::AdmitAsProbe);
    }

    #[test]
    fn admits_single_probe_after_cooldown() {
        let breaker = cb(1);
        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.check_admission(), Admission::AdmitAsProbe);
        // immediately afterwards, state is HalfOpen and further concurrent
        // attempts are rejected until resolution.
        assert_eq!(breaker.check_admission(), Admission::Reject);
    }

    #[test]
    fn probe_success_closes_circuit_and_resets_failures() {
        let breaker = cb(1);
        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.check_admission(), Admission::AdmitAsProbe);
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn probe_failure_reopens_with_longer_cooldown() {
        let breaker = cb(1);
        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.check_admission(), Admission::AdmitAsProbe);
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        // cooldown should now be 2x base (100ms); not elapsed yet at +60ms
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.check_admission(), Admission::Reject);
    }

    #[test]
    fn only_one_concurrent_caller_wins_the_probe() {
        use std::sync::Arc;
        let breaker = Arc::new(cb(1));
        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(60));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let breaker = breaker.clone();
            handles.push(std::thread::spawn(move || breaker.check_admission()));
        }
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| *a == Admission::AdmitAsProbe)
            .count();
        assert_eq!(admitted, 1);
    }
}
