//! Per-provider latency tracking: a fixed-capacity ring of successful-call
//! samples feeding both an EMA and nearest-rank percentiles, plus a bounded
//! ring of full records (including failures) for introspection.

use std::collections::VecDeque;
use std::sync::RwLock;

use dashmap::DashMap;

use crate::provider::ProviderId;

const DEFAULT_RING_CAPACITY: usize = 100;
const DEFAULT_EMA_ALPHA: f64 = 0.3;
const RECORD_RING_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct LatencyRecord {
    pub model: String,
    pub ttfb_ms: u64,
    pub total_ms: u64,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyStats {
    pub sample_count: usize,
    pub ema_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

struct ProviderLatency {
    samples: VecDeque<u64>,
    ema_ms: Option<f64>,
    records: VecDeque<LatencyRecord>,
    capacity: usize,
    alpha: f64,
}

impl ProviderLatency {
    fn new(capacity: usize, alpha: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            ema_ms: None,
            records: VecDeque::with_capacity(RECORD_RING_CAPACITY),
            capacity,
            alpha,
        }
    }

    fn push_sample(&mut self, total_ms: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(total_ms);
        self.ema_ms = Some(match self.ema_ms {
            None => total_ms as f64,
            Some(prev) => self.alpha * total_ms as f64 + (1.0 - self.alpha) * prev,
        });
    }

    fn push_record(&mut self, record: LatencyRecord) {
        if self.records.len() == RECORD_RING_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    fn stats(&self) -> LatencyStats {
        if self.samples.is_empty() {
            return LatencyStats::default();
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let nearest_rank = |pct: f64| -> u64 {
            let idx = ((sorted.len() as f64) * pct) as usize;
            let idx = idx.min(sorted.len() - 1);
            sorted[idx]
        };
        LatencyStats {
            sample_count: sorted.len(),
            ema_ms: (self.ema_ms.unwrap_or(0.0) * 100.0).round() / 100.0,
            p50_ms: nearest_rank(0.50),
            p95_ms: nearest_rank(0.95),
            p99_ms: nearest_rank(0.99),
        }
    }
}

/// Tracks rolling latency per provider. Cheap to clone (wraps a `DashMap`
/// behind an `Arc` at the registry level).
pub struct LatencyTracker {
    by_provider: DashMap<ProviderId, RwLock<ProviderLatency>>,
    capacity: usize,
    alpha: f64,
}

impl LatencyTracker {
    pub fn new(capacity: usize, alpha: f64) -> Self {
        Self {
            by_provider: DashMap::new(),
            capacity,
            alpha: alpha.clamp(f64::EPSILON, 1.0),
        }
    }

    fn entry(&self, provider: ProviderId) -> dashmap::mapref::one::RefMut<'_, ProviderId, RwLock<ProviderLatency>> {
        self.by_provider
            .entry(provider)
            .or_insert_with(|| RwLock::new(ProviderLatency::new(self.capacity, self.alpha)))
    }

    /// Record one completed call. Non-finite inputs are rejected as a no-op.
    pub fn record_latency(
        &self,
        provider: ProviderId,
        model: impl Into<String>,
        ttfb_ms: u64,
        total_ms: u64,
        success: bool,
    ) {
        if !(total_ms as f64).is_finite() || !(ttfb_ms as f64).is_finite() {
            tracing::warn!(provider = %provider, "rejected non-finite latency sample");
            return;
        }
        let model = model.into();
        let entry = self.entry(provider);
        let mut inner = entry.write().unwrap();
        inner.push_record(LatencyRecord {
            model,
            ttfb_ms,
            total_ms,
            success,
        });
        if success {
            inner.push_sample(total_ms);
        }
    }

    pub fn get_stats(&self, provider: ProviderId) -> LatencyStats {
        match self.by_provider.get(&provider) {
            Some(entry) => entry.read().unwrap().stats(),
            None => LatencyStats::default(),
        }
    }
}
