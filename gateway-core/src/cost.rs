//! Cost accounting: per-request USD computation, running totals, and a
//! one-shot threshold alert latch.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::provider::{pricing_for, ProviderId};

const RECENT_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
pub struct CostRecord {
    pub provider: ProviderId,
    pub model_id: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub ts_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderCost {
    pub total_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct CostSummary {
    pub total_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub by_provider: HashMap<String, ProviderCost>,
    pub by_model: HashMap<String, ProviderCost>,
    pub recent: Vec<CostRecord>,
}

struct Totals {
    total_usd: f64,
    total_input_tokens: u64,
    total_output_tokens: u64,
    by_provider: HashMap<String, ProviderCost>,
    by_model: HashMap<String, ProviderCost>,
    recent: VecDeque<CostRecord>,
}

pub struct CostTracker {
    threshold_usd: f64,
    alert_fired: AtomicBool,
    total_usd_bits: AtomicU64,
    totals: RwLock<Totals>,
}

impl CostTracker {
    pub fn new(threshold_usd: f64) -> Self {
        Self {
            threshold_usd,
            alert_fired: AtomicBool::new(false),
            total_usd_bits: AtomicU64::new(0f64.to_bits()),
            totals: RwLock::new(Totals {
                total_usd: 0.0,
                total_input_tokens: 0,
                total_output_tokens: 0,
                by_provider: HashMap::new(),
                by_model: HashMap::new(),
                recent: VecDeque::with_capacity(RECENT_CAPACITY),
            }),
        }
    }

    pub fn record(
        &self,
        provider: ProviderId,
        model_id: &str,
        input_tokens: u32,
        output_tokens: u32,
    ) -> CostRecord {
        let pricing = pricing_for(model_id);
        let cost_usd = (input_tokens as f64 / 1000.0) * pricing.input_per_1k
            + (output_tokens as f64 / 1000.0) * pricing.output_per_1k;
        let record = CostRecord {
            provider,
            model_id: model_id.to_string(),
            input_tokens,
            output_tokens,
            cost_usd,
            ts_ms: crate::registry::now_ms(),
        };

        let mut totals = self.totals.write().unwrap();
        totals.total_usd += cost_usd;
        totals.total_input_tokens += input_tokens as u64;
        totals.total_output_tokens += output_tokens as u64;

        let provider_entry = totals.by_provider.entry(provider.as_str().to_string()).or_default();
        provider_entry.total_usd += cost_usd;
        provider_entry.input_tokens += input_tokens as u64;
        provider_entry.output_tokens += output_tokens as u64;

        let model_entry = totals.by_model.entry(model_id.to_string()).or_default();
        model_entry.total_usd += cost_usd;
        model_entry.input_tokens += input_tokens as u64;
        model_entry.output_tokens += output_tokens as u64;

        if totals.recent.len() == RECENT_CAPACITY {
            totals.recent.pop_front();
        }
        totals.recent.push_back(record.clone());

        self.total_usd_bits.store(totals.total_usd.to_bits(), Ordering::Relaxed);

        if totals.total_usd >= self.threshold_usd
            && self.alert_fired.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
        {
            tracing::warn!(
                total_usd = totals.total_usd,
                threshold_usd = self.threshold_usd,
                "cumulative cost crossed configured alert threshold"
            );
        }

        record
    }

    pub fn summary(&self) -> CostSummary {
        let totals = self.totals.read().unwrap();
        CostSummary {
            total_usd: totals.total_usd,
            total_input_tokens: totals.total_input_tokens,
            total_output_tokens: totals.total_output_tokens,
            by_provider: totals.by_provider.clone(),
            by_model: totals.by_model.clone(),
            recent: totals.recent.iter().cloned().collect(),
        }
    }
}
