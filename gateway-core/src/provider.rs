//! The abstract capability the routing engine dispatches against, and the
//! static pricing table used for cost accounting.
//!
//! Concrete provider adapters (HTTP calls to OpenAI/Anthropic/Google) are
//! intentionally kept outside this module; everything here only knows about
//! the `LanguageModel` capability.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

use futures::Stream;

use crate::error::ProviderError;
use crate::models::{ChatRequest, StreamChunk, Usage};

/// One of the three upstream providers this gateway knows how to route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Google => "google",
        }
    }

    pub fn all() -> [ProviderId; 3] {
        [ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Google]
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderId::OpenAi),
            "anthropic" => Ok(ProviderId::Anthropic),
            "google" => Ok(ProviderId::Google),
            other => Err(ProviderError::Configuration {
                message: format!("unknown provider: {other}"),
            }),
        }
    }
}

/// A completed (non-streaming) generation.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub text: String,
    pub usage: Usage,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;
pub type UsageFuture = Pin<Box<dyn Future<Output = Result<Usage, ProviderError>> + Send>>;

/// The capability the dispatch engine depends on. Concrete adapters live
/// outside the core and implement this against a real provider's REST API.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    async fn generate(&self, request: &ChatRequest) -> Result<GenerateResult, ProviderError>;

    /// Returns the chunk stream immediately, plus a future resolving to the
    /// final usage once the stream is fully drained. Dispatch must await the
    /// usage future only after the last chunk has been emitted.
    async fn stream(&self, request: &ChatRequest) -> Result<(ChunkStream, UsageFuture), ProviderError>;
}

/// An embedding capability, analogous in shape to `LanguageModel`, consumed
/// only by the semantic cache.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PricingEntry {
    pub provider: ProviderId,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Conservative pricing used when a model id is not in the table. Callers
/// should treat a cost computed from this entry as an estimate, not a
/// contractual figure.
pub const DEFAULT_PRICING: PricingEntry = PricingEntry {
    provider: ProviderId::OpenAi,
    input_per_1k: 0.01,
    output_per_1k: 0.03,
};

fn pricing_table() -> &'static HashMap<&'static str, PricingEntry> {
    static TABLE: OnceLock<HashMap<&'static str, PricingEntry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(
            "gpt-4o",
            PricingEntry {
                provider: ProviderId::OpenAi,
                input_per_1k: 0.0025,
                output_per_1k: 0.01,
            },
        );
        m.insert(
            "gpt-4o-mini",
            PricingEntry {
                provider: ProviderId::OpenAi,
                input_per_1k: 0.00015,
                output_per_1k: 0.0006,
            },
        );
        m.insert(
            "gpt-3.5-turbo",
            PricingEntry {
                provider: ProviderId::OpenAi,
                input_per_1k: 0.0005,
                output_per_1k: 0.0015,
            },
        );
        m.insert(
            "claude-3-5-sonnet-20241022",
            PricingEntry {
                provider: ProviderId::Anthropic,
                input_per_1k: 0.003,
                output_per_1k: 0.015,
            },
        );
        m.insert(
            "claude-3-haiku-20240307",
            PricingEntry {
                provider: ProviderId::Anthropic,
                input_per_1k: 0.00025,
                output_per_1k: 0.00125,
            },
        );
        m.insert(
            "gemini-1.5-pro",
            PricingEntry {
                provider: ProviderId::Google,
                input_per_1k: 0.00125,
                output_per_1k: 0.005,
            },
        );
        m.insert(
            "gemini-1.5-flash",
            PricingEntry {
                provider: ProviderId::Google,
                input_per_1k: 0.000075,
                output_per_1k: 0.0003,
            },
        );
        m
    })
}

/// Looks up pricing and owning provider for a model id, falling back to a
/// provider guessed from a well-known id prefix, and finally to
/// `DEFAULT_PRICING` when nothing matches.
pub fn pricing_for(model_id: &str) -> PricingEntry {
    if let Some(entry) = pricing_table().get(model_id) {
        return *entry;
    }
    match provider_for_model(model_id) {
        Some(provider) => PricingEntry {
            provider,
            ..DEFAULT_PRICING
        },
        None => DEFAULT_PRICING,
    }
}

/// Capability match: which provider owns a model id, by well-known prefix.
pub fn provider_for_model(model_id: &str) -> Option<ProviderId> {
    if pricing_table().contains_key(model_id) {
        return Some(pricing_table()[model_id].provider);
    }
    if model_id.starts_with("gpt-") || model_id.starts_with("o1") || model_id.starts_with("o3") {
        Some(ProviderId::OpenAi)
    } else if model_id.starts_with("claude-") {
        Some(ProviderId::Anthropic)
    } else if model_id.starts_with("gemini-") {
        Some(ProviderId::Google)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_table_pricing() {
        let p = pricing_for("gpt-4o");
        assert_eq!(p.provider, ProviderId::OpenAi);
        assert!((p.input_per_1k - 0.0025).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_with_known_prefix_falls_back_to_default_pricing_but_right_provider() {
        let p = pricing_for("claude-unreleased-model");
        assert_eq!(p.provider, ProviderId::Anthropic);
        assert_eq!(p.input_per_1k, DEFAULT_PRICING.input_per_1k);
    }

    #[test]
    fn fully_unknown_model_uses_default() {
        let p = pricing_for("some-random-thing");
        assert_eq!(p.provider, DEFAULT_PRICING.provider);
    }
}
