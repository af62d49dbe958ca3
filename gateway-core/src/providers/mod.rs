//! Concrete [`crate::provider::LanguageModel`] adapters for the three
//! upstream providers this gateway routes to.

pub mod anthropic;
pub mod embedding;
pub mod google;
pub mod http_client;
pub mod openai;

pub use anthropic::AnthropicModel;
pub use embedding::OpenAiEmbedder;
pub use google::GoogleModel;
pub use openai::OpenAiModel;
