//! OpenAI embeddings adapter backing the semantic cache's [`crate::provider::Embedder`]
//! capability.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::provider::Embedder;
use crate::providers::http_client::{AuthStrategy, HttpProviderClient};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiEmbedder {
    http: HttpProviderClient,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: &str,
        base_url: Option<String>,
        model: impl Into<String>,
        dimensions: usize,
        timeout: std::time::Duration,
    ) -> Result<Self, ProviderError> {
        let http = HttpProviderClient::new(
            timeout,
            base_url,
            DEFAULT_BASE_URL,
            &Default::default(),
            AuthStrategy::Bearer { token: api_key.to_string() },
        )?;
        Ok(Self { http, model: model.into(), dimensions })
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbeddingRequest { model: &self.model, input: text };
        let response: EmbeddingResponse = self.http.post_json("/embeddings", &request).await?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(ProviderError::InvalidResponse)?;
        if embedding.len() != self.dimensions {
            return Err(ProviderError::InvalidResponse);
        }
        Ok(embedding)
    }
}
