//! OpenAI chat completions adapter. The wire schema this crate's
//! [`crate::models`] types already follow is OpenAI's, so this adapter is a
//! thin pass-through over [`HttpProviderClient`].

use async_stream::stream;
use futures::StreamExt;
use tokio::sync::oneshot;

use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, StreamChunk, Usage};
use crate::provider::{ChunkStream, GenerateResult, LanguageModel, ProviderId, UsageFuture};

use super::http_client::{map_error_response, AuthStrategy, HttpProviderClient};

pub struct OpenAiModel {
    http: HttpProviderClient,
}

impl OpenAiModel {
    pub fn new(api_key: &str, base_url: Option<String>, timeout: std::time::Duration) -> Result<Self, ProviderError> {
        let http = HttpProviderClient::new(
            timeout,
            base_url,
            "https://api.openai.com/v1",
            &Default::default(),
            AuthStrategy::Bearer { token: api_key.to_string() },
        )?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiModel {
    fn provider_id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    async fn generate(&self, request: &ChatRequest) -> Result<GenerateResult, ProviderError> {
        let mut request = request.clone();
        request.stream = Some(false);
        let response: ChatResponse = self.http.post_json("/chat/completions", &request).await?;
        let text = response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        Ok(GenerateResult { text, usage: response.usage })
    }

    async fn stream(&self, request: &ChatRequest) -> Result<(ChunkStream, UsageFuture), ProviderError> {
        let mut request = request.clone();
        request.stream = Some(true);

        let response = self.http.post_json_raw("/chat/completions", &request).await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let (usage_tx, usage_rx) = oneshot::channel::<Result<Usage, ProviderError>>();

        let chunks: ChunkStream = Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut last_usage: Option<Usage> = None;

            while let Some(chunk_result) = bytes_stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(line_end) = buffer.find('\n') {
                            let line = buffer[..line_end].trim().to_string();
                            buffer = buffer[line_end + 1..].to_string();
                            let Some(json_str) = line.strip_prefix("data: ") else { continue };
                            if json_str == "[DONE]" {
                                let _ = usage_tx.send(Ok(last_usage.clone().unwrap_or_default()));
                                return;
                            }
                            match serde_json::from_str::<StreamChunk>(json_str) {
                                Ok(chunk) => {
                                    if let Some(usage) = &chunk.usage {
                                        last_usage = Some(usage.clone());
                                    }
                                    yield Ok(chunk);
                                }
                                Err(e) => {
                                    let _ = usage_tx.send(Err(ProviderError::Serialization(e)));
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = usage_tx.send(Err(ProviderError::Http(e)));
                        return;
                    }
                }
            }
            let _ = usage_tx.send(Ok(last_usage.unwrap_or_default()));
        });

        let usage_future: UsageFuture = Box::pin(async move {
            usage_rx.await.unwrap_or(Err(ProviderError::InvalidResponse))
        });

        Ok((chunks, usage_future))
    }
}
