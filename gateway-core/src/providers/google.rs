//! Google Gemini (generativelanguage.googleapis.com) adapter. Gemini's
//! `generateContent`/`streamGenerateContent` wire shape is unrelated to the
//! OpenAI-compatible one this crate's [`crate::models`] types follow, so
//! this adapter fully translates both directions.

use async_stream::stream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::ProviderError;
use crate::models::{ChatRequest, Role, StreamChunk, Usage};
use crate::provider::{ChunkStream, GenerateResult, LanguageModel, ProviderId, UsageFuture};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleModel {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxOutputTokens")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "topP")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "stopSequences")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "systemInstruction")]
    system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Deserialize, Default)]
struct GeminiUsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: GeminiUsageMetadata,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize, Default)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

impl GoogleModel {
    pub fn new(api_key: &str, base_url: Option<String>, timeout: std::time::Duration) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ProviderError::Configuration { message: format!("failed to create HTTP client: {e}") }
        })?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: api_key.to_string(),
        })
    }

    fn build_request(&self, request: &ChatRequest) -> GeminiRequest {
        let mut contents = Vec::new();
        let mut system_instruction = None;

        for msg in &request.messages {
            match msg.role {
                Role::System => {
                    system_instruction = Some(GeminiContent {
                        role: "system".to_string(),
                        parts: vec![GeminiPart { text: msg.content.clone() }],
                    });
                }
                Role::User => contents.push(GeminiContent {
                    role: "user".to_string(),
                    parts: vec![GeminiPart { text: msg.content.clone() }],
                }),
                Role::Assistant => contents.push(GeminiContent {
                    role: "model".to_string(),
                    parts: vec![GeminiPart { text: msg.content.clone() }],
                }),
            }
        }

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                top_p: request.top_p,
                stop_sequences: request.stop.clone(),
            },
        }
    }

    async fn handle_error_response(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status();
        match response.text().await {
            Ok(body) => {
                let message = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.get("error").and_then(|e| e.get("message")).and_then(|m| m.as_str().map(str::to_string)))
                    .unwrap_or(body);
                match status.as_u16() {
                    401 | 403 => ProviderError::InvalidApiKey,
                    404 => ProviderError::ModelNotFound { model: "unknown".to_string() },
                    429 => ProviderError::RateLimit,
                    code => ProviderError::Api { code, message },
                }
            }
            Err(_) => ProviderError::Api { code: status.as_u16(), message: "failed to read error response".to_string() },
        }
    }
}

fn usage_from(metadata: &GeminiUsageMetadata) -> Usage {
    Usage {
        prompt_tokens: metadata.prompt_token_count,
        completion_tokens: metadata.candidates_token_count,
        total_tokens: metadata.prompt_token_count + metadata.candidates_token_count,
    }
}

fn text_from_candidates(candidates: &[GeminiCandidate]) -> String {
    candidates
        .first()
        .map(|c| c.content.parts.iter().map(|p| p.text.clone()).collect::<Vec<_>>().join(""))
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl LanguageModel for GoogleModel {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Google
    }

    async fn generate(&self, request: &ChatRequest) -> Result<GenerateResult, ProviderError> {
        let gemini_request = self.build_request(request);
        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, request.model, self.api_key);
        let response = self.client.post(&url).json(&gemini_request).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error_response(response).await);
        }
        let parsed: GeminiResponse = response.json().await?;
        Ok(GenerateResult { text: text_from_candidates(&parsed.candidates), usage: usage_from(&parsed.usage_metadata) })
    }

    async fn stream(&self, request: &ChatRequest) -> Result<(ChunkStream, UsageFuture), ProviderError> {
        let gemini_request = self.build_request(request);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, request.model, self.api_key
        );
        let response = self.client.post(&url).json(&gemini_request).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error_response(response).await);
        }

        let model = request.model.clone();
        let (usage_tx, usage_rx) = oneshot::channel::<Result<Usage, ProviderError>>();

        let chunks: ChunkStream = Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut last_usage = Usage::default();

            while let Some(chunk_result) = bytes_stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(line_end) = buffer.find('\n') {
                            let line = buffer[..line_end].trim().to_string();
                            buffer = buffer[line_end + 1..].to_string();
                            let Some(json_str) = line.strip_prefix("data: ") else { continue };

                            match serde_json::from_str::<GeminiResponse>(json_str) {
                                Ok(parsed) => {
                                    last_usage = usage_from(&parsed.usage_metadata);
                                    let text = text_from_candidates(&parsed.candidates);
                                    if !text.is_empty() {
                                        yield Ok(StreamChunk {
                                            id: "gemini-stream".to_string(),
                                            object: "chat.completion.chunk".to_string(),
                                            created: crate::registry::now_ms() / 1000,
                                            model: model.clone(),
                                            choices: vec![crate::models::StreamChoice {
                                                index: 0,
                                                delta: crate::models::Delta { role: None, content: Some(text) },
                                                finish_reason: None,
                                            }],
                                            usage: None,
                                        });
                                    }
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
            let _ = usage_tx.send(Ok(last_usage));
        });

        let usage_future: UsageFuture = Box::pin(async move {
            usage_rx.await.unwrap_or(Err(ProviderError::InvalidResponse))
        });

        Ok((chunks, usage_future))
    }
}
