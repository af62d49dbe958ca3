//! Anthropic Messages API adapter. Anthropic's wire shape differs from the
//! OpenAI-compatible one this crate's [`crate::models`] types follow, so
//! this adapter translates both directions and folds system messages into
//! Anthropic's dedicated `system` field.

use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::ProviderError;
use crate::models::{ChatRequest, Message, Role, StreamChunk, Usage};
use crate::provider::{ChunkStream, GenerateResult, LanguageModel, ProviderId, UsageFuture};

use super::http_client::{map_error_response, AuthStrategy, HttpProviderClient};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicModel {
    http: HttpProviderClient,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    content: Vec<AnthropicContent>,
    model: String,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicModel {
    pub fn new(api_key: &str, base_url: Option<String>, timeout: std::time::Duration) -> Result<Self, ProviderError> {
        let mut headers = std::collections::HashMap::new();
        headers.insert("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string());
        let http = HttpProviderClient::new(
            timeout,
            base_url,
            "https://api.anthropic.com",
            &headers,
            AuthStrategy::Header { name: "x-api-key".to_string(), value: api_key.to_string() },
        )?;
        Ok(Self { http })
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> AnthropicRequest {
        let mut messages = Vec::new();
        let mut system = String::new();

        for msg in &request.messages {
            match msg.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&msg.content);
                }
                Role::User => messages.push(AnthropicMessage { role: "user".to_string(), content: msg.content.clone() }),
                Role::Assistant => {
                    messages.push(AnthropicMessage { role: "assistant".to_string(), content: msg.content.clone() })
                }
            }
        }

        AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(4096),
            messages,
            system: if system.is_empty() { None } else { Some(system) },
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop.clone(),
            stream: Some(stream),
        }
    }
}

fn message_from_content(content: Vec<AnthropicContent>) -> Message {
    let text = content.into_iter().map(|c| c.text).collect::<Vec<_>>().join("");
    Message::assistant(text)
}

#[async_trait::async_trait]
impl LanguageModel for AnthropicModel {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn generate(&self, request: &ChatRequest) -> Result<GenerateResult, ProviderError> {
        let anthropic_request = self.build_request(request, false);
        let response: AnthropicResponse = self.http.post_json("/v1/messages", &anthropic_request).await?;
        let message = message_from_content(response.content);
        Ok(GenerateResult {
            text: message.content,
            usage: Usage {
                prompt_tokens: response.usage.input_tokens,
                completion_tokens: response.usage.output_tokens,
                total_tokens: response.usage.input_tokens + response.usage.output_tokens,
            },
        })
    }

    async fn stream(&self, request: &ChatRequest) -> Result<(ChunkStream, UsageFuture), ProviderError> {
        let anthropic_request = self.build_request(request, true);
        let response = self.http.post_json_raw("/v1/messages", &anthropic_request).await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let model = request.model.clone();
        let (usage_tx, usage_rx) = oneshot::channel::<Result<Usage, ProviderError>>();

        let chunks: ChunkStream = Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut input_tokens = 0u32;
            let mut output_tokens = 0u32;

            while let Some(chunk_result) = bytes_stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(line_end) = buffer.find('\n') {
                            let line = buffer[..line_end].trim().to_string();
                            buffer = buffer[line_end + 1..].to_string();
                            let Some(json_str) = line.strip_prefix("data: ") else { continue };

                            match serde_json::from_str::<serde_json::Value>(json_str) {
                                Ok(event) => {
                                    let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");
                                    match event_type {
                                        "message_start" => {
                                            if let Some(tokens) = event.pointer("/message/usage/input_tokens").and_then(|v| v.as_u64()) {
                                                input_tokens = tokens as u32;
                                            }
                                        }
                                        "content_block_delta" => {
                                            if let Some(text) = event.pointer("/delta/text").and_then(|t| t.as_str()) {
                                                yield Ok(StreamChunk {
                                                    id: "anthropic-stream".to_string(),
                                                    object: "chat.completion.chunk".to_string(),
                                                    created: crate::registry::now_ms() / 1000,
                                                    model: model.clone(),
                                                    choices: vec![crate::models::StreamChoice {
                                                        index: 0,
                                                        delta: crate::models::Delta { role: None, content: Some(text.to_string()) },
                                                        finish_reason: None,
                                                    }],
                                                    usage: None,
                                                });
                                            }
                                        }
                                        "message_delta" => {
                                            if let Some(tokens) = event.pointer("/usage/output_tokens").and_then(|v| v.as_u64()) {
                                                output_tokens = tokens as u32;
                                            }
                                        }
                                        "message_stop" => {
                                            let _ = usage_tx.send(Ok(Usage {
                                                prompt_tokens: input_tokens,
                                                completion_tokens: output_tokens,
                                                total_tokens: input_tokens + output_tokens,
                                            }));
                                            return;
                                        }
                                        _ => {}
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
            let _ = usage_tx.send(Ok(Usage { prompt_tokens: input_tokens, completion_tokens: output_tokens, total_tokens: input_tokens + output_tokens }));
        });

        let usage_future: UsageFuture = Box::pin(async move {
            usage_rx.await.unwrap_or(Err(ProviderError::InvalidResponse))
        });

        Ok((chunks, usage_future))
    }
}
