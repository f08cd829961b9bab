// ── OpenAI-compatible provider ────────────────────────────────────────────
// Works for OpenAI, OpenRouter, Ollama, DeepSeek, Grok, Mistral, Moonshot,
// and any other OpenAI-compatible chat-completions API. Adapted
// near-verbatim from the teacher's `engine/providers.rs::OpenAiProvider` —
// spec §4.3's provider contract matches the same request/SSE shape.

use futures::StreamExt;
use log::{error, info, warn};
use reqwest::Client;
use serde_json::{json, Value};

use crate::atoms::constants::MAX_RETRIES;
use crate::atoms::types::ProviderConfig;
use crate::providers::http::{is_retryable_status, retry_delay, CircuitBreaker, RequestAuditLog};
use crate::providers::messages::{ContentBlock, Message, MessageContent, StreamChunk, ToolCallDelta, ToolDefinition, TokenUsage};

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    provider_id: String,
}

impl OpenAiProvider {
    pub fn new(client: Client, config: &ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.kind.default_base_url().to_string());
        OpenAiProvider { client, base_url, api_key: config.api_key.clone(), provider_id: config.id.clone() }
    }

    fn format_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let content_val = match &msg.content {
                    MessageContent::Text(s) => json!(s),
                    MessageContent::Blocks(blocks) => {
                        let parts: Vec<Value> = blocks
                            .iter()
                            .map(|b| match b {
                                ContentBlock::Text { text } => json!({"type": "text", "text": text}),
                                ContentBlock::ImageUrl { image_url } => json!({
                                    "type": "image_url",
                                    "image_url": {
                                        "url": image_url.url,
                                        "detail": image_url.detail.as_deref().unwrap_or("auto"),
                                    }
                                }),
                            })
                            .collect();
                        json!(parts)
                    }
                };
                let mut m = json!({
                    "role": msg.role.to_string(),
                    "content": content_val,
                });
                if let Some(tc) = &msg.tool_calls {
                    m["tool_calls"] = json!(tc);
                }
                if let Some(id) = &msg.tool_call_id {
                    m["tool_call_id"] = json!(id);
                }
                if let Some(name) = &msg.name {
                    m["name"] = json!(name);
                }
                m
            })
            .collect()
    }

    fn format_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": t.tool_type,
                    "function": {
                        "name": t.function.name,
                        "description": t.function.description,
                        "parameters": t.function.parameters,
                    }
                })
            })
            .collect()
    }

    fn parse_sse_chunk(data: &str) -> Option<StreamChunk> {
        if data == "[DONE]" {
            return None;
        }

        let v: Value = serde_json::from_str(data).ok()?;
        let choice = v["choices"].get(0)?;
        let delta = &choice["delta"];
        let finish_reason = choice["finish_reason"].as_str().map(|s| s.to_string());
        let delta_text = delta["content"].as_str().map(|s| s.to_string());

        let mut tool_calls = Vec::new();
        if let Some(tcs) = delta["tool_calls"].as_array() {
            for tc in tcs {
                let index = tc["index"].as_u64().unwrap_or(0) as usize;
                let id = tc["id"].as_str().map(|s| s.to_string());
                let func = &tc["function"];
                let function_name = func["name"].as_str().map(|s| s.to_string());
                let arguments_delta = func["arguments"].as_str().map(|s| s.to_string());
                tool_calls.push(ToolCallDelta { index, id, function_name, arguments_delta });
            }
        }

        let usage = v.get("usage").and_then(|u| {
            let input = u["prompt_tokens"].as_u64().unwrap_or(0);
            let output = u["completion_tokens"].as_u64().unwrap_or(0);
            if input > 0 || output > 0 {
                Some(TokenUsage { input_tokens: input, output_tokens: output, total_tokens: u["total_tokens"].as_u64().unwrap_or(input + output) })
            } else {
                None
            }
        });

        Some(StreamChunk { delta_text, tool_calls, finish_reason, usage, ..Default::default() })
    }

    pub async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
        temperature: Option<f64>,
        circuit_breaker: &CircuitBreaker,
        audit_log: &RequestAuditLog,
    ) -> Result<Vec<StreamChunk>, String> {
        circuit_breaker.check()?;

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let mut body = json!({
            "model": model,
            "messages": Self::format_messages(messages),
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !tools.is_empty() {
            body["tools"] = json!(Self::format_tools(tools));
        }
        if let Some(temp) = temperature {
            body["temperature"] = json!(temp);
        }

        info!("[provider:openai:{}] request to {} model={}", self.provider_id, url, model);
        let body_bytes = serde_json::to_vec(&body).unwrap_or_default();

        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1, None).await;
                warn!("[provider:openai:{}] retry {}/{} after {}ms", self.provider_id, attempt, MAX_RETRIES, delay.as_millis());
            }

            let hash = audit_log.sign_and_log(&self.provider_id, model, &body_bytes);

            let response = match self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    circuit_breaker.record_failure();
                    last_error = format!("HTTP request failed: {}", e);
                    if attempt < MAX_RETRIES {
                        continue;
                    }
                    return Err(last_error);
                }
            };

            let status = response.status().as_u16();
            audit_log.update_last_status(status);
            let _ = hash;

            if !response.status().is_success() {
                circuit_breaker.record_failure();
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(crate::providers::http::parse_retry_after);
                let body_text = response.text().await.unwrap_or_default();
                last_error = format!("API error {}: {}", status, &body_text[..body_text.len().min(200)]);
                error!("[provider:openai:{}] error {}: {}", self.provider_id, status, &body_text[..body_text.len().min(500)]);
                if is_retryable_status(status) && attempt < MAX_RETRIES {
                    let _ = retry_delay(attempt, retry_after).await;
                    continue;
                }
                return Err(last_error);
            }

            circuit_breaker.record_success();

            let mut chunks = Vec::new();
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(result) = byte_stream.next().await {
                let bytes = result.map_err(|e| format!("Stream read error: {}", e))?;
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if let Some(data) = line.strip_prefix("data: ") {
                        if let Some(chunk) = Self::parse_sse_chunk(data) {
                            chunks.push(chunk);
                        } else if data == "[DONE]" {
                            return Ok(chunks);
                        }
                    }
                }
            }

            return Ok(chunks);
        }

        Err(last_error)
    }
}
