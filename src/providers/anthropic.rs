// ── Anthropic provider ─────────────────────────────────────────────────────
// Adapted near-verbatim from `engine/providers.rs::AnthropicProvider`.

use futures::StreamExt;
use log::{error, info, warn};
use reqwest::Client;
use serde_json::{json, Value};

use crate::atoms::constants::MAX_RETRIES;
use crate::atoms::types::ProviderConfig;
use crate::providers::http::{is_retryable_status, retry_delay, CircuitBreaker, RequestAuditLog};
use crate::providers::messages::{ContentBlock, Message, MessageContent, Role, StreamChunk, ToolCallDelta, ToolDefinition, TokenUsage};

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    provider_id: String,
}

impl AnthropicProvider {
    pub fn new(client: Client, config: &ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.kind.default_base_url().to_string());
        AnthropicProvider { client, base_url, api_key: config.api_key.clone(), provider_id: config.id.clone() }
    }

    fn format_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system = None;
        let mut formatted = Vec::new();

        for msg in messages {
            if msg.role == Role::System {
                system = Some(msg.content.as_text());
                continue;
            }

            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "user",
                _ => "user",
            };

            if msg.role == Role::Tool {
                if let Some(tc_id) = &msg.tool_call_id {
                    formatted.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": tc_id,
                            "content": msg.content.as_text(),
                        }]
                    }));
                }
            } else if msg.role == Role::Assistant {
                if let Some(tool_calls) = &msg.tool_calls {
                    let mut content_blocks: Vec<Value> = vec![];
                    let text = msg.content.as_text();
                    if !text.is_empty() {
                        content_blocks.push(json!({"type": "text", "text": text}));
                    }
                    for tc in tool_calls {
                        let input: Value = serde_json::from_str(&tc.function.arguments).unwrap_or(json!({}));
                        content_blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.function.name,
                            "input": input,
                        }));
                    }
                    formatted.push(json!({"role": "assistant", "content": content_blocks}));
                } else {
                    formatted.push(json!({"role": role, "content": msg.content.as_text()}));
                }
            } else {
                match &msg.content {
                    MessageContent::Blocks(blocks) => {
                        let mut content_blocks: Vec<Value> = Vec::new();
                        for block in blocks {
                            match block {
                                ContentBlock::Text { text } => content_blocks.push(json!({"type": "text", "text": text})),
                                ContentBlock::ImageUrl { image_url } => {
                                    if let Some(rest) = image_url.url.strip_prefix("data:") {
                                        if let Some((media_type, b64)) = rest.split_once(";base64,") {
                                            content_blocks.push(json!({
                                                "type": "image",
                                                "source": {"type": "base64", "media_type": media_type, "data": b64}
                                            }));
                                        }
                                    } else {
                                        content_blocks.push(json!({"type": "image", "source": {"type": "url", "url": image_url.url}}));
                                    }
                                }
                            }
                        }
                        formatted.push(json!({"role": role, "content": content_blocks}));
                    }
                    MessageContent::Text(s) => formatted.push(json!({"role": role, "content": s})),
                }
            }
        }

        (system, formatted)
    }

    fn format_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| json!({"name": t.function.name, "description": t.function.description, "input_schema": t.function.parameters}))
            .collect()
    }

    fn parse_sse_event(data: &str) -> Option<StreamChunk> {
        let v: Value = serde_json::from_str(data).ok()?;
        let event_type = v["type"].as_str()?;

        match event_type {
            "content_block_delta" => {
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => Some(StreamChunk { delta_text: delta["text"].as_str().map(|s| s.to_string()), ..Default::default() }),
                    "input_json_delta" => {
                        let index = v["index"].as_u64().unwrap_or(0) as usize;
                        Some(StreamChunk {
                            tool_calls: vec![ToolCallDelta { index, arguments_delta: delta["partial_json"].as_str().map(|s| s.to_string()), ..Default::default() }],
                            ..Default::default()
                        })
                    }
                    _ => None,
                }
            }
            "content_block_start" => {
                let block = &v["content_block"];
                if block["type"].as_str().unwrap_or("") == "tool_use" {
                    let index = v["index"].as_u64().unwrap_or(0) as usize;
                    Some(StreamChunk {
                        tool_calls: vec![ToolCallDelta {
                            index,
                            id: block["id"].as_str().map(|s| s.to_string()),
                            function_name: block["name"].as_str().map(|s| s.to_string()),
                            arguments_delta: None,
                        }],
                        ..Default::default()
                    })
                } else {
                    None
                }
            }
            "message_delta" => {
                let stop_reason = v["delta"]["stop_reason"].as_str().map(|s| s.to_string());
                let usage = v.get("usage").and_then(|u| {
                    let output = u["output_tokens"].as_u64().unwrap_or(0);
                    if output > 0 { Some(TokenUsage { input_tokens: 0, output_tokens: output, total_tokens: output }) } else { None }
                });
                Some(StreamChunk { finish_reason: stop_reason, usage, ..Default::default() })
            }
            "message_start" => {
                let usage = v.get("message").and_then(|m| m.get("usage")).and_then(|u| {
                    let input = u["input_tokens"].as_u64().unwrap_or(0);
                    if input > 0 { Some(TokenUsage { input_tokens: input, output_tokens: 0, total_tokens: input }) } else { None }
                });
                Some(StreamChunk { usage, ..Default::default() })
            }
            "message_stop" => Some(StreamChunk { finish_reason: Some("stop".into()), ..Default::default() }),
            _ => None,
        }
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

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let (system, formatted_messages) = Self::format_messages(messages);

        let mut body = json!({
            "model": model,
            "messages": formatted_messages,
            "max_tokens": 8192,
            "stream": true,
        });
        if let Some(sys) = system {
            body["system"] = json!(sys);
        }
        if !tools.is_empty() {
            body["tools"] = json!(Self::format_tools(tools));
        }
        if let Some(temp) = temperature {
            body["temperature"] = json!(temp);
        }

        info!("[provider:anthropic:{}] request to {} model={}", self.provider_id, url, model);
        let body_bytes = serde_json::to_vec(&body).unwrap_or_default();

        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1, None).await;
                warn!("[provider:anthropic:{}] retry {}/{} after {}ms", self.provider_id, attempt, MAX_RETRIES, delay.as_millis());
            }

            audit_log.sign_and_log(&self.provider_id, model, &body_bytes);

            let response = match self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
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

            if !response.status().is_success() {
                circuit_breaker.record_failure();
                let body_text = response.text().await.unwrap_or_default();
                last_error = format!("API error {}: {}", status, &body_text[..body_text.len().min(200)]);
                error!("[provider:anthropic:{}] error {}: {}", self.provider_id, status, &body_text[..body_text.len().min(500)]);
                if is_retryable_status(status) && attempt < MAX_RETRIES {
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
                        if let Some(chunk) = Self::parse_sse_event(data) {
                            chunks.push(chunk);
                        }
                    }
                }
            }

            return Ok(chunks);
        }

        Err(last_error)
    }
}
