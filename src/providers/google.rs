// ── Google Gemini provider ─────────────────────────────────────────────────
// Adapted near-verbatim from `engine/providers.rs::GoogleProvider`.

use futures::StreamExt;
use log::{error, info, warn};
use reqwest::Client;
use serde_json::{json, Value};

use crate::atoms::constants::MAX_RETRIES;
use crate::atoms::types::ProviderConfig;
use crate::providers::http::{is_retryable_status, retry_delay, CircuitBreaker, RequestAuditLog};
use crate::providers::messages::{ContentBlock, Message, MessageContent, Role, StreamChunk, ToolCallDelta, ToolDefinition, TokenUsage};

pub struct GoogleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    provider_id: String,
}

impl GoogleProvider {
    pub fn new(client: Client, config: &ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.kind.default_base_url().to_string());
        GoogleProvider { client, base_url, api_key: config.api_key.clone(), provider_id: config.id.clone() }
    }

    fn format_messages(messages: &[Message]) -> (Option<Value>, Vec<Value>) {
        let mut system_instruction = None;
        let mut contents = Vec::new();

        for msg in messages {
            if msg.role == Role::System {
                system_instruction = Some(json!({"parts": [{"text": msg.content.as_text()}]}));
                continue;
            }

            let role = match msg.role {
                Role::User | Role::Tool => "user",
                Role::Assistant => "model",
                _ => "user",
            };

            if msg.role == Role::Tool {
                if let Some(tc_id) = &msg.tool_call_id {
                    let fn_name = msg.name.clone().unwrap_or_else(|| tc_id.clone());
                    contents.push(json!({
                        "role": "function",
                        "parts": [{"functionResponse": {"name": fn_name, "response": {"result": msg.content.as_text()}}}]
                    }));
                }
            } else if msg.role == Role::Assistant {
                if let Some(tool_calls) = &msg.tool_calls {
                    let mut parts: Vec<Value> = vec![];
                    let text = msg.content.as_text();
                    if !text.is_empty() {
                        parts.push(json!({"text": text}));
                    }
                    for tc in tool_calls {
                        let args: Value = serde_json::from_str(&tc.function.arguments).unwrap_or(json!({}));
                        parts.push(json!({"functionCall": {"name": tc.function.name, "args": args}}));
                    }
                    contents.push(json!({"role": "model", "parts": parts}));
                } else {
                    contents.push(json!({"role": role, "parts": [{"text": msg.content.as_text()}]}));
                }
            } else {
                match &msg.content {
                    MessageContent::Blocks(blocks) => {
                        let mut parts: Vec<Value> = Vec::new();
                        for block in blocks {
                            match block {
                                ContentBlock::Text { text } => parts.push(json!({"text": text})),
                                ContentBlock::ImageUrl { image_url } => {
                                    if let Some(rest) = image_url.url.strip_prefix("data:") {
                                        if let Some((mime_type, b64)) = rest.split_once(";base64,") {
                                            parts.push(json!({"inlineData": {"mimeType": mime_type, "data": b64}}));
                                        }
                                    } else {
                                        parts.push(json!({"fileData": {"fileUri": image_url.url}}));
                                    }
                                }
                            }
                        }
                        contents.push(json!({"role": role, "parts": parts}));
                    }
                    MessageContent::Text(s) => contents.push(json!({"role": role, "parts": [{"text": s}]})),
                }
            }
        }

        (system_instruction, contents)
    }

    fn sanitize_schema(val: &Value) -> Value {
        match val {
            Value::Object(map) => {
                let mut clean = serde_json::Map::new();
                for (k, v) in map {
                    if k == "additionalProperties" || k == "$schema" || k == "$ref" {
                        continue;
                    }
                    clean.insert(k.clone(), Self::sanitize_schema(v));
                }
                Value::Object(clean)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(Self::sanitize_schema).collect()),
            other => other.clone(),
        }
    }

    fn format_tools(tools: &[ToolDefinition]) -> Value {
        let function_declarations: Vec<Value> = tools
            .iter()
            .map(|t| json!({"name": t.function.name, "description": t.function.description, "parameters": Self::sanitize_schema(&t.function.parameters)}))
            .collect();
        json!([{"functionDeclarations": function_declarations}])
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

        let url = format!("{}/models/{}:streamGenerateContent?alt=sse&key={}", self.base_url.trim_end_matches('/'), model, self.api_key);
        let (system_instruction, contents) = Self::format_messages(messages);

        let mut body = json!({"contents": contents});
        if let Some(sys) = system_instruction {
            body["systemInstruction"] = sys;
        }
        if !tools.is_empty() {
            body["tools"] = Self::format_tools(tools);
        }
        if let Some(temp) = temperature {
            body["generationConfig"] = json!({"temperature": temp});
        }

        info!("[provider:google:{}] request model={}", self.provider_id, model);
        let body_bytes = serde_json::to_vec(&body).unwrap_or_default();

        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1, None).await;
                warn!("[provider:google:{}] retry {}/{} after {}ms", self.provider_id, attempt, MAX_RETRIES, delay.as_millis());
            }

            audit_log.sign_and_log(&self.provider_id, model, &body_bytes);

            let response = match self.client.post(&url).header("Content-Type", "application/json").json(&body).send().await {
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
                error!("[provider:google:{}] error {}: {}", self.provider_id, status, &body_text[..body_text.len().min(500)]);
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
                        if let Ok(v) = serde_json::from_str::<Value>(data) {
                            if let Some(candidates) = v["candidates"].as_array() {
                                for candidate in candidates {
                                    let content = &candidate["content"];
                                    let finish_reason = candidate["finishReason"].as_str().map(|s| s.to_string());
                                    if let Some(parts) = content["parts"].as_array() {
                                        for part in parts {
                                            if let Some(text) = part["text"].as_str() {
                                                chunks.push(StreamChunk { delta_text: Some(text.to_string()), finish_reason: finish_reason.clone(), ..Default::default() });
                                            }
                                            if let Some(fc) = part.get("functionCall") {
                                                let name = fc["name"].as_str().unwrap_or("").to_string();
                                                let args = fc["args"].clone();
                                                chunks.push(StreamChunk {
                                                    tool_calls: vec![ToolCallDelta {
                                                        index: 0,
                                                        id: Some(format!("call_{}", uuid::Uuid::new_v4())),
                                                        function_name: Some(name),
                                                        arguments_delta: Some(serde_json::to_string(&args).unwrap_or_default()),
                                                    }],
                                                    finish_reason: finish_reason.clone(),
                                                    ..Default::default()
                                                });
                                            }
                                        }
                                    }
                                }
                            }
                            if let Some(um) = v.get("usageMetadata") {
                                let input = um["promptTokenCount"].as_u64().unwrap_or(0);
                                let output = um["candidatesTokenCount"].as_u64().unwrap_or(0);
                                if input > 0 || output > 0 {
                                    chunks.push(StreamChunk {
                                        usage: Some(TokenUsage { input_tokens: input, output_tokens: output, total_tokens: um["totalTokenCount"].as_u64().unwrap_or(input + output) }),
                                        ..Default::default()
                                    });
                                }
                            }
                        }
                    }
                }
            }

            return Ok(chunks);
        }

        Err(last_error)
    }
}
