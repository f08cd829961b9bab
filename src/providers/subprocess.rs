// ── Subprocess provider ────────────────────────────────────────────────────
// Spawns a local CLI agent (e.g. a `claude-code`-style binary) in stream-json
// mode and reads newline-delimited JSON events from stdout. New module —
// the wire format is named by spec §4.3 — but the process-spawn/stdio-pipe
// idiom is grounded in the teacher's `engine/tool_executor.rs::execute_exec`.

use log::{info, warn};
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::providers::http::{CircuitBreaker, RequestAuditLog};
use crate::providers::messages::{Message, StreamChunk, ToolCallDelta, TokenUsage};

/// Environment keys stripped before spawning, so a subprocess CLI that
/// detects "already running inside a session" (e.g. a Claude Code-style
/// agent checking for its own nested-session markers) doesn't refuse to
/// start (§4.3: "filter its environment to strip keys that would cause a
/// nested session refusal").
const ENV_STRIP_KEYS: &[&str] = &["CLAUDECODE", "CLAUDE_CODE_SSE_PORT", "CLAUDE_CODE_ENTRYPOINT", "CLAUDE_CODE_SESSION_ID"];

pub struct SubprocessProvider {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
}

impl SubprocessProvider {
    pub fn new(command: impl Into<String>, args: Vec<String>, cwd: Option<String>) -> Self {
        Self { command: command.into(), args, cwd }
    }

    /// Runs the subprocess to completion against a flattened prompt (only
    /// the soul/system layer is used for subprocess providers, per §4.4),
    /// collecting stream-json events into `StreamChunk`s. Follows the same
    /// circuit-breaker/audit-log instrumentation as the HTTP provider
    /// adapters (§4.3's shared Execute contract) so a misbehaving local CLI
    /// trips the breaker and shows up in the request audit log too.
    pub async fn run(&self, prompt: &str, model: &str, timeout_secs: u64, circuit_breaker: &CircuitBreaker, audit_log: &RequestAuditLog) -> Result<Vec<StreamChunk>, String> {
        circuit_breaker.check()?;
        info!("[provider:subprocess] spawning {} {:?}", self.command, self.args);

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg("--output-format")
            .arg("stream-json")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for key in ENV_STRIP_KEYS {
            cmd.env_remove(key);
        }

        audit_log.sign_and_log(&self.command, model, prompt.as_bytes());

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                circuit_breaker.record_failure();
                return Err(format!("spawn failed: {}", e));
            }
        };

        {
            use tokio::io::AsyncWriteExt;
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.shutdown().await;
            }
        }

        let Some(stdout) = child.stdout.take() else {
            circuit_breaker.record_failure();
            return Err("no stdout".to_string());
        };
        let mut reader = BufReader::new(stdout).lines();

        let mut chunks = Vec::new();
        let read_fut = async {
            while let Ok(Some(line)) = reader.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                if let Some(chunk) = Self::parse_stream_json_line(&line) {
                    chunks.push(chunk);
                }
            }
        };

        if timeout(Duration::from_secs(timeout_secs), read_fut).await.is_err() {
            warn!("[provider:subprocess] {} timed out after {}s, killing", self.command, timeout_secs);
            let _ = child.kill().await;
            circuit_breaker.record_failure();
            audit_log.update_last_status(504);
            return Err(format!("subprocess {} exceeded {}s", self.command, timeout_secs));
        }

        let status = match child.wait().await {
            Ok(s) => s,
            Err(e) => {
                circuit_breaker.record_failure();
                return Err(format!("wait failed: {}", e));
            }
        };
        if !status.success() {
            circuit_breaker.record_failure();
            audit_log.update_last_status(500);
            return Err(format!("exited with {:?}", status.code()));
        }
        if chunks.iter().any(|c| c.is_error == Some(true)) {
            circuit_breaker.record_failure();
            audit_log.update_last_status(500);
        } else {
            circuit_breaker.record_success();
            audit_log.update_last_status(200);
        }

        Ok(chunks)
    }

    /// Parses one line of the subprocess's stream-json protocol. Unknown
    /// event shapes are ignored rather than treated as a hard error, since
    /// different CLI agents emit slightly different event vocabularies.
    fn parse_stream_json_line(line: &str) -> Option<StreamChunk> {
        let v: Value = serde_json::from_str(line).ok()?;
        let event_type = v["type"].as_str().unwrap_or("");
        match event_type {
            "assistant" => {
                let content = v["message"]["content"].as_array().or_else(|| v["content"].as_array())?;
                let mut text = String::new();
                let mut tool_calls = Vec::new();
                for (idx, block) in content.iter().enumerate() {
                    match block["type"].as_str().unwrap_or("") {
                        "text" => {
                            if let Some(t) = block["text"].as_str() {
                                text.push_str(t);
                            }
                        }
                        "tool_use" => {
                            let input = block.get("input").cloned().unwrap_or(Value::Null);
                            tool_calls.push(ToolCallDelta {
                                index: idx,
                                id: block["id"].as_str().map(|s| s.to_string()),
                                function_name: block["name"].as_str().map(|s| s.to_string()),
                                arguments_delta: Some(serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string())),
                            });
                        }
                        _ => {}
                    }
                }
                if text.is_empty() && tool_calls.is_empty() {
                    return None;
                }
                Some(StreamChunk { delta_text: if text.is_empty() { None } else { Some(text) }, tool_calls, ..Default::default() })
            }
            "text" | "content" => Some(StreamChunk {
                delta_text: v["text"].as_str().or_else(|| v["content"].as_str()).map(|s| s.to_string()),
                ..Default::default()
            }),
            "result" => {
                let input = v["usage"]["input_tokens"].as_u64().unwrap_or(0);
                let output = v["usage"]["output_tokens"].as_u64().unwrap_or(0);
                let is_error = v["is_error"].as_bool().or_else(|| v["isError"].as_bool());
                Some(StreamChunk {
                    finish_reason: Some(if is_error == Some(true) { "error".into() } else { "stop".into() }),
                    usage: if input > 0 || output > 0 { Some(TokenUsage { input_tokens: input, output_tokens: output, total_tokens: input + output }) } else { None },
                    native_cost_usd: v["total_cost_usd"].as_f64().or_else(|| v["cost_usd"].as_f64()),
                    native_session_id: v["session_id"].as_str().or_else(|| v["sessionId"].as_str()).map(|s| s.to_string()),
                    is_error,
                    ..Default::default()
                })
            }
            "usage" => {
                let input = v["usage"]["input_tokens"].as_u64().unwrap_or(0);
                let output = v["usage"]["output_tokens"].as_u64().unwrap_or(0);
                Some(StreamChunk {
                    finish_reason: Some("stop".into()),
                    usage: if input > 0 || output > 0 { Some(TokenUsage { input_tokens: input, output_tokens: output, total_tokens: input + output }) } else { None },
                    ..Default::default()
                })
            }
            _ => None,
        }
    }

    /// Flattens the soul/system prompt and conversation into a single text
    /// blob, since subprocess providers bypass the layered prompt assembler.
    pub fn flatten_prompt(soul: &str, messages: &[Message]) -> String {
        let mut out = String::new();
        if !soul.is_empty() {
            out.push_str(soul);
            out.push_str("\n\n");
        }
        for m in messages {
            out.push_str(&format!("[{}]: {}\n", m.role, m.content.as_text()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assistant_text_and_tool_use_blocks() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"checking the file"},{"type":"tool_use","id":"toolu_1","name":"read_file","input":{"path":"a.rs"}}]}}"#;
        let chunk = SubprocessProvider::parse_stream_json_line(line).expect("parses");
        assert_eq!(chunk.delta_text.as_deref(), Some("checking the file"));
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.tool_calls[0].id.as_deref(), Some("toolu_1"));
        assert_eq!(chunk.tool_calls[0].function_name.as_deref(), Some("read_file"));
        assert_eq!(chunk.tool_calls[0].arguments_delta.as_deref(), Some(r#"{"path":"a.rs"}"#));
    }

    #[test]
    fn parses_result_line_cost_session_and_error() {
        let line = r#"{"type":"result","is_error":false,"session_id":"sess-abc","total_cost_usd":0.0123,"usage":{"input_tokens":12,"output_tokens":34}}"#;
        let chunk = SubprocessProvider::parse_stream_json_line(line).expect("parses");
        assert_eq!(chunk.native_cost_usd, Some(0.0123));
        assert_eq!(chunk.native_session_id.as_deref(), Some("sess-abc"));
        assert_eq!(chunk.is_error, Some(false));
        assert_eq!(chunk.finish_reason.as_deref(), Some("stop"));
        assert_eq!(chunk.usage.unwrap().input_tokens, 12);
    }

    #[test]
    fn result_line_is_error_true_sets_error_finish_reason() {
        let line = r#"{"type":"result","isError":true,"sessionId":"sess-xyz"}"#;
        let chunk = SubprocessProvider::parse_stream_json_line(line).expect("parses");
        assert_eq!(chunk.is_error, Some(true));
        assert_eq!(chunk.finish_reason.as_deref(), Some("error"));
        assert_eq!(chunk.native_session_id.as_deref(), Some("sess-xyz"));
    }
}
