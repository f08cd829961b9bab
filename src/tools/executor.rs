// ── Tool executor (C6) ─────────────────────────────────────────────────────
// Dispatches a resolved `ToolCall` by name to its handler. Grounded on the
// teacher's `engine/tool_executor.rs::execute_tool` match-by-name shape and
// its per-agent workspace isolation (`agent_workspace`/`ensure_workspace`).
// This is the security enforcement point: every tool call passes through
// here, and the allowance computed by `tools::profile` gates what's offered
// to the model in the first place.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use log::{info, warn};

use crate::providers::messages::ToolCall;
use crate::server::Server;
use crate::tools::builtin;
use crate::tools::profile::ToolAllowance;
use crate::tools::registry::tools_for_profile;

pub type ToolHandlerResult = Result<String, String>;

/// Per-call execution context: which agent's workspace to operate in,
/// whether sandbox routing is required (DM/group scopes, per §4.5), and the
/// session's own `ToolAllowance` so the executor can re-check each call
/// against it rather than trusting that only offered tools come back.
pub struct ToolContext {
    pub server: Arc<Server>,
    pub agent_id: String,
    pub sandbox: bool,
    pub allowance: ToolAllowance,
}

/// Maximum tool output length fed back to the model / forwarded over SSE,
/// matching the teacher's 50,000-byte output cap.
const MAX_TOOL_OUTPUT: usize = 50_000;

pub fn agent_workspace(agent_id: &str) -> PathBuf {
    let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(".tetora").join("workspaces").join(agent_id)
}

pub fn ensure_workspace(agent_id: &str) -> Result<PathBuf, String> {
    let ws = agent_workspace(agent_id);
    std::fs::create_dir_all(&ws).map_err(|e| format!("failed to create workspace for agent '{}': {}", agent_id, e))?;
    Ok(ws)
}

#[derive(Debug, Clone)]
pub struct ExecutedToolResult {
    pub tool_call_id: String,
    pub output: String,
    pub success: bool,
}

/// Executes a single tool call by name.
pub async fn execute_one(ctx: &ToolContext, tool_call: &ToolCall) -> ExecutedToolResult {
    let name = tool_call.function.name.as_str();
    let args: serde_json::Value = serde_json::from_str(&tool_call.function.arguments).unwrap_or_else(|_| serde_json::json!({}));

    info!("[tools] executing {} agent={} sandbox={}", name, ctx.agent_id, ctx.sandbox);

    if ctx.allowance.tools_disabled {
        warn!("[tools] rejected {} agent={}: tools disabled for this session", name, ctx.agent_id);
        return ExecutedToolResult { tool_call_id: tool_call.id.clone(), output: format!("Error: tool '{}' rejected, tools are disabled for this session", name), success: false };
    }
    let offered = tools_for_profile(ctx.allowance.tool_profile);
    if !offered.iter().any(|t| t.function.name == name) {
        warn!("[tools] rejected {} agent={}: outside allowance for profile {:?}", name, ctx.agent_id, ctx.allowance.tool_profile);
        return ExecutedToolResult { tool_call_id: tool_call.id.clone(), output: format!("Error: tool '{}' rejected, not permitted under this session's tool allowance", name), success: false };
    }

    let result: ToolHandlerResult = match name {
        "exec" => builtin::exec::run(&args, ctx).await,
        "fetch" => builtin::fetch::run(&args).await,
        "read_file" => builtin::filesystem::read_file(&args, &ctx.agent_id).await,
        "write_file" => builtin::filesystem::write_file(&args, &ctx.agent_id).await,
        "list_directory" => builtin::filesystem::list_directory(&args, &ctx.agent_id).await,
        "append_file" => builtin::filesystem::append_file(&args, &ctx.agent_id).await,
        "delete_file" => builtin::filesystem::delete_file(&args, &ctx.agent_id).await,
        "memory_store" => builtin::memory_tools::store(&args, ctx).await,
        "memory_search" => builtin::memory_tools::search(&args, ctx).await,
        "memory_get" => builtin::memory_tools::get(&args, ctx).await,
        "memory_delete" => builtin::memory_tools::delete(&args, ctx).await,
        "create_task" => builtin::tasks::create(&args, ctx).await,
        "list_tasks" => builtin::tasks::list(&args, ctx).await,
        _ => Err(format!("unknown tool: {}", name)),
    };

    match result {
        Ok(mut output) => {
            if output.len() > MAX_TOOL_OUTPUT {
                output.truncate(MAX_TOOL_OUTPUT);
                output.push_str("\n\n... [output truncated]");
            }
            ExecutedToolResult { tool_call_id: tool_call.id.clone(), output, success: true }
        }
        Err(err) => {
            warn!("[tools] {} failed: {}", name, err);
            ExecutedToolResult { tool_call_id: tool_call.id.clone(), output: format!("Error: {}", err), success: false }
        }
    }
}

/// Executes a batch of tool calls concurrently — spec §4.5 allows the
/// executor to run resolved calls concurrently within one provider turn.
pub async fn execute_batch(ctx: &ToolContext, tool_calls: &[ToolCall]) -> Vec<ExecutedToolResult> {
    let futs = tool_calls.iter().map(|tc| execute_one(ctx, tc));
    join_all(futs).await
}
