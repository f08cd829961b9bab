// ── /api/tools, /api/mcp/servers[,/{n}/restart] ───────────────────────────
// Tool registry introspection (C6) and a "MCP server" view over configured
// subprocess (`claude-code`) providers — Tetora itself carries no dynamic
// MCP server registry (only `Task.mcpPath`, an opaque pass-through to the
// subprocess), so restart here means clearing that provider's circuit
// breaker rather than respawning a process Tetora doesn't own.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::atoms::error::TetoraError;
use crate::atoms::types::ProviderKind;
use crate::http::error::ApiResult;
use crate::server::Server;
use crate::tools::registry;

pub async fn get_tools(State(server): State<Arc<Server>>) -> Json<Value> {
    let cfg = server.current_config();
    let tools: Vec<Value> = registry::all_tools()
        .into_iter()
        .map(|(def, profile)| json!({"name": def.function.name, "description": def.function.description, "inputSchema": def.function.parameters, "minProfile": format!("{:?}", profile).to_lowercase()}))
        .collect();
    Json(json!({ "tools": tools, "defaultTimeoutSecs": cfg.default_timeout_secs }))
}

/// Lists every subprocess-kind provider as an "MCP server" entry: id, and
/// whether its circuit breaker currently considers it healthy.
pub async fn get_mcp_servers(State(server): State<Arc<Server>>) -> Json<Value> {
    let cfg = server.current_config();
    let servers: Vec<Value> = cfg
        .providers
        .iter()
        .filter(|p| matches!(p.kind, ProviderKind::ClaudeCode))
        .map(|p| {
            let breaker = server.circuit_breaker_for(&p.id);
            json!({"id": p.id, "kind": "claude-code", "healthy": breaker.check().is_ok()})
        })
        .collect();
    Json(json!({ "servers": servers }))
}

/// Clears the named subprocess provider's circuit breaker, the closest
/// equivalent Tetora has to "restart" for a process it doesn't directly
/// supervise.
pub async fn post_mcp_restart(State(server): State<Arc<Server>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let cfg = server.current_config();
    let exists = cfg.providers.iter().any(|p| p.id == id && matches!(p.kind, ProviderKind::ClaudeCode));
    if !exists {
        return Err(TetoraError::not_found(format!("no claude-code provider '{}'", id)).into());
    }
    server.circuit_breaker_for(&id).record_success();
    Ok(Json(json!({ "restarted": true })))
}
