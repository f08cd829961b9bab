// ── memory tools: agent-facing wrappers over unified memory (C10) ─────────
// Grounded on `engine/tool_executor.rs::execute_memory_*` and `memory::
// unified`'s store/search/get/delete contract (spec §4.9/§4.5). Tools
// default `namespace` to the calling agent's id so agents can't read or
// clobber each other's memory unless they explicitly pass a shared
// namespace, mirroring the per-agent workspace isolation `filesystem.rs`
// enforces for the filesystem tool.

use crate::memory::unified;
use crate::tools::executor::ToolContext;

fn default_namespace(args: &serde_json::Value, ctx: &ToolContext) -> String {
    args["namespace"].as_str().unwrap_or(&ctx.agent_id).to_string()
}

pub async fn store(args: &serde_json::Value, ctx: &ToolContext) -> Result<String, String> {
    let namespace = default_namespace(args, ctx);
    let scope = args["scope"].as_str().unwrap_or("default").to_string();
    let key = args["key"].as_str().ok_or("memory_store: missing 'key' argument")?.to_string();
    let value = args["value"].as_str().ok_or("memory_store: missing 'value' argument")?.to_string();
    let metadata = args["metadata"].clone();
    let ttl_days = args["ttl_days"].as_u64().map(|v| v as u32);

    let conn = ctx.server.db.lock();
    let input = unified::StoreInput { namespace: &namespace, scope: &scope, key: &key, value: &value, source: &format!("agent:{}", ctx.agent_id), metadata, ttl_days };
    let (id, created) = unified::store(&conn, input).map_err(|e| e.to_string())?;
    Ok(if created { format!("stored as {}", id) } else { format!("unchanged (already stored as {})", id) })
}

pub async fn search(args: &serde_json::Value, ctx: &ToolContext) -> Result<String, String> {
    let query = args["query"].as_str().ok_or("memory_search: missing 'query' argument")?;
    let namespace = default_namespace(args, ctx);
    let scope = args["scope"].as_str();
    let limit = args["limit"].as_u64().unwrap_or(10) as usize;

    let conn = ctx.server.db.lock();
    let hits = unified::search(&conn, query, Some(namespace.as_str()), scope, limit).map_err(|e| e.to_string())?;
    if hits.is_empty() {
        return Ok("no matching memories".to_string());
    }
    let rendered: Vec<String> = hits.iter().map(|h| format!("[{}] {}={} (v{})", h.id, h.key, h.value, h.version)).collect();
    Ok(rendered.join("\n"))
}

pub async fn get(args: &serde_json::Value, ctx: &ToolContext) -> Result<String, String> {
    let conn = ctx.server.db.lock();

    if let Some(id) = args["id"].as_str() {
        return unified::get_by_id(&conn, id)
            .map_err(|e| e.to_string())?
            .map(|e| e.value)
            .ok_or_else(|| format!("no memory with id '{}'", id));
    }

    let namespace = default_namespace(args, ctx);
    let scope = args["scope"].as_str().unwrap_or("default");
    let key = args["key"].as_str().ok_or("memory_get: provide either 'id' or 'key'")?;
    unified::get(&conn, &namespace, scope, key)
        .map_err(|e| e.to_string())?
        .map(|e| e.value)
        .ok_or_else(|| format!("no memory for {}/{}/{}", namespace, scope, key))
}

pub async fn delete(args: &serde_json::Value, ctx: &ToolContext) -> Result<String, String> {
    let id = args["id"].as_str().ok_or("memory_delete: missing 'id' argument")?;
    let conn = ctx.server.db.lock();
    let deleted = unified::delete(&conn, id).map_err(|e| e.to_string())?;
    if deleted {
        Ok(format!("tombstoned {}", id))
    } else {
        Err(format!("no memory with id '{}'", id))
    }
}
