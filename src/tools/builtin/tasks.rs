// ── task tools: let an agent queue follow-up work for itself or a peer ────
// Grounded on `engine/tool_executor.rs::execute_create_task` and
// `store::queue`'s offline-queue contract (spec §4.1/§4.5). Queued tasks
// are picked up the same way any other queued task is — by the dispatch
// engine's backlog drain — so this tool is a thin front door onto
// `queue::enqueue`, not a second task pipeline.

use crate::atoms::types::{QueueStatus, Task};
use crate::tools::executor::ToolContext;

pub async fn create(args: &serde_json::Value, ctx: &ToolContext) -> Result<String, String> {
    let prompt = args["prompt"].as_str().ok_or("create_task: missing 'prompt' argument")?.to_string();
    let agent = args["agent"].as_str().unwrap_or(&ctx.agent_id).to_string();
    let name = args["name"].as_str().unwrap_or("agent-queued task").to_string();

    let task = Task {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        prompt,
        agent: agent.clone(),
        model: args["model"].as_str().map(String::from),
        provider: args["provider"].as_str().map(String::from),
        timeout_secs: args["timeout_secs"].as_u64(),
        budget_usd: args["budget_usd"].as_f64(),
        permission_mode: args["permission_mode"].as_str().map(String::from),
        source: format!("agent:{}", ctx.agent_id),
        session_id: None,
        add_dirs: vec![],
        mcp_path: None,
    };

    let conn = ctx.server.db.lock();
    let item = crate::store::queue::enqueue(&conn, &task, &agent).map_err(|e| e.to_string())?;
    Ok(format!("queued task {} for agent '{}'", item.id, agent))
}

pub async fn list(args: &serde_json::Value, ctx: &ToolContext) -> Result<String, String> {
    let status = args["status"].as_str().and_then(|s| match s {
        "pending" => Some(QueueStatus::Pending),
        "processing" => Some(QueueStatus::Processing),
        "completed" => Some(QueueStatus::Completed),
        "failed" => Some(QueueStatus::Failed),
        _ => None,
    });

    let conn = ctx.server.db.lock();
    let items = crate::store::queue::list(&conn, status).map_err(|e| e.to_string())?;
    if items.is_empty() {
        return Ok("no queued tasks".to_string());
    }
    let rendered: Vec<String> = items.iter().map(|i| format!("[{}] role={} status={:?} attempts={}", i.id, i.role_name, i.status, i.attempts)).collect();
    Ok(rendered.join("\n"))
}
