// ── /route, /route/classify, /route/{id} ──────────────────────────────────
// Smart dispatch (C8): `/route` resolves a role synchronously and then
// dispatches to it in the background, handing back a pollable id;
// `/route/classify` is side-effect-free role resolution only; `/route/{id}`
// reads back the async result recorded by `dispatch::record_route_result`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::atoms::error::TetoraError;
use crate::atoms::types::{SSEEvent, SSEEventType, Task};
use crate::dispatch;
use crate::http::error::ApiResult;
use crate::router;
use crate::server::{RouteResultStatus, Server};

#[derive(Deserialize)]
pub struct RouteBody {
    pub prompt: String,
    #[serde(default)]
    pub source: Option<String>,
}

pub async fn post_route_classify(State(server): State<Arc<Server>>, Json(body): Json<RouteBody>) -> Json<Value> {
    let cfg = server.current_config();
    let decision = router::resolve(&server, &cfg, &body.prompt).await;
    Json(serde_json::to_value(decision).unwrap_or(Value::Null))
}

/// Resolves a role for `prompt`, dispatches a task to it in the background,
/// and immediately returns `{taskId, decision}` — the caller polls
/// `/route/{id}` or subscribes to `/dispatch/{id}/stream` for the outcome.
pub async fn post_route(State(server): State<Arc<Server>>, Json(body): Json<RouteBody>) -> ApiResult<Json<Value>> {
    let cfg = server.current_config();
    let decision = router::resolve(&server, &cfg, &body.prompt).await;

    let task = Task {
        id: uuid::Uuid::new_v4().to_string(),
        name: "routed".to_string(),
        prompt: body.prompt,
        agent: decision.role.clone(),
        model: None,
        provider: None,
        timeout_secs: None,
        budget_usd: None,
        permission_mode: None,
        source: body.source.unwrap_or_else(|| "route".to_string()),
        session_id: None,
        add_dirs: vec![],
        mcp_path: None,
    };
    let task_id = task.id.clone();

    let routing_event = SSEEvent {
        event_type: SSEEventType::TaskRouting,
        task_id: Some(task_id.clone()),
        session_id: None,
        data: json!({"role": decision.role, "confidence": decision.confidence, "method": format!("{:?}", decision.method)}),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    server.broker.publish(&task_id, routing_event);

    server.route_results.lock().insert(
        task_id.clone(),
        crate::server::RouteResultEntry { status: RouteResultStatus::Running, result: None, error: None, created_at: std::time::Instant::now() },
    );

    let server_bg = server.clone();
    let task_id_bg = task_id.clone();
    tokio::spawn(async move {
        let result = dispatch::dispatch_single(&server_bg, task).await;
        dispatch::record_route_result(&server_bg, &task_id_bg, &result);
    });

    Ok(Json(json!({ "task_id": task_id, "decision": decision })))
}

pub async fn get_route_result(State(server): State<Arc<Server>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let entry = server.route_results.lock().get(&id).cloned().ok_or_else(|| TetoraError::not_found(format!("no route result for '{}'", id)))?;
    let status = match entry.status {
        RouteResultStatus::Running => "running",
        RouteResultStatus::Success => "success",
        RouteResultStatus::Error => "error",
        RouteResultStatus::Cancelled => "cancelled",
    };
    Ok(Json(json!({ "status": status, "result": entry.result, "error": entry.error })))
}
