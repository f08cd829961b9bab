// ── /dispatch, /dispatch/estimate, /dispatch/{id}/{retry,reroute,stream} ──
// Thin HTTP adapters over `dispatch.rs` (C7): request bodies deserialize
// straight into `Task`, responses are the engine's own `TaskResult`/
// `SSEEvent` types re-serialized, matching spec §6's table.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::Sse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::atoms::types::Task;
use crate::classifier;
use crate::dispatch;
use crate::http::error::ApiResult;
use crate::http::sse::stream_from;
use crate::pricing;
use crate::server::Server;

#[derive(Deserialize)]
pub struct DispatchBody {
    pub tasks: Vec<Task>,
}

pub async fn post_dispatch(State(server): State<Arc<Server>>, Json(body): Json<DispatchBody>) -> ApiResult<Json<Value>> {
    let results = dispatch::dispatch(&server, body.tasks).await?;
    Ok(Json(json!({ "results": results })))
}

#[derive(serde::Serialize)]
struct EstimateLine {
    task_id: String,
    complexity: String,
    estimated_cost_usd: f64,
}

/// Cost-only estimate: classifies each task and prices a rough token
/// budget for its complexity tier without touching a provider (§6).
pub async fn post_dispatch_estimate(State(server): State<Arc<Server>>, Json(body): Json<DispatchBody>) -> ApiResult<Json<Value>> {
    let cfg = server.current_config();
    let lines: Vec<EstimateLine> = body
        .tasks
        .iter()
        .map(|task| {
            let complexity = classifier::classify(&task.prompt, &task.source);
            let (_, token_budget) = complexity.context_size();
            let (est_in, est_out) = (token_budget as u64, (token_budget / 4) as u64);
            let model = task.model.clone().or_else(|| cfg.default_model.clone()).unwrap_or_else(|| "claude-sonnet-4".to_string());
            let cost = pricing::estimate_cost_usd(&model, est_in, est_out, 0, 0);
            EstimateLine { task_id: task.id.clone(), complexity: format!("{:?}", complexity).to_lowercase(), estimated_cost_usd: cost }
        })
        .collect();
    let total: f64 = lines.iter().map(|l| l.estimated_cost_usd).sum();
    Ok(Json(json!({ "lines": lines, "total_cost_usd": total })))
}

pub async fn post_dispatch_retry(State(server): State<Arc<Server>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let result = dispatch::retry(&server, &id).await?;
    Ok(Json(serde_json::to_value(result).unwrap_or(Value::Null)))
}

pub async fn post_dispatch_reroute(State(server): State<Arc<Server>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let result = dispatch::reroute(&server, &id).await?;
    Ok(Json(serde_json::to_value(result).unwrap_or(Value::Null)))
}

/// SSE stream of a dispatched (or retried/rerouted) task's progress events,
/// subscribing under the task id the caller already has in hand.
pub async fn get_dispatch_stream(State(server): State<Arc<Server>>, Path(id): Path<String>) -> Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>> {
    let rx = server.broker.subscribe(&id);
    stream_from(rx)
}

pub async fn get_tasks_running(State(server): State<Arc<Server>>) -> ApiResult<Json<Value>> {
    let runs = server.active_runs.lock();
    let snapshot: Vec<Value> = runs.iter().map(|(id, run)| json!({"id": id, "name": run.task_name, "running_secs": run.started_at.elapsed().as_secs()})).collect();
    Ok(Json(json!({ "running": snapshot })))
}

pub async fn post_cancel_all(State(server): State<Arc<Server>>) -> Json<Value> {
    let n = dispatch::cancel(&server, None);
    Json(json!({ "cancelled": n }))
}

pub async fn post_cancel_one(State(server): State<Arc<Server>>, Path(id): Path<String>) -> Json<Value> {
    let n = dispatch::cancel(&server, Some(&id));
    Json(json!({ "cancelled": n }))
}

