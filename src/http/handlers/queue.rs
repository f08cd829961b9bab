// ── /queue, /queue/{id}[/retry] ───────────────────────────────────────────
// CRUD over the offline queue (C1, `store::queue`): tasks parked because no
// worker is currently available, picked back up via `.../retry`, which
// marks the row pending again and re-dispatches it through C7.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::atoms::error::TetoraError;
use crate::atoms::types::{QueueStatus, Task};
use crate::dispatch;
use crate::http::error::ApiResult;
use crate::server::Server;
use crate::store::queue;

#[derive(Deserialize)]
pub struct EnqueueBody {
    pub task: Task,
    pub role_name: String,
}

pub async fn post_queue(State(server): State<Arc<Server>>, Json(body): Json<EnqueueBody>) -> ApiResult<Json<Value>> {
    let conn = server.db.lock();
    let item = queue::enqueue(&conn, &body.task, &body.role_name)?;
    Ok(Json(serde_json::to_value(item).unwrap_or(Value::Null)))
}

#[derive(Deserialize)]
pub struct ListQueueQuery {
    #[serde(default)]
    pub status: Option<String>,
}

fn parse_status_filter(s: &str) -> Option<QueueStatus> {
    match s {
        "pending" => Some(QueueStatus::Pending),
        "processing" => Some(QueueStatus::Processing),
        "completed" => Some(QueueStatus::Completed),
        "failed" => Some(QueueStatus::Failed),
        _ => None,
    }
}

pub async fn get_queue(State(server): State<Arc<Server>>, Query(q): Query<ListQueueQuery>) -> ApiResult<Json<Value>> {
    let status = q.status.as_deref().and_then(parse_status_filter);
    let conn = server.db.lock();
    let items = queue::list(&conn, status)?;
    Ok(Json(json!({ "items": items })))
}

pub async fn get_queue_item(State(server): State<Arc<Server>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let conn = server.db.lock();
    let item = queue::get(&conn, &id)?.ok_or_else(|| TetoraError::not_found(format!("no queue item '{}'", id)))?;
    Ok(Json(serde_json::to_value(item).unwrap_or(Value::Null)))
}

pub async fn delete_queue_item(State(server): State<Arc<Server>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let deleted = { let conn = server.db.lock(); queue::delete(&conn, &id)? };
    if !deleted {
        return Err(TetoraError::not_found(format!("no queue item '{}'", id)).into());
    }
    Ok(Json(json!({ "deleted": true })))
}

/// Requeues `id` onto the dispatch engine directly: marks it `processing`,
/// deserializes its stored `Task`, runs it, then records the outcome.
pub async fn post_queue_retry(State(server): State<Arc<Server>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let item = { let conn = server.db.lock(); queue::get(&conn, &id)?.ok_or_else(|| TetoraError::not_found(format!("no queue item '{}'", id)))? };

    let task: Task = serde_json::from_str(&item.task_json).map_err(|e| TetoraError::validation(format!("stored task_json is not a valid Task: {}", e)))?;

    { let conn = server.db.lock(); queue::mark(&conn, &id, QueueStatus::Processing, None)?; }

    let result = dispatch::dispatch_single(&server, task).await;
    let conn = server.db.lock();
    match result.error {
        Some(ref err) => queue::mark(&conn, &id, QueueStatus::Failed, Some(err))?,
        None => queue::mark(&conn, &id, QueueStatus::Completed, None)?,
    }
    Ok(Json(serde_json::to_value(result).unwrap_or(Value::Null)))
}
