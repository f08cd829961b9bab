// ── /workflows, /workflows/{id}[/cancel] ─────────────────────────────────
// HTTP surface over the DAG executor (C9). Not in spec §6's "selected"
// route table, but every other internal component gets an external
// trigger surface there — workflows need one too, so this mirrors the
// dispatch/cancel shape already used for single tasks.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::atoms::error::TetoraError;
use crate::atoms::types::{Workflow, WorkflowMode};
use crate::http::error::ApiResult;
use crate::server::Server;
use crate::store::workflows;
use crate::workflow;

#[derive(Deserialize)]
pub struct RunWorkflowBody {
    pub workflow: Workflow,
    #[serde(default)]
    pub mode: Option<String>,
}

fn parse_mode(s: Option<&str>) -> WorkflowMode {
    match s {
        Some("dry-run") => WorkflowMode::DryRun,
        Some("shadow") => WorkflowMode::Shadow,
        _ => WorkflowMode::Live,
    }
}

pub async fn post_workflow_run(State(server): State<Arc<Server>>, Json(body): Json<RunWorkflowBody>) -> ApiResult<Json<Value>> {
    let mode = parse_mode(body.mode.as_deref());
    let run = workflow::run(&server, &body.workflow, mode).await?;
    Ok(Json(serde_json::to_value(run).unwrap_or(Value::Null)))
}

pub async fn get_workflow_run(State(server): State<Arc<Server>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let conn = server.db.lock();
    let run = workflows::get_run(&conn, &id)?.ok_or_else(|| TetoraError::not_found(format!("no workflow run '{}'", id)))?;
    Ok(Json(serde_json::to_value(run).unwrap_or(Value::Null)))
}

pub async fn get_workflow_runs(State(server): State<Arc<Server>>) -> ApiResult<Json<Value>> {
    let conn = server.db.lock();
    let runs = workflows::list_runs(&conn, 100)?;
    Ok(Json(json!({ "runs": runs })))
}

pub async fn post_workflow_cancel(State(server): State<Arc<Server>>, Path(id): Path<String>) -> Json<Value> {
    let cancelled = workflow::cancel(&server, &id);
    Json(json!({ "cancelled": cancelled }))
}
