// ── /sessions/{id}, /sessions/{id}/watch, /sessions/{id}/mirror ──────────
// Session content lookup, a live SSE watch (subscribed under the session
// id rather than a task id, since a session outlives any one dispatch),
// and an inbound mirror endpoint for channel adapters relaying events that
// originated outside Tetora's own dispatch loop (spec §6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::Sse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::atoms::error::TetoraError;
use crate::atoms::types::{SSEEvent, SSEEventType};
use crate::http::error::ApiResult;
use crate::http::sse::stream_from;
use crate::server::Server;
use crate::store::sessions;

const RECENT_MESSAGE_LIMIT: usize = 50;

pub async fn get_session(State(server): State<Arc<Server>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let conn = server.db.lock();
    let session = sessions::get(&conn, &id)?.ok_or_else(|| TetoraError::not_found(format!("no session '{}'", id)))?;
    let messages = sessions::recent_messages(&conn, &id, RECENT_MESSAGE_LIMIT)?;
    Ok(Json(json!({ "session": session, "messages": messages })))
}

/// Subscribes to live events for this session id directly — dispatch
/// publishes to both the task id and the session id via `publish_multi`
/// whenever the two differ, so this stream sees every task dispatched
/// within the session, not just one.
pub async fn get_session_watch(State(server): State<Arc<Server>>, Path(id): Path<String>) -> Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>> {
    let rx = server.broker.subscribe(&id);
    stream_from(rx)
}

#[derive(Deserialize)]
pub struct MirrorBody {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

fn parse_event_type(s: &str) -> Option<SSEEventType> {
    serde_json::from_value(json!(s)).ok()
}

/// Accepts an externally-observed event (e.g. a channel adapter relaying
/// its own "user is typing"/"message edited" signal) and republishes it on
/// the session's broker topic, so dashboard/watch subscribers see a single
/// unified timeline regardless of where the event originated.
pub async fn post_session_mirror(State(server): State<Arc<Server>>, Path(id): Path<String>, Json(body): Json<MirrorBody>) -> ApiResult<Json<Value>> {
    let event_type = parse_event_type(&body.event_type).ok_or_else(|| TetoraError::validation(format!("unknown event type '{}'", body.event_type)))?;
    let event = SSEEvent { event_type, task_id: None, session_id: Some(id.clone()), data: body.data, timestamp: chrono::Utc::now().to_rfc3339() };
    server.broker.publish(&id, event);
    Ok(Json(json!({ "mirrored": true })))
}
