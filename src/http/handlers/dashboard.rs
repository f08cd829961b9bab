// ── /events/dashboard ──────────────────────────────────────────────────
// The dashboard-wide live stream (§4.2, §6): every event published to any
// per-task or per-session topic is mirrored here by `Broker::publish`/
// `publish_multi`, so one subscription sees the whole process's activity.
// Unlike a per-task stream this one never closes on a terminal event.

use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::Sse;

use crate::atoms::constants::DASHBOARD_TOPIC;
use crate::http::sse::stream_from_persistent;
use crate::server::Server;

pub async fn get_dashboard_stream(State(server): State<Arc<Server>>) -> Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>> {
    let rx = server.broker.subscribe(DASHBOARD_TOPIC);
    stream_from_persistent(rx)
}
