// ── SSE response helper (C2/C12) ──────────────────────────────────────────
// Turns a `Broker::subscribe` receiver into an axum `Sse` response: each
// `SSEEvent` is serialized as one `event: <type>\ndata: <json>` frame, and
// the stream closes itself right after the first terminal event, matching
// §4.2's "the stream for a dispatched task ends with `completed`/`error`".

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::atoms::types::SSEEvent;
use crate::broker::EventReceiver;

/// Wraps a broker subscription into an SSE stream. `scan` lets the stream
/// emit the terminal event and then signal `None` on the following poll,
/// so the HTTP connection closes instead of idling forever.
pub fn stream_from(rx: EventReceiver) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let raw = ReceiverStream::new(rx);
    let bounded = raw.scan(false, |done, event: SSEEvent| {
        if *done {
            return None;
        }
        if event.event_type.is_terminal() {
            *done = true;
        }
        Some(event)
    });

    let events = bounded.map(|event: SSEEvent| {
        let name = serde_json::to_value(&event.event_type).ok().and_then(|v| v.as_str().map(String::from)).unwrap_or_else(|| "message".to_string());
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(name).data(data))
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("heartbeat"))
}

/// Wraps a broker subscription into an SSE stream that never self-closes on
/// a terminal event. Used for the dashboard-wide stream (§4.2), which stays
/// open for the life of the client connection regardless of how many
/// individual tasks complete or error out underneath it.
pub fn stream_from_persistent(rx: EventReceiver) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let raw = ReceiverStream::new(rx);
    let events = raw.map(|event: SSEEvent| {
        let name = serde_json::to_value(&event.event_type).ok().and_then(|v| v.as_str().map(String::from)).unwrap_or_else(|| "message".to_string());
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(name).data(data))
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("heartbeat"))
}
