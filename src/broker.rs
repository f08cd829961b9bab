// ── SSE broker (C2) ───────────────────────────────────────────────────────
// Typed pub/sub over bounded, non-blocking channels, keyed by task id (and,
// for workflow runs, by workflow-run id). Generalizes the teacher's ad hoc
// per-session broadcast in `engine/webchat/session.rs` into the explicit
// contract spec §4.2 names: subscribers never block the publisher, and a
// full channel simply drops the oldest-pending event for that subscriber.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::atoms::constants::{DASHBOARD_TOPIC, SSE_CHANNEL_CAPACITY};
use crate::atoms::types::{SSEEvent, SSEEventType};

pub type EventReceiver = mpsc::Receiver<SSEEvent>;

struct Topic {
    subscribers: Vec<mpsc::Sender<SSEEvent>>,
}

pub struct Broker {
    topics: Mutex<HashMap<String, Topic>>,
}

impl Broker {
    pub fn new() -> Self {
        Self { topics: Mutex::new(HashMap::new()) }
    }

    /// Subscribes to a topic key (typically a task id or workflow run id).
    /// Returns a receiver the HTTP layer turns into an SSE response stream.
    pub fn subscribe(&self, key: &str) -> EventReceiver {
        let (tx, rx) = mpsc::channel(SSE_CHANNEL_CAPACITY);
        let mut topics = self.topics.lock();
        topics.entry(key.to_string()).or_insert_with(|| Topic { subscribers: vec![] }).subscribers.push(tx);
        rx
    }

    /// Publishes an event to every current subscriber of `key`, and mirrors
    /// it onto the persistent dashboard topic. Uses `try_send` so a slow or
    /// stalled subscriber never blocks dispatch — the event is simply
    /// dropped for that one subscriber.
    pub fn publish(&self, key: &str, event: SSEEvent) {
        if key == DASHBOARD_TOPIC {
            self.publish_multi(&[key], event);
        } else {
            self.publish_multi(&[key, DASHBOARD_TOPIC], event);
        }
    }

    /// Publishes one event to every subscriber across several topics, plus
    /// the persistent dashboard topic, delivering at most once per distinct
    /// channel even when a subscriber is registered under more than one of
    /// `keys` (§4.2 `PublishMulti`). The dashboard topic is never torn down
    /// by a terminal event — only the caller-supplied per-task/per-session
    /// topics are.
    pub fn publish_multi(&self, keys: &[&str], event: SSEEvent) {
        let mut topics = self.topics.lock();
        let mut delivered: Vec<mpsc::Sender<SSEEvent>> = Vec::new();

        let mut all_keys: Vec<&str> = keys.to_vec();
        if !all_keys.contains(&DASHBOARD_TOPIC) {
            all_keys.push(DASHBOARD_TOPIC);
        }

        for key in &all_keys {
            if *key == DASHBOARD_TOPIC {
                topics.entry(DASHBOARD_TOPIC.to_string()).or_insert_with(|| Topic { subscribers: vec![] });
            }
            if let Some(topic) = topics.get_mut(*key) {
                topic.subscribers.retain_mut(|tx| {
                    if delivered.iter().any(|d| d.same_channel(tx)) {
                        return !tx.is_closed();
                    }
                    match tx.try_send(event.clone()) {
                        Ok(()) => {
                            delivered.push(tx.clone());
                            true
                        }
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            delivered.push(tx.clone());
                            true
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => false,
                    }
                });
            }
        }

        if event.event_type.is_terminal() {
            for key in keys {
                if *key != DASHBOARD_TOPIC {
                    topics.remove(*key);
                }
            }
        }
    }

    /// Number of live subscribers for a topic — used by dashboard/debug routes.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.topics.lock().get(key).map(|t| t.subscribers.len()).unwrap_or(0)
    }

    pub fn publish_heartbeat(&self, key: &str) {
        self.publish(
            key,
            SSEEvent {
                event_type: SSEEventType::Heartbeat,
                task_id: Some(key.to_string()),
                session_id: None,
                data: serde_json::json!({}),
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        );
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt(kind: SSEEventType) -> SSEEvent {
        SSEEvent { event_type: kind, task_id: Some("t1".into()), session_id: None, data: serde_json::json!({"x": 1}), timestamp: "2026-01-01T00:00:00Z".into() }
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let broker = Broker::new();
        let mut rx = broker.subscribe("t1");
        broker.publish("t1", evt(SSEEventType::TaskProcessing));
        let got = rx.recv().await.unwrap();
        assert!(matches!(got.event_type, SSEEventType::TaskProcessing));
    }

    #[tokio::test]
    async fn terminal_event_closes_topic() {
        let broker = Broker::new();
        let _rx = broker.subscribe("t1");
        assert_eq!(broker.subscriber_count("t1"), 1);
        broker.publish("t1", evt(SSEEventType::Completed));
        assert_eq!(broker.subscriber_count("t1"), 0);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_a_noop() {
        let broker = Broker::new();
        broker.publish("unknown", evt(SSEEventType::Error));
    }

    #[tokio::test]
    async fn publish_multi_delivers_once_to_shared_subscriber() {
        let broker = Broker::new();
        // A single logical subscriber registered under two keys (e.g. a
        // dashboard stream following both a task id and its session id).
        let mut rx = broker.subscribe("task-1");
        {
            let mut topics = broker.topics.lock();
            let tx = topics.get("task-1").unwrap().subscribers[0].clone();
            topics.entry("session-1".to_string()).or_insert_with(|| Topic { subscribers: vec![] }).subscribers.push(tx);
        }

        broker.publish_multi(&["task-1", "session-1"], evt(SSEEventType::TaskProcessing));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.event_type, SSEEventType::TaskProcessing));
        assert!(rx.try_recv().is_err(), "subscriber should receive the event exactly once");
    }

    #[tokio::test]
    async fn publish_multi_reaches_distinct_subscribers_across_keys() {
        let broker = Broker::new();
        let mut rx_a = broker.subscribe("a");
        let mut rx_b = broker.subscribe("b");

        broker.publish_multi(&["a", "b"], evt(SSEEventType::OutputChunk));

        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }
}
