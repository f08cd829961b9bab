// ── Reminders & notifiers (C14) ──────────────────────────────────────────
// Time-based reminders, polled on the same 60s cadence as the cron engine,
// firing through a `Notifier` trait fanned out by `MultiNotifier` — one
// channel's failure never blocks the others (spec §4.12). No dedicated
// teacher module covers multi-channel notification; named directly by the
// spec, this is new.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};

use crate::server::Server;
use crate::store::reminders::{self, Reminder};

const POLL_INTERVAL_SECS: u64 = 60;

/// A single outbound notification channel (log, webhook, a channel
/// adapter's push API, ...). Channel adapters themselves are out of scope
/// (spec §1) — this trait is the registration contract they implement.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, channel: &str, user_id: &str, text: &str) -> Result<(), String>;
}

/// Notifier used when no channel-specific adapter is registered: writes to
/// the structured log, so reminders are never silently lost.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, channel: &str, user_id: &str, text: &str) -> Result<(), String> {
        info!("[notify:{}] -> {}: {}", channel, user_id, text);
        Ok(())
    }
}

/// Fans a notification out to every registered notifier concurrently.
/// A single notifier's failure is logged and never prevents the others
/// from running (spec §4.12).
pub struct MultiNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub async fn notify_all(&self, channel: &str, user_id: &str, text: &str) {
        let futures = self.notifiers.iter().map(|n| {
            let n = n.clone();
            let (channel, user_id, text) = (channel.to_string(), user_id.to_string(), text.to_string());
            async move {
                if let Err(e) = n.notify(&channel, &user_id, &text).await {
                    warn!("[notify:{}] delivery failed: {}", n.name(), e);
                }
            }
        });
        futures::future::join_all(futures).await;
    }
}

impl Default for MultiNotifier {
    fn default() -> Self {
        Self::new(vec![Arc::new(LogNotifier)])
    }
}

/// Computes the reminder's next `due_at` for a `recurring` spec, reusing
/// the cron engine's schedule grammar (`"every 1d"`, `"daily 09:00"`).
fn next_due(recurring: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = crate::cron::parse_schedule(recurring)?;
    Some(crate::cron::next_occurrence(schedule, from))
}

async fn fire_reminder(notifier: &MultiNotifier, server: &Arc<Server>, reminder: &Reminder) {
    notifier.notify_all(&reminder.channel, &reminder.user_id, &reminder.text).await;

    let conn = server.db.lock();
    match &reminder.recurring {
        Some(spec) => match next_due(spec, Utc::now()) {
            Some(next) => {
                if let Err(e) = reminders::reschedule(&conn, &reminder.id, &next.to_rfc3339()) {
                    warn!("[reminders] failed to reschedule '{}': {}", reminder.id, e);
                }
            }
            None => {
                warn!("[reminders] reminder '{}' has unparseable recurrence '{}', firing once", reminder.id, spec);
                let _ = reminders::mark_fired(&conn, &reminder.id);
            }
        },
        None => {
            if let Err(e) = reminders::mark_fired(&conn, &reminder.id) {
                warn!("[reminders] failed to mark '{}' fired: {}", reminder.id, e);
            }
        }
    }
}

/// Spawns the reminder poll loop. Reuses the passed-in `MultiNotifier`
/// rather than constructing one per tick.
pub fn spawn(server: Arc<Server>, notifier: Arc<MultiNotifier>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(StdDuration::from_secs(POLL_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let now = Utc::now().to_rfc3339();

            let due_list = { let conn = server.db.lock(); reminders::due(&conn, &now) };
            let due_list = match due_list {
                Ok(list) => list,
                Err(e) => {
                    warn!("[reminders] failed to query due reminders: {}", e);
                    continue;
                }
            };

            for reminder in &due_list {
                fire_reminder(&notifier, &server, reminder).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNotifier {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        fn name(&self) -> &str {
            "counting"
        }
        async fn notify(&self, _channel: &str, _user_id: &str, _text: &str) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("boom".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn one_notifier_failing_does_not_block_the_others() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let multi = MultiNotifier::new(vec![
            Arc::new(CountingNotifier { calls: calls_a.clone(), fail: true }),
            Arc::new(CountingNotifier { calls: calls_b.clone(), fail: false }),
        ]);
        multi.notify_all("sms", "u1", "hi").await;
        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn next_due_reuses_cron_schedule_grammar() {
        let from: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let next = next_due("every 1d", from).unwrap();
        assert_eq!(next, from + Duration::days(1));
        assert!(next_due("garbage", from).is_none());
    }
}
