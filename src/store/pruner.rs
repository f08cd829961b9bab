//! Retention pruner (§4.1): periodic background sweep that applies each
//! table's `maxRows`/`maxAgeDays` policy. Runs on a ticker started by
//! `main.rs` alongside the route-result cleanup ticker in `dispatch.rs`.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::server::Server;
use crate::store::history;

/// One sweep interval for the background pruning ticker.
const PRUNE_INTERVAL_SECS: u64 = 6 * 60 * 60;

/// History retention: age-based by default, matching the teacher's
/// "keep it lean" stance on the embedded DB — no hard row cap unless the
/// operator configures one explicitly via `EngineConfig` in a future
/// revision.
const HISTORY_MAX_AGE_DAYS: u32 = 180;

/// Spawns the periodic pruner loop. Returns its `JoinHandle` so callers can
/// abort it on shutdown.
pub fn spawn(server: Arc<Server>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let conn = server.db.lock();
            match history::prune(&conn, Some(HISTORY_MAX_AGE_DAYS), None) {
                Ok(n) if n > 0 => info!("[pruner] removed {} expired history rows", n),
                Ok(_) => {}
                Err(e) => log::warn!("[pruner] history prune failed: {}", e),
            }
        }
    })
}
