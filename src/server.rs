// ── Server: process-wide state ───────────────────────────────────────────
// Top-level struct modeling per spec §9's design note: hold all process
// state as struct fields behind `init(cfg)`/`shutdown(ctx)`, rather than
// scattering globals. Field grouping mirrors the section-banner convention
// in the SerialAgent example's `AppState` and the teacher's `EngineState`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

use crate::atoms::error::{TetoraError, TetoraResult};
use crate::atoms::types::{EngineConfig, TaskResult};
use crate::broker::Broker;
use crate::providers::http::{CircuitBreaker, RequestAuditLog};

/// Tracks today's accumulated token/cost spend, rolling over at UTC midnight.
/// Grounded on the teacher's `DailyTokenTracker` in `engine/state.rs`.
pub struct DailyTokenTracker {
    pub tokens_in: AtomicU64,
    pub tokens_out: AtomicU64,
    /// Cost tracked in micro-dollars (1e-6 USD) to keep an integer counter.
    pub cost_micros: AtomicU64,
    day_epoch: AtomicU64,
}

impl DailyTokenTracker {
    pub fn new() -> Self {
        Self {
            tokens_in: AtomicU64::new(0),
            tokens_out: AtomicU64::new(0),
            cost_micros: AtomicU64::new(0),
            day_epoch: AtomicU64::new(current_day_epoch()),
        }
    }

    fn roll_if_new_day(&self) {
        let today = current_day_epoch();
        let last = self.day_epoch.swap(today, Ordering::AcqRel);
        if last != today {
            self.tokens_in.store(0, Ordering::Release);
            self.tokens_out.store(0, Ordering::Release);
            self.cost_micros.store(0, Ordering::Release);
            // restore the day marker since the swap above already moved it
            self.day_epoch.store(today, Ordering::Release);
        }
    }

    pub fn record(&self, tokens_in: u64, tokens_out: u64, cost_usd: f64) {
        self.roll_if_new_day();
        self.tokens_in.fetch_add(tokens_in, Ordering::AcqRel);
        self.tokens_out.fetch_add(tokens_out, Ordering::AcqRel);
        let micros = (cost_usd * 1_000_000.0).round() as u64;
        self.cost_micros.fetch_add(micros, Ordering::AcqRel);
    }

    pub fn spent_usd(&self) -> f64 {
        self.roll_if_new_day();
        self.cost_micros.load(Ordering::Acquire) as f64 / 1_000_000.0
    }

    pub fn budget_pct(&self, daily_budget_usd: f64) -> Option<f64> {
        if daily_budget_usd <= 0.0 {
            return None;
        }
        Some((self.spent_usd() / daily_budget_usd) * 100.0)
    }
}

impl Default for DailyTokenTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn current_day_epoch() -> u64 {
    (chrono::Utc::now().timestamp() / 86_400) as u64
}

/// Active dispatch run bookkeeping used for cancellation (§4.6, C7).
pub struct ActiveRun {
    pub abort: AbortHandle,
    pub started_at: Instant,
    pub task_name: String,
}

/// One entry of the async route-result store (§4.6): lets a late-arriving
/// SSE subscriber or a follow-up `Retry`/`Reroute` call learn the outcome
/// of a dispatch after the fact, for a bounded window.
#[derive(Debug, Clone)]
pub enum RouteResultStatus {
    Running,
    Success,
    Error,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RouteResultEntry {
    pub status: RouteResultStatus,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    pub created_at: Instant,
}

/// Process-wide server state. Constructed once at startup via [`Server::init`]
/// and shared behind an `Arc` across the HTTP handlers, dispatch engine,
/// cron scheduler and SSE broker.
pub struct Server {
    // ── configuration ──────────────────────────────────────────────────
    pub config: RwLock<EngineConfig>,
    pub config_path: std::path::PathBuf,

    // ── storage (C1) ───────────────────────────────────────────────────
    pub db: Mutex<Connection>,

    // ── live progress (C2) ─────────────────────────────────────────────
    pub broker: Arc<Broker>,

    // ── dispatch concurrency (C7) ──────────────────────────────────────
    pub run_semaphore: Semaphore,
    pub active_runs: Mutex<HashMap<String, ActiveRun>>,
    /// Guards re-entrant `Dispatch` batch calls — spec §4.6's single
    /// `active` flag on `dispatchState`.
    pub dispatch_active: AtomicBool,
    /// TTL-bounded async route/result store (§4.6).
    pub route_results: Mutex<HashMap<String, RouteResultEntry>>,

    // ── workflow execution (C9) ─────────────────────────────────────────
    /// Per-run cancellation flags, keyed by `WorkflowRun.id`, polled by the
    /// scheduler between steps.
    pub workflow_cancels: Mutex<HashMap<String, Arc<AtomicBool>>>,

    // ── provider I/O resilience (C3, C15) ──────────────────────────────
    pub http_client: reqwest::Client,
    pub circuit_breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    pub audit_log: RequestAuditLog,

    // ── budget tracking ─────────────────────────────────────────────────
    pub daily_tracker: DailyTokenTracker,

    // ── security (C15) ──────────────────────────────────────────────────
    pub rate_limiter: Mutex<HashMap<String, Vec<Instant>>>,
    pub login_failures: Mutex<HashMap<String, crate::security::LoginFailures>>,

    // ── OAuth (C12/§6) ───────────────────────────────────────────────────
    /// CSRF `state` → service name, set by `/api/oauth/{svc}/authorize` and
    /// consumed by `/api/oauth/{svc}/callback`. Entries are removed once
    /// used; a crash-restart simply invalidates in-flight authorizations,
    /// which is an acceptable cost for a self-hosted single-operator flow.
    pub oauth_pending: Mutex<HashMap<String, String>>,
}

impl Server {
    /// Boots process state from a loaded config and an opened DB connection.
    /// Mirrors the teacher's `EngineState::new` / Tauri setup hook, but
    /// without any Tauri-specific wiring.
    pub fn init(config: EngineConfig, config_path: std::path::PathBuf, db: Connection) -> TetoraResult<Arc<Server>> {
        let max_concurrent = config.max_concurrent_runs.max(1);
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.default_timeout_secs.max(30)))
            .build()
            .map_err(TetoraError::from)?;

        Ok(Arc::new(Server {
            config: RwLock::new(config),
            config_path,
            db: Mutex::new(db),
            broker: Arc::new(Broker::new()),
            run_semaphore: Semaphore::new(max_concurrent),
            active_runs: Mutex::new(HashMap::new()),
            dispatch_active: AtomicBool::new(false),
            route_results: Mutex::new(HashMap::new()),
            workflow_cancels: Mutex::new(HashMap::new()),
            http_client,
            circuit_breakers: Mutex::new(HashMap::new()),
            audit_log: RequestAuditLog::new(),
            daily_tracker: DailyTokenTracker::new(),
            rate_limiter: Mutex::new(HashMap::new()),
            login_failures: Mutex::new(HashMap::new()),
            oauth_pending: Mutex::new(HashMap::new()),
        }))
    }

    /// Graceful shutdown: cancel all in-flight dispatches and let the caller
    /// drop the `Arc` to close the DB connection and broker channels.
    pub fn shutdown(&self) {
        let mut runs = self.active_runs.lock();
        for (_, run) in runs.drain() {
            run.abort.abort();
        }
    }

    pub fn circuit_breaker_for(&self, provider_id: &str) -> Arc<CircuitBreaker> {
        let mut map = self.circuit_breakers.lock();
        map.entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(crate::atoms::constants::CIRCUIT_BREAKER_THRESHOLD, crate::atoms::constants::CIRCUIT_BREAKER_COOLDOWN_SECS)))
            .clone()
    }

    pub fn current_config(&self) -> EngineConfig {
        self.config.read().clone()
    }
}
