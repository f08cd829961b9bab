//! HTTP gateway (C12): route registration, middleware chain, admin surface.
//!
//! Middleware ordering follows spec §4.11 exactly — outermost first:
//! `recovery → trace → bodySizeLimit → perIPRateLimit → dashboardAuth →
//! ipAllowlist → apiAuth → mux`. Built with `axum::middleware::from_fn`
//! layers applied in reverse (the last `.layer()` call wraps outermost),
//! matching the teacher's preference for function middleware over
//! hand-rolled `tower::Layer`s.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod sse;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware as axum_mw, Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::server::Server;

async fn get_healthz(State(server): State<Arc<Server>>) -> Json<serde_json::Value> {
    let db_ok = {
        let conn = server.db.lock();
        conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
    };
    Json(json!({ "status": if db_ok { "ok" } else { "degraded" }, "dbOk": db_ok }))
}

async fn get_metrics(State(server): State<Arc<Server>>) -> (StatusCode, String) {
    let active_runs = server.active_runs.lock().len();
    let tracker = &server.daily_tracker;
    let body = format!(
        "# HELP tetora_active_runs Number of currently running dispatch tasks\n\
         # TYPE tetora_active_runs gauge\n\
         tetora_active_runs {active_runs}\n\
         # HELP tetora_tokens_in_today Input tokens consumed since UTC midnight\n\
         # TYPE tetora_tokens_in_today counter\n\
         tetora_tokens_in_today {tokens_in}\n\
         # HELP tetora_tokens_out_today Output tokens produced since UTC midnight\n\
         # TYPE tetora_tokens_out_today counter\n\
         tetora_tokens_out_today {tokens_out}\n\
         # HELP tetora_cost_usd_today Estimated USD cost accrued since UTC midnight\n\
         # TYPE tetora_cost_usd_today gauge\n\
         tetora_cost_usd_today {cost}\n",
        active_runs = active_runs,
        tokens_in = tracker.tokens_in.load(std::sync::atomic::Ordering::Relaxed),
        tokens_out = tracker.tokens_out.load(std::sync::atomic::Ordering::Relaxed),
        cost = tracker.spent_usd(),
    );
    (StatusCode::OK, body)
}

/// Builds the full axum `Router`, including the middleware chain, for the
/// given `Server` state. Callers (`main.rs`, integration tests) bind it to
/// a listener via `axum::serve`.
pub fn build_router(server: Arc<Server>) -> Router {
    let api = Router::new()
        // ── dispatch & cancel (C7) ──────────────────────────────────────
        .route("/dispatch", post(handlers::dispatch::post_dispatch))
        .route("/dispatch/estimate", post(handlers::dispatch::post_dispatch_estimate))
        .route("/dispatch/:id/retry", post(handlers::dispatch::post_dispatch_retry))
        .route("/dispatch/:id/reroute", post(handlers::dispatch::post_dispatch_reroute))
        .route("/dispatch/:id/stream", get(handlers::dispatch::get_dispatch_stream))
        .route("/cancel", post(handlers::dispatch::post_cancel_all))
        .route("/cancel/:id", post(handlers::dispatch::post_cancel_one))
        .route("/tasks/running", get(handlers::dispatch::get_tasks_running))
        // ── offline queue (C1) ──────────────────────────────────────────
        .route("/queue", get(handlers::queue::get_queue).post(handlers::queue::post_queue))
        .route("/queue/:id", get(handlers::queue::get_queue_item).delete(handlers::queue::delete_queue_item))
        .route("/queue/:id/retry", post(handlers::queue::post_queue_retry))
        // ── smart router (C8) ───────────────────────────────────────────
        .route("/route", post(handlers::route::post_route))
        .route("/route/classify", post(handlers::route::post_route_classify))
        .route("/route/:id", get(handlers::route::get_route_result))
        // ── workflows (C9) ───────────────────────────────────────────────
        .route("/workflows", get(handlers::workflows::get_workflow_runs).post(handlers::workflows::post_workflow_run))
        .route("/workflows/:id", get(handlers::workflows::get_workflow_run))
        .route("/workflows/:id/cancel", post(handlers::workflows::post_workflow_cancel))
        // ── SSE streams (C2) ────────────────────────────────────────────
        .route("/events/dashboard", get(handlers::dashboard::get_dashboard_stream))
        // ── sessions ─────────────────────────────────────────────────────
        .route("/sessions/:id", get(handlers::sessions::get_session))
        .route("/sessions/:id/watch", get(handlers::sessions::get_session_watch))
        .route("/sessions/:id/mirror", post(handlers::sessions::post_session_mirror))
        // ── tool registry / MCP introspection (C6) ───────────────────────
        .route("/api/tools", get(handlers::tools::get_tools))
        .route("/api/mcp/servers", get(handlers::tools::get_mcp_servers))
        .route("/api/mcp/servers/:id/restart", post(handlers::tools::post_mcp_restart))
        // ── hybrid search admin (C11) ────────────────────────────────────
        .route("/api/embedding/search", post(handlers::memory::post_embedding_search))
        .route("/api/embedding/reindex", post(handlers::memory::post_embedding_reindex))
        .route("/api/embedding/status", get(handlers::memory::get_embedding_status))
        // ── OAuth flows ──────────────────────────────────────────────────
        .route("/api/oauth/:svc/authorize", get(handlers::oauth::get_oauth_authorize))
        .route("/api/oauth/:svc/callback", get(handlers::oauth::get_oauth_callback))
        .route("/api/oauth/:svc/status", get(handlers::oauth::get_oauth_status))
        .route("/api/oauth/:svc/revoke", post(handlers::oauth::post_oauth_revoke))
        // ── dashboard login ──────────────────────────────────────────────
        .route("/dashboard/login", post(handlers::auth::post_dashboard_login));

    let base = Router::new()
        .route("/healthz", get(get_healthz))
        .route("/metrics", get(get_metrics))
        .merge(api)
        .with_state(server.clone());

    // Middleware applied outermost-first via repeated `.layer()` — axum
    // wraps each call around the previous, so the LAST `.layer()` call here
    // is the OUTERMOST layer at request time, matching §4.11's order.
    base.layer(axum_mw::from_fn_with_state(server.clone(), middleware::api_auth))
        .layer(axum_mw::from_fn_with_state(server.clone(), middleware::ip_allowlist))
        .layer(axum_mw::from_fn_with_state(server.clone(), middleware::dashboard_auth))
        .layer(axum_mw::from_fn_with_state(server.clone(), middleware::per_ip_rate_limit))
        .layer(axum_mw::from_fn(middleware::body_size_limit))
        .layer(axum_mw::from_fn(middleware::trace))
        .layer(axum_mw::from_fn(middleware::recovery))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

/// Periodic sweep dropping idle rate-limiter entries (§4.11's "cleans up
/// idle IPs periodically").
pub fn spawn_rate_limiter_cleanup(server: Arc<Server>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(120));
        loop {
            interval.tick().await;
            let started = Instant::now();
            crate::security::rate_limiter_cleanup(&server);
            log::debug!("[http] rate limiter cleanup took {:?}", started.elapsed());
        }
    })
}
