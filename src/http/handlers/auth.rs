// ── /dashboard/login ──────────────────────────────────────────────────────
// Password check for `dashboardAuth`: on success, signs and sets the
// HMAC cookie `middleware::dashboard_auth` later verifies; on failure,
// records against the per-IP login lockout (§4.13, testable property #11).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::atoms::error::TetoraError;
use crate::http::error::ApiResult;
use crate::security;
use crate::server::Server;

#[derive(Deserialize)]
pub struct LoginBody {
    pub password: String,
}

fn client_ip(addr: Option<ConnectInfo<SocketAddr>>) -> String {
    addr.map(|ConnectInfo(a)| a.ip()).as_ref().map(IpAddr::to_string).unwrap_or_else(|| "unknown".to_string())
}

pub async fn post_dashboard_login(
    State(server): State<Arc<Server>>,
    addr: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<LoginBody>,
) -> ApiResult<Response> {
    let ip = client_ip(addr);
    if security::is_locked(&server, &ip) {
        return Err(TetoraError::Forbidden(format!("too many failed login attempts from {}", ip)).into());
    }

    let cfg = server.current_config();
    if !cfg.dashboard_auth.enabled {
        return Err(TetoraError::validation("dashboard auth is not enabled").into());
    }
    let secret = cfg.dashboard_auth.password.clone().or_else(|| cfg.dashboard_auth.token.clone()).ok_or_else(|| TetoraError::Config("dashboardAuth has no password or token configured".to_string()))?;

    if body.password != secret {
        let just_locked = security::record_login_failure(&server, &ip);
        let conn = server.db.lock();
        let _ = crate::store::audit::record(&conn, "login_failed", "dashboard", if just_locked { "lockout threshold reached" } else { "bad password" }, &ip);
        return Err(TetoraError::Unauthorized("invalid password".to_string()).into());
    }

    security::record_login_success(&server, &ip);
    {
        let conn = server.db.lock();
        let _ = crate::store::audit::record(&conn, "login_success", "dashboard", "", &ip);
    }

    let cookie = security::sign_session_cookie(&secret, chrono::Utc::now().timestamp());
    let cookie_header = format!("tetora_session={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}", cookie, crate::atoms::constants::SESSION_COOKIE_TTL_SECS);

    let mut resp = Json(json!({ "ok": true })).into_response();
    if let Ok(value) = header::HeaderValue::from_str(&cookie_header) {
        resp.headers_mut().insert(header::SET_COOKIE, value);
    }
    Ok(resp)
}
