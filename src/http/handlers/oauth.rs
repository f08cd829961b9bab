// ── /api/oauth/{svc}/authorize|callback|status|revoke ─────────────────────
// Three-legged OAuth2 authorization-code flow for the channel services a
// role's tools may call out to (e.g. posting back to a chat channel on the
// user's behalf). Tetora persists only the opaque token payload the
// provider returns (`store::oauth`); it never interprets scopes or
// expiry beyond what `status` reports back verbatim.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::atoms::error::{TetoraError, TetoraResult};
use crate::http::error::ApiResult;
use crate::security;
use crate::server::Server;
use crate::store::oauth;
use crate::vault;

struct ProviderEndpoints {
    authorize_url: &'static str,
    token_url: &'static str,
}

/// Authorize/token endpoints for the channel services Tetora commonly
/// integrates with. An operator pointing `oauth.services` at a name not
/// in this table gets a clear `validation` error rather than a silent
/// no-op — there's no generic OAuth discovery protocol to fall back to.
fn endpoints_for(service: &str) -> Option<ProviderEndpoints> {
    match service {
        "github" => Some(ProviderEndpoints { authorize_url: "https://github.com/login/oauth/authorize", token_url: "https://github.com/login/oauth/access_token" }),
        "google" => Some(ProviderEndpoints { authorize_url: "https://accounts.google.com/o/oauth2/v2/auth", token_url: "https://oauth2.googleapis.com/token" }),
        "slack" => Some(ProviderEndpoints { authorize_url: "https://slack.com/oauth/v2/authorize", token_url: "https://slack.com/api/oauth.v2.access" }),
        "discord" => Some(ProviderEndpoints { authorize_url: "https://discord.com/api/oauth2/authorize", token_url: "https://discord.com/api/oauth2/token" }),
        _ => None,
    }
}

pub async fn get_oauth_authorize(State(server): State<Arc<Server>>, Path(service): Path<String>) -> ApiResult<Response> {
    let cfg = server.current_config();
    let svc_cfg = cfg.oauth.services.get(&service).ok_or_else(|| TetoraError::not_found(format!("oauth service '{}' not configured", service)))?;
    let endpoints = endpoints_for(&service).ok_or_else(|| TetoraError::validation(format!("unknown oauth provider '{}'", service)))?;
    let redirect_base = cfg.oauth.redirect_base.clone().ok_or_else(|| TetoraError::Config("oauth.redirectBase is not configured".to_string()))?;

    let state = security::new_trace_id("oauth");
    server.oauth_pending.lock().insert(state.clone(), service.clone());

    let redirect_uri = format!("{}/api/oauth/{}/callback", redirect_base.trim_end_matches('/'), service);
    let scopes = svc_cfg.scopes.join(" ");
    let url = format!(
        "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code",
        endpoints.authorize_url,
        urlencoding::encode(&svc_cfg.client_id),
        urlencoding::encode(&redirect_uri),
        urlencoding::encode(&scopes),
        urlencoding::encode(&state),
    );
    Ok(Redirect::temporary(&url).into_response())
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub async fn get_oauth_callback(State(server): State<Arc<Server>>, Path(service): Path<String>, Query(q): Query<CallbackQuery>) -> ApiResult<Json<Value>> {
    if let Some(err) = q.error {
        return Err(TetoraError::validation(format!("oauth provider returned an error: {}", err)).into());
    }
    let code = q.code.ok_or_else(|| TetoraError::validation("missing 'code' query parameter"))?;
    let state = q.state.ok_or_else(|| TetoraError::validation("missing 'state' query parameter"))?;

    let expected_service = server.oauth_pending.lock().remove(&state).ok_or_else(|| TetoraError::validation("unknown or expired oauth state"))?;
    if expected_service != service {
        return Err(TetoraError::validation("oauth state does not match callback service").into());
    }

    let cfg = server.current_config();
    let svc_cfg = cfg.oauth.services.get(&service).ok_or_else(|| TetoraError::not_found(format!("oauth service '{}' not configured", service)))?;
    let endpoints = endpoints_for(&service).ok_or_else(|| TetoraError::validation(format!("unknown oauth provider '{}'", service)))?;
    let redirect_base = cfg.oauth.redirect_base.clone().unwrap_or_default();
    let redirect_uri = format!("{}/api/oauth/{}/callback", redirect_base.trim_end_matches('/'), service);

    let resp = server
        .http_client
        .post(endpoints.token_url)
        .header(header::ACCEPT, "application/json")
        .form(&[("client_id", svc_cfg.client_id.as_str()), ("client_secret", svc_cfg.client_secret.as_str()), ("code", code.as_str()), ("redirect_uri", redirect_uri.as_str()), ("grant_type", "authorization_code")])
        .send()
        .await
        .map_err(|e| TetoraError::provider(service.clone(), e.to_string(), true))?;

    if !resp.status().is_success() {
        return Err(TetoraError::provider(service.clone(), format!("token exchange returned {}", resp.status()), false).into());
    }
    let payload: Value = resp.json().await.map_err(|e| TetoraError::provider(service.clone(), format!("invalid token response: {}", e), false))?;

    let stored = match cfg.oauth.encryption_key.as_deref() {
        Some(key) => vault::encrypt(key, &payload.to_string())?,
        None => payload.to_string(),
    };

    let conn = server.db.lock();
    oauth::put(&conn, &service, &stored)?;
    Ok(Json(json!({ "connected": true, "service": service })))
}

pub async fn get_oauth_status(State(server): State<Arc<Server>>, Path(service): Path<String>) -> ApiResult<Json<Value>> {
    let conn = server.db.lock();
    let stored = oauth::get(&conn, &service)?;
    Ok(Json(json!({ "service": service, "connected": stored.is_some() })))
}

/// Retrieves and decrypts a service's stored OAuth credential payload, for
/// use by tools that need to act on the user's behalf (§1). Not wired to
/// an HTTP route — credentials never leave the process once vaulted;
/// callers are in-process tool implementations.
pub fn load_credential(server: &Server, service: &str) -> TetoraResult<Option<String>> {
    let cfg = server.current_config();
    let conn = server.db.lock();
    let Some(stored) = oauth::get(&conn, service)? else {
        return Ok(None);
    };
    match cfg.oauth.encryption_key.as_deref() {
        Some(key) => Ok(Some(vault::decrypt(key, &stored)?)),
        None => Ok(Some(stored)),
    }
}

pub async fn post_oauth_revoke(State(server): State<Arc<Server>>, Path(service): Path<String>) -> ApiResult<Json<Value>> {
    let conn = server.db.lock();
    let revoked = oauth::revoke(&conn, &service)?;
    Ok(Json(json!({ "revoked": revoked })))
}

