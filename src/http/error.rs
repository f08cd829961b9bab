// ── HTTP error mapping ────────────────────────────────────────────────────
// Turns `TetoraError` into the `{"error": "<message>"}` JSON body spec §7
// mandates, using `TetoraError::status_code`/`kind` for the status and log
// level. A thin newtype rather than `impl IntoResponse for TetoraError`
// directly, since `TetoraError` lives in `atoms` and must stay free of any
// `axum` dependency.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, warn};
use serde_json::json;

use crate::atoms::error::TetoraError;

pub struct ApiError(pub TetoraError);

impl From<TetoraError> for ApiError {
    fn from(e: TetoraError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("[http] {} ({})", self.0, self.0.kind());
        } else {
            warn!("[http] {} ({})", self.0, self.0.kind());
        }
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
