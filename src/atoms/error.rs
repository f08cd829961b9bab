// ── Tetora Atoms: Error Types ────────────────────────────────────────────
// Single canonical error enum for the orchestrator, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Provider, Tool…) plus
//     the abstract error-kind taxonomy the HTTP layer maps to a status code.
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • `TetoraError` → `String` conversion is provided via `Display`.
//   • No variant carries secret material (API keys, passwords) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TetoraError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Request failed input validation. Maps to HTTP 400.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist. Maps to HTTP 404.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request conflicts with current state (e.g. dispatch already running,
    /// duplicate name). Maps to HTTP 409.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller is not authenticated. Maps to HTTP 401.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is authenticated but lacks permission. Maps to HTTP 403.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Caller exceeded a rate limit. Maps to HTTP 429.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Operation exceeded its deadline. Maps to HTTP 504.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation was cancelled by the caller or a context cancellation.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// AI provider HTTP or API-level failure (non-secret detail only).
    /// Maps to HTTP 502. `retryable` marks transient provider errors
    /// (network, 5xx, rate-limit) the dispatch/provider retry loop may retry.
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String, retryable: bool },

    /// Tool execution failure. Surfaced to the model as a `tool_result` with
    /// `is_error=true`, never aborts the provider loop by itself.
    #[error("Tool error: {tool}: {message}")]
    Tool { tool: String, message: String },

    /// Engine or agent configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for conditions that don't yet have a dedicated variant.
    /// Maps to HTTP 500. Prefer adding a specific variant over using this.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl TetoraError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider { provider: provider.into(), message: message.into(), retryable }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool { tool: tool.into(), message: message.into() }
    }

    /// The abstract error kind name used in logs and the `{"error": ...}` body,
    /// matching the taxonomy named in spec §7.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "notFound",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::RateLimited(_) => "rateLimited",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Provider { .. } => "providerError",
            Self::Tool { .. } => "toolError",
            Self::Io(_) | Self::Serialization(_) | Self::Network(_) | Self::Database(_)
            | Self::Config(_) | Self::Internal(_) => "internal",
        }
    }

    /// HTTP status code per spec §7's kind→status mapping.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::RateLimited(_) => 429,
            Self::Provider { .. } => 502,
            Self::Timeout(_) => 504,
            Self::Cancelled(_) => 499,
            _ => 500,
        }
    }
}

// ── Migration bridge: String → TetoraError ─────────────────────────────────
// Lets call sites still producing ad-hoc `String` errors use `?` in functions
// that return `TetoraResult<T>`.

impl From<String> for TetoraError {
    fn from(s: String) -> Self {
        TetoraError::Internal(s)
    }
}

impl From<&str> for TetoraError {
    fn from(s: &str) -> Self {
        TetoraError::Internal(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All orchestrator operations should return this type.
pub type TetoraResult<T> = Result<T, TetoraError>;

impl From<TetoraError> for String {
    fn from(e: TetoraError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_table() {
        assert_eq!(TetoraError::validation("x").status_code(), 400);
        assert_eq!(TetoraError::Unauthorized("x".into()).status_code(), 401);
        assert_eq!(TetoraError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(TetoraError::not_found("x").status_code(), 404);
        assert_eq!(TetoraError::conflict("x").status_code(), 409);
        assert_eq!(TetoraError::RateLimited("x".into()).status_code(), 429);
        assert_eq!(TetoraError::provider("openai", "x", true).status_code(), 502);
        assert_eq!(TetoraError::Timeout("x".into()).status_code(), 504);
        assert_eq!(TetoraError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn kind_names_match_taxonomy() {
        assert_eq!(TetoraError::validation("x").kind(), "validation");
        assert_eq!(TetoraError::tool("exec", "x").kind(), "toolError");
        assert_eq!(TetoraError::provider("openai", "x", false).kind(), "providerError");
    }

    #[test]
    fn string_conversion_roundtrips_through_internal() {
        let err: TetoraError = "boom".into();
        assert!(matches!(err, TetoraError::Internal(_)));
        assert_eq!(err.to_string(), "Internal error: boom");
    }
}
