// ── Tetora Atoms: Constants ──────────────────────────────────────────────

/// Async route store TTL (§4.6) — how long a cancelled/completed dispatch's
/// route stays resolvable for late-arriving SSE subscribers.
pub const ROUTE_TTL_SECS: u64 = 30 * 60;

/// SSE broker channel capacity (§4.2) — bounded, never blocks the publisher.
pub const SSE_CHANNEL_CAPACITY: usize = 64;

/// Default per-tool execution timeout when a task doesn't override it.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;

/// Max tool-call round-trips in a single dispatch before forcing a final
/// answer (§4.3's tool-call loop termination condition).
pub const MAX_TOOL_ROUNDS: u32 = 20;

/// Request-audit-log ring buffer capacity (§4.3 / C15).
pub const AUDIT_LOG_CAPACITY: usize = 500;

/// Provider HTTP retry tuning, mirrored from the teacher's `engine/http.rs`.
pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_RETRY_DELAY_MS: u64 = 1000;
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;
pub const MAX_RECONNECT_DELAY_MS: u64 = 300_000;

/// Circuit breaker defaults.
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
pub const CIRCUIT_BREAKER_COOLDOWN_SECS: u64 = 60;

/// Coding-keyword list used by the complexity classifier (§4.4), including
/// Japanese analogues. Matched case-insensitively against the raw prompt —
/// presence of any of these forces the `complex` tier.
pub const CODING_KEYWORDS: &[&str] = &[
    "implement", "debug", "refactor", "build", "write a function", "deploy",
    "optimize", "sql", "authentication", "migration", "code", "database",
    "compile", "benchmark", "algorithm", "api",
    "実装", "デバッグ", "リファクタ", "データベース", "アルゴリズム", "認証",
    "コードレビュー", "パイプライン", "最適化",
];

/// Chat-style sources for the classifier's "short prompt → simple" rule.
pub const CHAT_SOURCES: &[&str] = &[
    "discord", "telegram", "line", "slack", "whatsapp", "matrix", "teams",
    "signal", "gchat", "imessage", "chat",
];

/// Sources forced to the `complex` tier regardless of prompt content/length.
pub const COMPLEX_SOURCES: &[&str] = &["cron", "workflow", "agent-comm"];

/// Rate limiter sliding window size (§4.13 / C15).
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Login lockout threshold: 5 failures within a 15-minute window locks the
/// IP out for 15 minutes (§4.13, testable property #11).
pub const LOGIN_LOCKOUT_THRESHOLD: u32 = 5;
pub const LOGIN_LOCKOUT_WINDOW_SECS: u64 = 15 * 60;
pub const LOGIN_LOCKOUT_COOLDOWN_SECS: u64 = 15 * 60;

/// Dashboard session cookie lifetime (§4.11): 24 hours.
pub const SESSION_COOKIE_TTL_SECS: i64 = 24 * 60 * 60;

/// Daily token/cost tracker day boundary check interval.
pub const DAILY_TRACKER_CHECK_SECS: u64 = 60;

/// Broker topic every event is additionally mirrored to (§4.2's
/// "dashboard-wide" stream). Unlike per-task/per-session topics this one
/// is never torn down by a terminal event — the dashboard stream is
/// persistent for the life of the process.
pub const DASHBOARD_TOPIC: &str = "__dashboard__";
