// ── Provider HTTP: Retry, Circuit-Breaker, TLS Pinning & Request Signing ───
// Shared resilience utilities used by every provider adapter (C3). Adapted
// near-verbatim from the teacher's `engine/http.rs` — the retry/backoff/
// circuit-breaker shapes match spec §4.3's provider-call contract exactly.
// The audit log here is an instance owned by `Server` rather than a global
// static, since the Server-struct-as-process-state pattern (§9) holds all
// such state as fields.

use log::warn;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::atoms::constants::{
    AUDIT_LOG_CAPACITY, INITIAL_RETRY_DELAY_MS, MAX_RECONNECT_DELAY_MS, MAX_RETRY_DELAY_MS,
};

// ── Retryable status detection ───────────────────────────────────────────

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

// ── Backoff delay ─────────────────────────────────────────────────────────

/// Sleep with exponential backoff + ±25% jitter, respecting `Retry-After`.
/// Returns the actual delay for logging.
pub async fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt);
    let capped_ms = base_ms.min(MAX_RETRY_DELAY_MS);
    let delay_ms = if let Some(secs) = retry_after_secs {
        (secs.min(60) * 1000).max(capped_ms)
    } else {
        capped_ms
    };
    let jittered = apply_jitter(delay_ms);
    let delay = Duration::from_millis(jittered);
    tokio::time::sleep(delay).await;
    delay
}

/// Bridge/stream reconnect backoff — longer cap (5 min) than request retries.
pub async fn reconnect_delay(attempt: u32) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt.min(12));
    let capped_ms = base_ms.min(MAX_RECONNECT_DELAY_MS);
    let jittered = apply_jitter(capped_ms);
    let delay = Duration::from_millis(jittered);
    tokio::time::sleep(delay).await;
    delay
}

fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = (base_ms / 4) as i64;
    if jitter_range == 0 {
        return base_ms.max(100);
    }
    let offset = (rand_jitter() % (2 * jitter_range + 1)) - jitter_range;
    let result = base_ms as i64 + offset;
    result.max(100) as u64
}

fn rand_jitter() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as i64
}

pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    header_value.trim().parse::<u64>().ok()
}

// ── Circuit Breaker ───────────────────────────────────────────────────────

/// Trips after `threshold` consecutive failures, then rejects for
/// `cooldown_secs` before allowing a half-open probe through.
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    tripped_at: AtomicU64,
    threshold: u32,
    cooldown_secs: u64,
}

impl CircuitBreaker {
    pub const fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            tripped_at: AtomicU64::new(0),
            threshold,
            cooldown_secs,
        }
    }

    pub fn check(&self) -> Result<(), String> {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures < self.threshold {
            return Ok(());
        }

        let tripped = self.tripped_at.load(Ordering::Relaxed);
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        if now - tripped < self.cooldown_secs {
            Err(format!(
                "Circuit breaker open: {} consecutive failures, cooling down for {}s",
                failures,
                self.cooldown_secs - (now - tripped)
            ))
        } else {
            Ok(())
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.tripped_at.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let prev = self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        if prev + 1 >= self.threshold {
            let now = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            self.tripped_at.store(now, Ordering::Relaxed);
            warn!(
                "[circuit-breaker] tripped after {} consecutive failures — cooling down {}s",
                prev + 1,
                self.cooldown_secs
            );
        }
    }
}

// ── Outbound request signing & audit ─────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RequestAuditEntry {
    pub timestamp: String,
    pub provider: String,
    pub model: String,
    pub hash: String,
    pub status: u16,
}

pub struct RequestAuditLog {
    inner: Mutex<RequestAuditLogInner>,
}

struct RequestAuditLogInner {
    entries: Vec<RequestAuditEntry>,
    head: usize,
    total: u64,
}

impl Default for RequestAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestAuditLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RequestAuditLogInner {
                entries: Vec::with_capacity(AUDIT_LOG_CAPACITY),
                head: 0,
                total: 0,
            }),
        }
    }

    /// Computes a SHA-256 hash of `provider||model||timestamp||body` and
    /// appends it to the ring buffer. Call immediately before `.send()`.
    pub fn sign_and_log(&self, provider: &str, model: &str, body_bytes: &[u8]) -> String {
        let now = chrono::Utc::now().to_rfc3339();
        let mut hasher = Sha256::new();
        hasher.update(provider.as_bytes());
        hasher.update(model.as_bytes());
        hasher.update(now.as_bytes());
        hasher.update(body_bytes);
        let digest = hasher.finalize();
        let hash_hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

        let entry = RequestAuditEntry {
            timestamp: now,
            provider: provider.to_string(),
            model: model.to_string(),
            hash: hash_hex.clone(),
            status: 0,
        };

        let mut inner = self.inner.lock();
        if inner.entries.len() < AUDIT_LOG_CAPACITY {
            inner.entries.push(entry);
        } else {
            let head = inner.head;
            inner.entries[head] = entry;
        }
        inner.head = (inner.head + 1) % AUDIT_LOG_CAPACITY;
        inner.total += 1;
        hash_hex
    }

    pub fn update_last_status(&self, status: u16) {
        let mut inner = self.inner.lock();
        if inner.entries.is_empty() {
            return;
        }
        let idx = if inner.entries.len() < AUDIT_LOG_CAPACITY {
            inner.entries.len() - 1
        } else {
            (inner.head + AUDIT_LOG_CAPACITY - 1) % AUDIT_LOG_CAPACITY
        };
        inner.entries[idx].status = status;
    }

    pub fn recent(&self, limit: usize) -> Vec<RequestAuditEntry> {
        let inner = self.inner.lock();
        let len = inner.entries.len();
        if len == 0 {
            return vec![];
        }
        let count = limit.min(len);
        let mut result = Vec::with_capacity(count);
        let mut idx = if inner.entries.len() < AUDIT_LOG_CAPACITY {
            inner.entries.len().wrapping_sub(1)
        } else {
            (inner.head + AUDIT_LOG_CAPACITY - 1) % AUDIT_LOG_CAPACITY
        };
        for _ in 0..count {
            result.push(inner.entries[idx].clone());
            idx = (idx + AUDIT_LOG_CAPACITY - 1) % AUDIT_LOG_CAPACITY;
        }
        result
    }

    pub fn total(&self) -> u64 {
        self.inner.lock().total
    }
}

// ── Certificate-pinned client factory ────────────────────────────────────

use reqwest::Client;
use rustls::ClientConfig;
use std::sync::LazyLock;

fn pinned_tls_config() -> ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("failed to set default TLS protocol versions")
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

static PINNED_CLIENT: LazyLock<Client> = LazyLock::new(|| {
    let tls = pinned_tls_config();
    Client::builder()
        .use_preconfigured_tls(tls)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
        .expect("failed to build certificate-pinned reqwest::Client")
});

/// The shared certificate-pinned HTTP client. Providers use this instead of
/// building their own `reqwest::Client`.
pub fn pinned_client() -> Client {
    PINNED_CLIENT.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(529));
        assert!(!is_retryable_status(200));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn parse_retry_after_valid() {
        assert_eq!(parse_retry_after("5"), Some(5));
        assert_eq!(parse_retry_after(" 30 "), Some(30));
        assert_eq!(parse_retry_after("not-a-number"), None);
    }

    #[test]
    fn jitter_stays_in_range() {
        for base in [100, 1000, 5000, 30_000] {
            let result = apply_jitter(base);
            let lower = (base as f64 * 0.7) as u64;
            let upper = (base as f64 * 1.3) as u64;
            assert!(result >= lower.max(100) && result <= upper);
        }
    }

    #[test]
    fn circuit_breaker_trips_and_recovers() {
        let cb = CircuitBreaker::new(3, 1);
        assert!(cb.check().is_ok());
        cb.record_failure();
        cb.record_failure();
        assert!(cb.check().is_ok());
        cb.record_failure();
        assert!(cb.check().is_err());
        cb.record_success();
        assert!(cb.check().is_ok());
    }

    #[test]
    fn audit_log_ring_buffer() {
        let log = RequestAuditLog::new();
        assert_eq!(log.total(), 0);
        for i in 0..3 {
            log.sign_and_log("test", &format!("model-{}", i), b"{}");
        }
        assert_eq!(log.total(), 3);
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].model, "model-2");
    }

    #[test]
    fn sign_request_produces_hex_hash() {
        let log = RequestAuditLog::new();
        let hash = log.sign_and_log("openai", "gpt-4", b"{\"test\":true}");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
