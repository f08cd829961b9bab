// ── Security & observability (C15) ───────────────────────────────────────
// Per-IP rate limiting, login lockout, IP allowlists, HMAC-signed dashboard
// cookies and the trace-id helper the HTTP layer's `trace` middleware uses.
// No dedicated teacher module covers rate limiting/lockout — the closest
// analogue is `providers::http::CircuitBreaker`'s atomic-counter-with-
// cooldown shape, which informs the same approach here, guarded instead by
// `Server`'s own `parking_lot::Mutex`-protected maps (spec §5's "Rate
// limiters and login limiter are each guarded by their own mutex").
// HMAC-signed cookie uses `hmac`+`sha2`+`subtle`, already teacher
// dependencies for outbound request signing.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::atoms::constants::{
    LOGIN_LOCKOUT_COOLDOWN_SECS, LOGIN_LOCKOUT_THRESHOLD, LOGIN_LOCKOUT_WINDOW_SECS, RATE_LIMIT_WINDOW_SECS, SESSION_COOKIE_TTL_SECS,
};
use crate::server::Server;

type HmacSha256 = Hmac<Sha256>;

// ── Per-IP sliding-window rate limiter ───────────────────────────────────

/// Returns `true` if `ip` is allowed one more request under a 60s sliding
/// window capped at `max_per_min` (§4.11, §4.13, testable property #10).
/// Stale timestamps are pruned on every call so the map never grows
/// unbounded for IPs that stop sending traffic.
pub fn rate_limit_allow(server: &Server, ip: &str, max_per_min: u32) -> bool {
    let mut map = server.rate_limiter.lock();
    let now = Instant::now();
    let window = Duration::from_secs(RATE_LIMIT_WINDOW_SECS);
    let entry = map.entry(ip.to_string()).or_default();
    entry.retain(|t| now.duration_since(*t) < window);
    if entry.len() >= max_per_min as usize {
        return false;
    }
    entry.push(now);
    true
}

/// Periodic sweep dropping IPs with no requests in the last window, so the
/// rate-limiter map doesn't retain every IP that has ever connected.
pub fn rate_limiter_cleanup(server: &Server) {
    let mut map = server.rate_limiter.lock();
    let now = Instant::now();
    let window = Duration::from_secs(RATE_LIMIT_WINDOW_SECS);
    map.retain(|_, hits| {
        hits.retain(|t| now.duration_since(*t) < window);
        !hits.is_empty()
    });
}

// ── Login lockout ────────────────────────────────────────────────────────

/// Per-IP failure bookkeeping: a rolling count since `window_start`, plus
/// the instant the IP crossed the lockout threshold (if it has).
#[derive(Debug, Clone, Copy)]
pub struct LoginFailures {
    count: u32,
    window_start: Instant,
    locked_at: Option<Instant>,
}

/// Records one failed login attempt for `ip`. Returns `true` if this
/// failure just crossed the lockout threshold (5 within 15 minutes).
pub fn record_login_failure(server: &Server, ip: &str) -> bool {
    let mut map = server.login_failures.lock();
    let now = Instant::now();
    let window = Duration::from_secs(LOGIN_LOCKOUT_WINDOW_SECS);

    let entry = map.entry(ip.to_string()).or_insert(LoginFailures { count: 0, window_start: now, locked_at: None });

    // A failure window that's aged out (and isn't currently locked) starts
    // a fresh count rather than accumulating indefinitely.
    if entry.locked_at.is_none() && now.duration_since(entry.window_start) >= window {
        entry.count = 0;
        entry.window_start = now;
    }

    entry.count += 1;
    if entry.count >= LOGIN_LOCKOUT_THRESHOLD {
        let just_locked = entry.locked_at.is_none();
        entry.locked_at = Some(now);
        return just_locked;
    }
    false
}

/// Clears the failure count for `ip`, called on a successful login.
pub fn record_login_success(server: &Server, ip: &str) {
    server.login_failures.lock().remove(ip);
}

/// `true` if `ip` is currently locked out. Lockout expires automatically
/// once `LOGIN_LOCKOUT_COOLDOWN_SECS` elapses without further activity
/// (testable property #11) — each subsequent failed attempt while locked
/// refreshes `locked_at`, matching "without activity" in the spec wording.
pub fn is_locked(server: &Server, ip: &str) -> bool {
    let map = server.login_failures.lock();
    match map.get(ip) {
        Some(f) if f.count >= LOGIN_LOCKOUT_THRESHOLD => f.locked_at.map(|at| Instant::now().duration_since(at) < Duration::from_secs(LOGIN_LOCKOUT_COOLDOWN_SECS)).unwrap_or(false),
        _ => false,
    }
}

// ── IP allowlist ──────────────────────────────────────────────────────────

/// One parsed allowlist entry: a single address or a CIDR block.
pub enum AllowEntry {
    Single(IpAddr),
    Cidr(IpAddr, u8),
}

pub fn parse_allowlist(entries: &[String]) -> Vec<AllowEntry> {
    entries
        .iter()
        .filter_map(|raw| {
            let raw = raw.trim();
            if let Some((addr, bits)) = raw.split_once('/') {
                let ip: IpAddr = addr.parse().ok()?;
                let prefix: u8 = bits.parse().ok()?;
                Some(AllowEntry::Cidr(ip, prefix))
            } else {
                raw.parse().ok().map(AllowEntry::Single)
            }
        })
        .collect()
}

fn ip_in_cidr(ip: IpAddr, network: IpAddr, prefix: u8) -> bool {
    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix as u32) };
            (u32::from(ip) & mask) == (u32::from(net) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            let mask = if prefix == 0 { 0u128 } else { u128::MAX << (128 - prefix as u32) };
            (u128::from(ip) & mask) == (u128::from(net) & mask)
        }
        _ => false,
    }
}

/// Empty allowlist means "no restriction" — every IP passes.
pub fn ip_allowed(allowlist: &[AllowEntry], ip: IpAddr) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    allowlist.iter().any(|entry| match entry {
        AllowEntry::Single(addr) => *addr == ip,
        AllowEntry::Cidr(net, prefix) => ip_in_cidr(ip, *net, *prefix),
    })
}

// ── Dashboard session cookie ──────────────────────────────────────────────

/// Signs `"<unixTs>:<HMAC-SHA256(unixTs, secret)>"` (§4.11). The secret is
/// the configured dashboard password/token — whichever is set.
pub fn sign_session_cookie(secret: &str, unix_ts: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(unix_ts.to_string().as_bytes());
    let sig = mac.finalize().into_bytes();
    format!("{}:{}", unix_ts, hex_encode(&sig))
}

/// Verifies a cookie value produced by [`sign_session_cookie`]: splits the
/// timestamp, recomputes the HMAC and compares in constant time, and
/// checks the 24h lifetime.
pub fn verify_session_cookie(secret: &str, cookie: &str) -> bool {
    let Some((ts_str, sig_hex)) = cookie.split_once(':') else { return false };
    let Ok(ts) = ts_str.parse::<i64>() else { return false };

    let now = chrono::Utc::now().timestamp();
    if now - ts > SESSION_COOKIE_TTL_SECS || ts > now + 60 {
        return false;
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(ts_str.as_bytes());
    let expected = mac.finalize().into_bytes();
    let Some(actual) = hex_decode(sig_hex) else { return false };

    expected.as_slice().ct_eq(&actual).into()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok()).collect()
}

// ── Trace id ──────────────────────────────────────────────────────────────

/// `<prefix>-<6 hex>` request trace id (§4.11). Uses a random `u32` rather
/// than a full UUID — plenty of entropy for a human-scannable log/header
/// correlation id, not a security token.
pub fn new_trace_id(prefix: &str) -> String {
    let mut buf = [0u8; 4];
    let _ = getrandom::getrandom(&mut buf);
    let n = u32::from_le_bytes(buf);
    format!("{}-{:06x}", prefix, n & 0xFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_admits_up_to_max_per_min() {
        let db = crate::store::open_in_memory().unwrap();
        let server = Server::init(crate::atoms::types::EngineConfig::default(), "/tmp/t.json".into(), db).unwrap();
        for _ in 0..3 {
            assert!(rate_limit_allow(&server, "1.2.3.4", 3));
        }
        assert!(!rate_limit_allow(&server, "1.2.3.4", 3));
        assert!(rate_limit_allow(&server, "5.6.7.8", 3), "a different IP has its own window");
    }

    #[test]
    fn login_lockout_trips_after_threshold_and_resets_on_success() {
        let db = crate::store::open_in_memory().unwrap();
        let server = Server::init(crate::atoms::types::EngineConfig::default(), "/tmp/t2.json".into(), db).unwrap();
        for _ in 0..(LOGIN_LOCKOUT_THRESHOLD - 1) {
            assert!(!record_login_failure(&server, "9.9.9.9"));
        }
        assert!(!is_locked(&server, "9.9.9.9"));
        assert!(record_login_failure(&server, "9.9.9.9"));
        assert!(is_locked(&server, "9.9.9.9"));

        record_login_success(&server, "9.9.9.9");
        assert!(!is_locked(&server, "9.9.9.9"));
    }

    #[test]
    fn ip_allowlist_matches_cidr_and_exact() {
        let allowlist = parse_allowlist(&["10.0.0.0/8".to_string(), "203.0.113.7".to_string()]);
        assert!(ip_allowed(&allowlist, "10.1.2.3".parse().unwrap()));
        assert!(ip_allowed(&allowlist, "203.0.113.7".parse().unwrap()));
        assert!(!ip_allowed(&allowlist, "8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn empty_allowlist_allows_everything() {
        assert!(ip_allowed(&[], "1.1.1.1".parse().unwrap()));
    }

    #[test]
    fn session_cookie_round_trips_and_rejects_tampering() {
        let cookie = sign_session_cookie("secret", chrono::Utc::now().timestamp());
        assert!(verify_session_cookie("secret", &cookie));
        assert!(!verify_session_cookie("wrong-secret", &cookie));

        let stale = sign_session_cookie("secret", chrono::Utc::now().timestamp() - SESSION_COOKIE_TTL_SECS - 10);
        assert!(!verify_session_cookie("secret", &stale));
    }

    #[test]
    fn trace_id_has_expected_shape() {
        let id = new_trace_id("req");
        assert!(id.starts_with("req-"));
        assert_eq!(id.len(), "req-".len() + 6);
    }
}
