// ── Tool profile / trust derivation (C6) ──────────────────────────────────
// Transcribed directly from spec §4.5 — per-session tool allowance derives
// from (role.toolProfile, sessionScope, complexity).

use crate::atoms::types::{Complexity, SessionScope, ToolProfile, TrustLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolAllowance {
    pub trust_level: TrustLevel,
    pub tool_profile: ToolProfile,
    pub sandbox: bool,
    /// `true` when complexity is `simple` — no tools are offered at all.
    pub tools_disabled: bool,
}

pub fn derive_tool_allowance(role_profile: ToolProfile, scope: SessionScope, complexity: Complexity) -> ToolAllowance {
    let (mut trust_level, mut tool_profile, mut sandbox) = (TrustLevel::Auto, role_profile, false);

    match scope {
        SessionScope::Main => {}
        SessionScope::Dm => {
            trust_level = TrustLevel::min(trust_level, TrustLevel::Suggest);
            sandbox = true;
        }
        SessionScope::Group => {
            trust_level = TrustLevel::Observe;
            tool_profile = ToolProfile::Minimal;
            sandbox = true;
        }
    }

    let tools_disabled = matches!(complexity, Complexity::Simple);
    if matches!(complexity, Complexity::Standard) && !matches!(scope, SessionScope::Group) {
        // "standard" set — never widen beyond what the scope already allows.
        if matches!(tool_profile, ToolProfile::Full) {
            tool_profile = ToolProfile::Standard;
        }
    }

    ToolAllowance { trust_level, tool_profile, sandbox, tools_disabled }
}

/// The more restrictive of two trust levels. Invalid/unparseable inputs
/// degrade to `observe` per spec §4.5 — callers parse with
/// `TrustLevel::from_str_degrading` before calling this.
pub fn min_trust(a: TrustLevel, b: TrustLevel) -> TrustLevel {
    TrustLevel::min(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dm_scope_downgrades_trust_and_sandboxes() {
        let a = derive_tool_allowance(ToolProfile::Full, SessionScope::Dm, Complexity::Standard);
        assert_eq!(a.trust_level, TrustLevel::Suggest);
        assert!(a.sandbox);
    }

    #[test]
    fn group_scope_forces_observe_minimal_sandbox() {
        let a = derive_tool_allowance(ToolProfile::Full, SessionScope::Group, Complexity::Complex);
        assert_eq!(a.trust_level, TrustLevel::Observe);
        assert_eq!(a.tool_profile, ToolProfile::Minimal);
        assert!(a.sandbox);
    }

    #[test]
    fn simple_complexity_disables_tools() {
        let a = derive_tool_allowance(ToolProfile::Full, SessionScope::Main, Complexity::Simple);
        assert!(a.tools_disabled);
    }

    #[test]
    fn min_trust_picks_more_restrictive() {
        assert_eq!(min_trust(TrustLevel::Auto, TrustLevel::Suggest), TrustLevel::Suggest);
        assert_eq!(min_trust(TrustLevel::Observe, TrustLevel::Auto), TrustLevel::Observe);
    }
}
