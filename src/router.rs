// ── Smart router (C8) ──────────────────────────────────────────────────────
// Given a prompt, picks which role should handle it (spec §4.7): first a
// rule table (regex or keyword → role), then an optional coordinator-LLM
// pick bounded to the configured roles, then an optional embedding-nearest
// -role fallback. The rule-table shape and first-match-wins evaluation are
// the teacher's `engine/routing.rs` (`RoutingRule`/`resolve_route`) carried
// over near-verbatim; coordinator-pick and embedding-nearest-role are new,
// grounded in the provider-calling idiom of `providers::execute` and the
// embedding search of `memory/embedding.rs` respectively.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::atoms::types::{EngineConfig, SmartDispatchConfig};
use crate::providers::messages::{Message, ToolDefinition};
use crate::providers::AnyProvider;
use crate::server::Server;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulePatternKind {
    Regex,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    pub pattern_kind: RulePatternKind,
    pub pattern: String,
    pub role: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMethod {
    Rule,
    Coordinator,
    Embedding,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub role: String,
    pub confidence: f64,
    pub method: RouteMethod,
    pub matched_rule_id: Option<String>,
}

fn rule_matches(rule: &RoutingRule, prompt: &str) -> bool {
    if !rule.enabled {
        return false;
    }
    match rule.pattern_kind {
        RulePatternKind::Keyword => prompt.to_lowercase().contains(&rule.pattern.to_lowercase()),
        RulePatternKind::Regex => regex::Regex::new(&rule.pattern).map(|re| re.is_match(prompt)).unwrap_or_else(|e| {
            warn!("[router] rule '{}' has invalid regex '{}': {}", rule.id, rule.pattern, e);
            false
        }),
    }
}

/// First rule to match wins, evaluated in configured order — identical
/// contract to the teacher's `resolve_route`.
fn match_rule_table(cfg: &SmartDispatchConfig, prompt: &str) -> Option<RouteDecision> {
    for rule in &cfg.rules {
        if rule_matches(rule, prompt) {
            info!("[router] rule '{}' matched -> role '{}'", rule.id, rule.role);
            return Some(RouteDecision { role: rule.role.clone(), confidence: 1.0, method: RouteMethod::Rule, matched_rule_id: Some(rule.id.clone()) });
        }
    }
    None
}

/// Asks the coordinator role's LLM to pick one of the configured role ids.
/// The model is instructed to answer with exactly one role id and a
/// confidence in `[0,1]`; any deviation from that (unparseable response,
/// unknown role, provider error) is treated as "no pick" so the caller
/// falls through to the next method rather than erroring the whole route.
async fn coordinator_pick(server: &Arc<Server>, cfg: &EngineConfig, smart: &SmartDispatchConfig, prompt: &str) -> Option<RouteDecision> {
    let coordinator_id = smart.coordinator.as_ref()?;
    let role = cfg.roles.get(coordinator_id)?;
    let provider_cfg = match &role.provider {
        Some(id) => cfg.providers.iter().find(|p| &p.id == id)?,
        None => cfg.providers.first()?,
    };
    let provider = AnyProvider::from_config(server.http_client.clone(), provider_cfg);

    let role_ids: Vec<&str> = cfg.roles.keys().map(String::as_str).collect();
    let system = format!(
        "You are a routing coordinator. Pick exactly one role id from this list: {}. \
         Respond with strict JSON: {{\"role\": \"<id>\", \"confidence\": <0..1>}}. No prose.",
        role_ids.join(", ")
    );
    let messages = vec![Message::system(system), Message::user(prompt)];
    let model = role.model.clone().or_else(|| provider_cfg.default_model.clone()).unwrap_or_else(|| "gpt-4o-mini".to_string());

    let chunks = crate::providers::execute(server, &provider, &provider_cfg.id, &messages, &[] as &[ToolDefinition], &model, Some(0.0), cfg.default_timeout_secs).await.ok()?;
    let text: String = chunks.iter().filter_map(|c| c.delta_text.clone()).collect();
    let parsed: serde_json::Value = serde_json::from_str(text.trim()).ok()?;
    let picked_role = parsed["role"].as_str()?.to_string();
    let confidence = parsed["confidence"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0);

    if !cfg.roles.contains_key(&picked_role) {
        warn!("[router] coordinator picked unknown role '{}'", picked_role);
        return None;
    }

    info!("[router] coordinator picked role '{}' (confidence {:.2})", picked_role, confidence);
    Some(RouteDecision { role: picked_role, confidence, method: RouteMethod::Coordinator, matched_rule_id: None })
}

/// Embeds the prompt and each role's cached description, picking the role
/// whose description is nearest by cosine similarity. Roles without a
/// `description` are skipped — there's nothing to embed against.
async fn embedding_pick(server: &Arc<Server>, cfg: &EngineConfig, prompt: &str) -> Option<RouteDecision> {
    if !cfg.embedding.enabled {
        return None;
    }
    let api_key = cfg.providers.first().map(|p| p.api_key.clone()).filter(|k| !k.is_empty());
    let client = crate::memory::EmbeddingClient::new(server.http_client.clone(), &cfg.embedding, api_key);
    let query_vec = client.embed(prompt).await.ok()?;

    let mut best: Option<(String, f64)> = None;
    for (role_id, role) in &cfg.roles {
        let Some(description) = &role.description else { continue };
        let role_vec = match client.embed(description).await {
            Ok(v) => v,
            Err(e) => {
                warn!("[router] failed to embed role '{}' description: {}", role_id, e);
                continue;
            }
        };
        let sim = crate::memory::hybrid::cosine_similarity(&query_vec, &role_vec);
        if best.as_ref().map(|(_, s)| sim > *s).unwrap_or(true) {
            best = Some((role_id.clone(), sim));
        }
    }

    best.map(|(role, sim)| {
        info!("[router] embedding-nearest picked role '{}' (cosine {:.3})", role, sim);
        RouteDecision { role, confidence: sim, method: RouteMethod::Embedding, matched_rule_id: None }
    })
}

/// Resolves a route for `prompt`: rule table, then coordinator pick, then
/// embedding-nearest-role, then `default_role` with confidence 0 (spec
/// §4.7's `method=default`).
pub async fn resolve(server: &Arc<Server>, cfg: &EngineConfig, prompt: &str) -> RouteDecision {
    let smart = &cfg.smart_dispatch;

    if let Some(decision) = match_rule_table(smart, prompt) {
        return decision;
    }

    if let Some(decision) = coordinator_pick(server, cfg, smart, prompt).await {
        return decision;
    }

    if let Some(decision) = embedding_pick(server, cfg, prompt).await {
        return decision;
    }

    RouteDecision { role: smart.default_role.clone(), confidence: 0.0, method: RouteMethod::Default, matched_rule_id: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, kind: RulePatternKind, pattern: &str, role: &str) -> RoutingRule {
        RoutingRule { id: id.into(), pattern_kind: kind, pattern: pattern.into(), role: role.into(), enabled: true }
    }

    #[test]
    fn keyword_rule_matches_case_insensitively() {
        let cfg = SmartDispatchConfig { enabled: true, coordinator: None, default_role: "default".into(), rules: vec![rule("r1", RulePatternKind::Keyword, "invoice", "finance")] };
        let decision = match_rule_table(&cfg, "please process this INVOICE").unwrap();
        assert_eq!(decision.role, "finance");
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.method, RouteMethod::Rule);
    }

    #[test]
    fn regex_rule_matches() {
        let cfg = SmartDispatchConfig { enabled: true, coordinator: None, default_role: "default".into(), rules: vec![rule("r1", RulePatternKind::Regex, r"(?i)bug\s*#\d+", "triage")] };
        assert!(match_rule_table(&cfg, "fix bug #42 please").is_some());
        assert!(match_rule_table(&cfg, "no ticket here").is_none());
    }

    #[test]
    fn first_matching_rule_wins() {
        let cfg = SmartDispatchConfig {
            enabled: true,
            coordinator: None,
            default_role: "default".into(),
            rules: vec![rule("r1", RulePatternKind::Keyword, "hello", "greeter"), rule("r2", RulePatternKind::Keyword, "hello world", "verbose_greeter")],
        };
        let decision = match_rule_table(&cfg, "hello world").unwrap();
        assert_eq!(decision.role, "greeter");
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let cfg = SmartDispatchConfig { enabled: true, coordinator: None, default_role: "default".into(), rules: vec![RoutingRule { enabled: false, ..rule("r1", RulePatternKind::Keyword, "hello", "greeter") }] };
        assert!(match_rule_table(&cfg, "hello").is_none());
    }
}
