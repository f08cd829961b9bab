// ── Prompt assembler (C4) ─────────────────────────────────────────────────
// Builds the system prompt under a tiered size budget, per spec §4.4's
// layering table. New module — the teacher has no equivalent tiered
// assembler — but budget-truncation-on-newline-boundary follows the same
// "cap, don't just slice" instinct as the teacher's context-window trimming
// in `engine/sessions/context.rs`.

use crate::atoms::types::{Complexity, PromptBudgetConfig, ProviderKind};

/// Inputs the caller gathers before assembly — soul text, reflection
/// entries (most-recent-first), and the workspace knowledge dir contents,
/// if any and within the 50 KB size cap.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs<'a> {
    pub soul: &'a str,
    pub reflection_entries: &'a [String],
    pub writing_style: Option<&'a str>,
    pub citation_rules: Option<&'a str>,
    pub workspace_knowledge: Option<&'a str>,
    pub workspace_docs: &'a [String],
    pub add_dirs: &'a [String],
}

const WORKSPACE_KNOWLEDGE_MAX_BYTES: usize = 50 * 1024;
const SOUL_TRUNCATED_BYTES: usize = 4 * 1024;

/// A role manifest, grounded on the teacher's skill manifest shape
/// (`engine/skills/toml/types.rs`'s `SkillManifest`/`SkillMeta`), pared down
/// to the fields a role's identity actually needs: the soul text itself,
/// plus an optional one-line description surfaced in dashboards/listings.
/// Lets an operator keep a role's identity prompt and its metadata in one
/// versioned file instead of a bare `.txt` soul document.
#[derive(Debug, Clone, serde::Deserialize)]
struct RoleManifest {
    soul: String,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

/// Reads the identity prompt document referenced by a role's `soulFile`
/// config path (glossary: "the human-authored identity prompt... stored
/// as a text document"). A `.toml` path is parsed as a role manifest and
/// its `soul` field is returned; any other path is read as plain soul
/// text. A missing, unreadable, or malformed file degrades to an empty
/// soul rather than failing the dispatch — a typo'd path shouldn't break
/// every task routed to that role.
pub fn load_soul(soul_file: Option<&str>) -> String {
    let Some(path) = soul_file else {
        return String::new();
    };
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            log::warn!("[prompt] failed to read soul file '{}': {}", path, e);
            return String::new();
        }
    };
    if path.ends_with(".toml") {
        match toml::from_str::<RoleManifest>(&raw) {
            Ok(manifest) => manifest.soul,
            Err(e) => {
                log::warn!("[prompt] failed to parse role manifest '{}': {}", path, e);
                String::new()
            }
        }
    } else {
        raw
    }
}

/// Assembles the final system prompt string for a dispatch, respecting the
/// per-tier layer table and the total/soul size budgets.
pub fn assemble(complexity: Complexity, provider_kind: ProviderKind, inputs: &PromptInputs, budget: &PromptBudgetConfig) -> String {
    if provider_kind.is_subprocess() {
        // Only the soul prompt is used — the provider reads project files
        // natively (§4.4).
        return truncate_on_newline_boundary(inputs.soul, budget.soul_max.max(SOUL_TRUNCATED_BYTES));
    }

    let mut sections: Vec<String> = Vec::new();

    sections.push(match complexity {
        Complexity::Simple => truncate_on_newline_boundary(inputs.soul, SOUL_TRUNCATED_BYTES),
        Complexity::Standard => truncate_on_newline_boundary(inputs.soul, budget.soul_max),
        Complexity::Complex => inputs.soul.to_string(),
    });

    let reflection_count = match complexity {
        Complexity::Simple => 0,
        Complexity::Standard => 1,
        Complexity::Complex => 3,
    };
    if reflection_count > 0 && !inputs.reflection_entries.is_empty() {
        let n = reflection_count.min(inputs.reflection_entries.len());
        let block = inputs.reflection_entries[..n].join("\n");
        sections.push(format!("## Reflection context\n{}", block));
    }

    if matches!(complexity, Complexity::Complex) {
        if let Some(style) = inputs.writing_style {
            sections.push(format!("## Writing style\n{}", style));
        }
    }

    if matches!(complexity, Complexity::Standard | Complexity::Complex) {
        if let Some(citation) = inputs.citation_rules {
            sections.push(format!("## Citation rules\n{}", citation));
        }
    }

    if matches!(complexity, Complexity::Standard | Complexity::Complex) {
        if let Some(knowledge) = inputs.workspace_knowledge {
            if knowledge.len() <= WORKSPACE_KNOWLEDGE_MAX_BYTES {
                sections.push(format!("## Workspace knowledge\n{}", knowledge));
            }
        }
        if !inputs.workspace_docs.is_empty() {
            sections.push(format!("## Workspace documents\n{}", inputs.workspace_docs.join("\n---\n")));
        }
    }

    let allowed_dirs = match complexity {
        Complexity::Simple => &[][..],
        Complexity::Standard => inputs.add_dirs.get(..1.min(inputs.add_dirs.len())).unwrap_or(&[]),
        Complexity::Complex => inputs.add_dirs,
    };
    if !allowed_dirs.is_empty() {
        sections.push(format!("## Additional directories\n{}", allowed_dirs.join("\n")));
    }

    let full = sections.join("\n\n");
    truncate_on_newline_boundary(&full, budget.total_max)
}

/// Truncates `s` to at most `max_bytes`, preferring to cut at the last
/// newline within that window so a section isn't split mid-line.
fn truncate_on_newline_boundary(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut cut = max_bytes;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let window = &s[..cut];
    match window.rfind('\n') {
        Some(pos) if pos > 0 => window[..pos].to_string(),
        _ => window.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> PromptBudgetConfig {
        PromptBudgetConfig { soul_max: 4096, total_max: 32 * 1024 }
    }

    #[test]
    fn simple_tier_uses_only_truncated_soul() {
        let inputs = PromptInputs { soul: "identity text", reflection_entries: &["r1".into()], ..Default::default() };
        let out = assemble(Complexity::Simple, ProviderKind::OpenAI, &inputs, &budget());
        assert!(out.contains("identity text"));
        assert!(!out.contains("Reflection"));
    }

    #[test]
    fn standard_tier_includes_one_reflection_entry() {
        let entries = vec!["first".to_string(), "second".to_string()];
        let inputs = PromptInputs { soul: "soul", reflection_entries: &entries, ..Default::default() };
        let out = assemble(Complexity::Standard, ProviderKind::OpenAI, &inputs, &budget());
        assert!(out.contains("first"));
        assert!(!out.contains("second"));
    }

    #[test]
    fn complex_tier_includes_writing_style_and_citation() {
        let inputs = PromptInputs { soul: "soul", writing_style: Some("terse"), citation_rules: Some("cite sources"), ..Default::default() };
        let out = assemble(Complexity::Complex, ProviderKind::OpenAI, &inputs, &budget());
        assert!(out.contains("terse"));
        assert!(out.contains("cite sources"));
    }

    #[test]
    fn load_soul_reads_plain_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soul.txt");
        std::fs::write(&path, "a plain-text identity").unwrap();
        assert_eq!(load_soul(Some(path.to_str().unwrap())), "a plain-text identity");
    }

    #[test]
    fn load_soul_reads_toml_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("role.toml");
        std::fs::write(&path, "soul = \"manifest identity\"\ndescription = \"a role\"\n").unwrap();
        assert_eq!(load_soul(Some(path.to_str().unwrap())), "manifest identity");
    }

    #[test]
    fn load_soul_degrades_to_empty_on_missing_file() {
        assert_eq!(load_soul(Some("/definitely/does/not/exist.txt")), "");
    }

    #[test]
    fn load_soul_degrades_to_empty_on_malformed_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid toml manifest {{{").unwrap();
        assert_eq!(load_soul(Some(path.to_str().unwrap())), "");
    }

    #[test]
    fn subprocess_provider_uses_only_soul() {
        let inputs = PromptInputs { soul: "soul-only", citation_rules: Some("ignored"), ..Default::default() };
        let out = assemble(Complexity::Complex, ProviderKind::ClaudeCode, &inputs, &budget());
        assert_eq!(out, "soul-only");
    }

    #[test]
    fn total_cap_truncates_on_newline_boundary() {
        let long_soul = (0..100).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let inputs = PromptInputs { soul: &long_soul, ..Default::default() };
        let small_budget = PromptBudgetConfig { soul_max: 10_000, total_max: 50 };
        let out = assemble(Complexity::Complex, ProviderKind::OpenAI, &inputs, &small_budget);
        assert!(out.len() <= 50);
        assert!(!out.ends_with("lin"));
    }
}
