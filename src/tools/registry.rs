// ── Tool registry (C6) ─────────────────────────────────────────────────────
// Process-wide declaration of every builtin tool's `{name, description,
// inputSchema}` plus the minimum tool profile tier it's offered at.
// Grounded on the teacher's `engine/tools/mod.rs::ToolDefinition::builtins`
// assembly and each tool module's own `definitions()` JSON schema (e.g.
// `engine/tools/exec.rs::definitions`), adapted to spec §4.5's three-tier
// minimal/standard/full profile gating instead of the teacher's flat list.

use crate::atoms::types::ToolProfile;
use crate::providers::messages::{ToolDefinition, ToolFunctionDef};

struct ToolSpec {
    min_profile: ToolProfile,
    def: fn() -> ToolDefinition,
}

fn profile_rank(p: ToolProfile) -> u8 {
    match p {
        ToolProfile::Minimal => 0,
        ToolProfile::Standard => 1,
        ToolProfile::Full => 2,
    }
}

fn tool(name: &str, description: &str, parameters: serde_json::Value) -> ToolDefinition {
    ToolDefinition { tool_type: "function".into(), function: ToolFunctionDef { name: name.into(), description: description.into(), parameters } }
}

fn def_exec() -> ToolDefinition {
    tool(
        "exec",
        "Execute a shell command in the agent's workspace. Returns stdout and stderr.",
        serde_json::json!({"type": "object", "properties": {"command": {"type": "string", "description": "the shell command to run"}}, "required": ["command"]}),
    )
}

fn def_fetch() -> ToolDefinition {
    tool(
        "fetch",
        "Make an outbound HTTP request and return the response status and body.",
        serde_json::json!({"type": "object", "properties": {"url": {"type": "string"}, "method": {"type": "string"}, "headers": {"type": "object"}, "body": {"type": "string"}}, "required": ["url"]}),
    )
}

fn def_read_file() -> ToolDefinition {
    tool("read_file", "Read a file from the agent's workspace.", serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}))
}

fn def_write_file() -> ToolDefinition {
    tool(
        "write_file",
        "Write (overwrite) a file in the agent's workspace.",
        serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}, "content": {"type": "string"}}, "required": ["path", "content"]}),
    )
}

fn def_append_file() -> ToolDefinition {
    tool(
        "append_file",
        "Append text to a file in the agent's workspace, creating it if needed.",
        serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}, "content": {"type": "string"}}, "required": ["path", "content"]}),
    )
}

fn def_delete_file() -> ToolDefinition {
    tool("delete_file", "Delete a file from the agent's workspace.", serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}))
}

fn def_list_directory() -> ToolDefinition {
    tool("list_directory", "List entries in a workspace directory.", serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}}))
}

fn def_memory_store() -> ToolDefinition {
    tool(
        "memory_store",
        "Store or update a key/value fact in the agent's unified memory.",
        serde_json::json!({"type": "object", "properties": {"namespace": {"type": "string"}, "scope": {"type": "string"}, "key": {"type": "string"}, "value": {"type": "string"}, "ttl_days": {"type": "integer"}}, "required": ["key", "value"]}),
    )
}

fn def_memory_search() -> ToolDefinition {
    tool(
        "memory_search",
        "Search the agent's unified memory by substring match on key/value.",
        serde_json::json!({"type": "object", "properties": {"query": {"type": "string"}, "namespace": {"type": "string"}, "scope": {"type": "string"}, "limit": {"type": "integer"}}, "required": ["query"]}),
    )
}

fn def_memory_get() -> ToolDefinition {
    tool(
        "memory_get",
        "Fetch one memory entry by id or by namespace/scope/key.",
        serde_json::json!({"type": "object", "properties": {"id": {"type": "string"}, "namespace": {"type": "string"}, "scope": {"type": "string"}, "key": {"type": "string"}}}),
    )
}

fn def_memory_delete() -> ToolDefinition {
    tool("memory_delete", "Tombstone a memory entry by id.", serde_json::json!({"type": "object", "properties": {"id": {"type": "string"}}, "required": ["id"]}))
}

fn def_create_task() -> ToolDefinition {
    tool(
        "create_task",
        "Queue a follow-up task for an agent to process later.",
        serde_json::json!({"type": "object", "properties": {"prompt": {"type": "string"}, "agent": {"type": "string"}, "name": {"type": "string"}}, "required": ["prompt"]}),
    )
}

fn def_list_tasks() -> ToolDefinition {
    tool("list_tasks", "List queued tasks, optionally filtered by status.", serde_json::json!({"type": "object", "properties": {"status": {"type": "string"}}}))
}

fn specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec { min_profile: ToolProfile::Standard, def: def_exec },
        ToolSpec { min_profile: ToolProfile::Minimal, def: def_fetch },
        ToolSpec { min_profile: ToolProfile::Minimal, def: def_read_file },
        ToolSpec { min_profile: ToolProfile::Standard, def: def_write_file },
        ToolSpec { min_profile: ToolProfile::Standard, def: def_append_file },
        ToolSpec { min_profile: ToolProfile::Full, def: def_delete_file },
        ToolSpec { min_profile: ToolProfile::Minimal, def: def_list_directory },
        ToolSpec { min_profile: ToolProfile::Minimal, def: def_memory_store },
        ToolSpec { min_profile: ToolProfile::Minimal, def: def_memory_search },
        ToolSpec { min_profile: ToolProfile::Minimal, def: def_memory_get },
        ToolSpec { min_profile: ToolProfile::Standard, def: def_memory_delete },
        ToolSpec { min_profile: ToolProfile::Standard, def: def_create_task },
        ToolSpec { min_profile: ToolProfile::Minimal, def: def_list_tasks },
    ]
}

/// Tool definitions offered at or below `profile`'s tier — `minimal` gets
/// only read-only/low-risk tools, `full` gets everything.
pub fn tools_for_profile(profile: ToolProfile) -> Vec<ToolDefinition> {
    let rank = profile_rank(profile);
    specs().into_iter().filter(|s| profile_rank(s.min_profile) <= rank).map(|s| (s.def)()).collect()
}

/// Every registered tool's definition plus its minimum tool profile, for
/// the registry introspection route (`GET /api/tools`, §6).
pub fn all_tools() -> Vec<(ToolDefinition, ToolProfile)> {
    specs().into_iter().map(|s| ((s.def)(), s.min_profile)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_profile_excludes_exec() {
        let tools = tools_for_profile(ToolProfile::Minimal);
        assert!(!tools.iter().any(|t| t.function.name == "exec"));
        assert!(tools.iter().any(|t| t.function.name == "fetch"));
    }

    #[test]
    fn full_profile_includes_everything() {
        let tools = tools_for_profile(ToolProfile::Full);
        assert_eq!(tools.len(), specs().len());
    }
}
