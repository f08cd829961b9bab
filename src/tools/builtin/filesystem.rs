// ── filesystem tool: scoped read/write/list/append/delete ────────────────
// Grounded on `engine/tool_executor.rs::execute_*_file` and its
// `agent_workspace`/path-escape guard. Every path argument is resolved
// relative to the calling agent's workspace and rejected if it would
// escape that directory — the same containment rule `exec.rs` relies on
// for host-mode execution.

use std::path::{Path, PathBuf};

use crate::tools::executor::{agent_workspace, ensure_workspace};

const MAX_READ: usize = 50_000;

fn resolve(agent_id: &str, rel: &str) -> Result<PathBuf, String> {
    let base = agent_workspace(agent_id);
    let joined = base.join(rel.trim_start_matches('/'));
    let base_abs = base.canonicalize().unwrap_or(base.clone());
    let parent = joined.parent().map(Path::to_path_buf).unwrap_or_else(|| joined.clone());
    std::fs::create_dir_all(&parent).map_err(|e| format!("failed to prepare path: {}", e))?;
    let parent_abs = parent.canonicalize().unwrap_or(parent);
    if !parent_abs.starts_with(&base_abs) {
        return Err(format!("path '{}' escapes the agent workspace", rel));
    }
    Ok(joined)
}

pub async fn read_file(args: &serde_json::Value, agent_id: &str) -> Result<String, String> {
    ensure_workspace(agent_id)?;
    let path = args["path"].as_str().ok_or("read_file: missing 'path' argument")?;
    let resolved = resolve(agent_id, path)?;
    let content = std::fs::read_to_string(&resolved).map_err(|e| format!("failed to read '{}': {}", path, e))?;
    if content.len() > MAX_READ {
        Ok(format!("{}...\n[truncated, {} total bytes]", &content[..MAX_READ], content.len()))
    } else {
        Ok(content)
    }
}

pub async fn write_file(args: &serde_json::Value, agent_id: &str) -> Result<String, String> {
    ensure_workspace(agent_id)?;
    let path = args["path"].as_str().ok_or("write_file: missing 'path' argument")?;
    let content = args["content"].as_str().ok_or("write_file: missing 'content' argument")?;
    let resolved = resolve(agent_id, path)?;
    std::fs::write(&resolved, content).map_err(|e| format!("failed to write '{}': {}", path, e))?;
    Ok(format!("wrote {} bytes to {}", content.len(), path))
}

pub async fn append_file(args: &serde_json::Value, agent_id: &str) -> Result<String, String> {
    use std::io::Write;
    ensure_workspace(agent_id)?;
    let path = args["path"].as_str().ok_or("append_file: missing 'path' argument")?;
    let content = args["content"].as_str().ok_or("append_file: missing 'content' argument")?;
    let resolved = resolve(agent_id, path)?;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&resolved).map_err(|e| format!("failed to open '{}': {}", path, e))?;
    file.write_all(content.as_bytes()).map_err(|e| format!("failed to append to '{}': {}", path, e))?;
    Ok(format!("appended {} bytes to {}", content.len(), path))
}

pub async fn delete_file(args: &serde_json::Value, agent_id: &str) -> Result<String, String> {
    ensure_workspace(agent_id)?;
    let path = args["path"].as_str().ok_or("delete_file: missing 'path' argument")?;
    let resolved = resolve(agent_id, path)?;
    std::fs::remove_file(&resolved).map_err(|e| format!("failed to delete '{}': {}", path, e))?;
    Ok(format!("deleted {}", path))
}

pub async fn list_directory(args: &serde_json::Value, agent_id: &str) -> Result<String, String> {
    ensure_workspace(agent_id)?;
    let path = args["path"].as_str().unwrap_or(".");
    let resolved = resolve(agent_id, path)?;
    let entries = std::fs::read_dir(&resolved).map_err(|e| format!("failed to list '{}': {}", path, e))?;

    let mut names: Vec<String> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| format!("failed to read directory entry: {}", e))?;
        let kind = if entry.path().is_dir() { "/" } else { "" };
        names.push(format!("{}{}", entry.file_name().to_string_lossy(), kind));
    }
    names.sort();
    Ok(if names.is_empty() { "(empty)".to_string() } else { names.join("\n") })
}
