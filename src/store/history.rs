//! Dispatch history (C1/C7): one append-only row per task completion.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::atoms::error::{TetoraError, TetoraResult};
use crate::atoms::types::{HistoryRecord, Task, TaskResult, TaskStatus};

fn status_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Success => "success",
        TaskStatus::Error => "error",
        TaskStatus::Timeout => "timeout",
        TaskStatus::Cancelled => "cancelled",
    }
}

pub fn record(conn: &Connection, task: &Task, result: &TaskResult, start_at: &str) -> TetoraResult<HistoryRecord> {
    let end_at = Utc::now().to_rfc3339();
    let id = uuid::Uuid::new_v4().to_string();
    let task_json = serde_json::to_string(task)?;
    let result_json = serde_json::to_string(result)?;

    conn.execute(
        "INSERT INTO history (id, task_json, result_json, status, session_id, start_at, end_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, task_json, result_json, status_str(result.status), result.session_id, start_at, end_at],
    )?;

    Ok(HistoryRecord { id, task: task.clone(), result: result.clone(), start_at: start_at.to_string(), end_at })
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<HistoryRecord> {
    let id: String = row.get(0)?;
    let task_json: String = row.get(1)?;
    let result_json: String = row.get(2)?;
    let start_at: String = row.get(3)?;
    let end_at: String = row.get(4)?;
    let task: Task = serde_json::from_str(&task_json).unwrap_or_else(|_| Task {
        id: id.clone(),
        name: String::new(),
        prompt: String::new(),
        agent: String::new(),
        model: None,
        provider: None,
        timeout_secs: None,
        budget_usd: None,
        permission_mode: None,
        source: String::new(),
        session_id: None,
        add_dirs: vec![],
        mcp_path: None,
    });
    let result: TaskResult = serde_json::from_str(&result_json).unwrap_or_else(|_| TaskResult {
        id: id.clone(),
        name: String::new(),
        status: TaskStatus::Error,
        output: String::new(),
        error: Some("corrupt history row".into()),
        cost_usd: 0.0,
        duration_ms: 0,
        tokens_in: 0,
        tokens_out: 0,
        provider_ms: 0,
        session_id: None,
        provider: String::new(),
        exit_code: None,
    });
    Ok(HistoryRecord { id, task, result, start_at, end_at })
}

pub fn get(conn: &Connection, id: &str) -> TetoraResult<Option<HistoryRecord>> {
    conn.query_row("SELECT id, task_json, result_json, start_at, end_at FROM history WHERE id = ?1", params![id], row_to_record)
        .optional()
        .map_err(TetoraError::from)
}

pub fn list_by_session(conn: &Connection, session_id: &str, limit: usize) -> TetoraResult<Vec<HistoryRecord>> {
    let mut stmt = conn.prepare("SELECT id, task_json, result_json, start_at, end_at FROM history WHERE session_id = ?1 ORDER BY end_at DESC LIMIT ?2")?;
    let rows = stmt.query_map(params![session_id, limit as i64], row_to_record)?;
    rows.collect::<Result<_, _>>().map_err(TetoraError::from)
}

/// Retention pruner (§4.1): drop rows older than `max_age_days`, or beyond
/// `max_rows` total, whichever policy is configured.
pub fn prune(conn: &Connection, max_age_days: Option<u32>, max_rows: Option<usize>) -> TetoraResult<usize> {
    let mut deleted = 0usize;
    if let Some(days) = max_age_days {
        deleted += conn.execute("DELETE FROM history WHERE end_at < datetime('now', ?1)", params![format!("-{} days", days)])?;
    }
    if let Some(cap) = max_rows {
        deleted += conn.execute(
            "DELETE FROM history WHERE id NOT IN (SELECT id FROM history ORDER BY end_at DESC LIMIT ?1)",
            params![cap as i64],
        )?;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory;

    fn sample_task() -> Task {
        Task { id: "t1".into(), name: "n".into(), prompt: "hi".into(), agent: "default".into(), model: None, provider: None, timeout_secs: None, budget_usd: None, permission_mode: None, source: "http".into(), session_id: None, add_dirs: vec![], mcp_path: None }
    }

    fn sample_result() -> TaskResult {
        TaskResult { id: "t1".into(), name: "n".into(), status: TaskStatus::Success, output: "ok".into(), error: None, cost_usd: 0.001, duration_ms: 10, tokens_in: 5, tokens_out: 5, provider_ms: 8, session_id: Some("s1".into()), provider: "openai".into(), exit_code: None }
    }

    #[test]
    fn record_and_fetch_roundtrip() {
        let conn = open_in_memory().unwrap();
        let rec = record(&conn, &sample_task(), &sample_result(), "2026-01-01T00:00:00Z").unwrap();
        let fetched = get(&conn, &rec.id).unwrap().unwrap();
        assert_eq!(fetched.result.status, TaskStatus::Success);
        assert!(fetched.result.cost_usd >= 0.0);
    }

    #[test]
    fn list_by_session_returns_matches() {
        let conn = open_in_memory().unwrap();
        record(&conn, &sample_task(), &sample_result(), "2026-01-01T00:00:00Z").unwrap();
        let list = list_by_session(&conn, "s1", 10).unwrap();
        assert_eq!(list.len(), 1);
    }
}
