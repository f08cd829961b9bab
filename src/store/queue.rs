//! Offline queue (C1): tasks parked for later processing when no worker is
//! currently available to dispatch them immediately.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::atoms::error::{TetoraError, TetoraResult};
use crate::atoms::types::{QueueItem, QueueStatus, Task};

fn status_str(s: QueueStatus) -> &'static str {
    match s {
        QueueStatus::Pending => "pending",
        QueueStatus::Processing => "processing",
        QueueStatus::Completed => "completed",
        QueueStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> QueueStatus {
    match s {
        "processing" => QueueStatus::Processing,
        "completed" => QueueStatus::Completed,
        "failed" => QueueStatus::Failed,
        _ => QueueStatus::Pending,
    }
}

fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<QueueItem> {
    Ok(QueueItem {
        id: row.get(0)?,
        task_json: row.get(1)?,
        role_name: row.get(2)?,
        status: parse_status(&row.get::<_, String>(3)?),
        attempts: row.get(4)?,
        last_error: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub fn enqueue(conn: &Connection, task: &Task, role_name: &str) -> TetoraResult<QueueItem> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let task_json = serde_json::to_string(task)?;
    conn.execute(
        "INSERT INTO queue_items (id, task_json, role_name, status, attempts, last_error, created_at) VALUES (?1, ?2, ?3, 'pending', 0, NULL, ?4)",
        params![id, task_json, role_name, now],
    )?;
    Ok(QueueItem { id, task_json, role_name: role_name.to_string(), status: QueueStatus::Pending, attempts: 0, last_error: None, created_at: now })
}

pub fn get(conn: &Connection, id: &str) -> TetoraResult<Option<QueueItem>> {
    conn.query_row("SELECT id, task_json, role_name, status, attempts, last_error, created_at FROM queue_items WHERE id = ?1", params![id], row_to_item)
        .optional()
        .map_err(TetoraError::from)
}

pub fn list(conn: &Connection, status: Option<QueueStatus>) -> TetoraResult<Vec<QueueItem>> {
    let mut stmt = if status.is_some() {
        conn.prepare("SELECT id, task_json, role_name, status, attempts, last_error, created_at FROM queue_items WHERE status = ?1 ORDER BY created_at")?
    } else {
        conn.prepare("SELECT id, task_json, role_name, status, attempts, last_error, created_at FROM queue_items ORDER BY created_at")?
    };
    let rows = if let Some(s) = status {
        stmt.query_map(params![status_str(s)], row_to_item)?.collect::<Result<Vec<_>, _>>()
    } else {
        stmt.query_map([], row_to_item)?.collect::<Result<Vec<_>, _>>()
    };
    rows.map_err(TetoraError::from)
}

pub fn mark(conn: &Connection, id: &str, status: QueueStatus, error: Option<&str>) -> TetoraResult<()> {
    conn.execute(
        "UPDATE queue_items SET status = ?2, attempts = attempts + 1, last_error = ?3 WHERE id = ?1",
        params![id, status_str(status), error],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> TetoraResult<bool> {
    let n = conn.execute("DELETE FROM queue_items WHERE id = ?1", params![id])?;
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory;

    fn task() -> Task {
        Task { id: "t1".into(), name: "n".into(), prompt: "hi".into(), agent: "default".into(), model: None, provider: None, timeout_secs: None, budget_usd: None, permission_mode: None, source: "http".into(), session_id: None, add_dirs: vec![], mcp_path: None }
    }

    #[test]
    fn enqueue_then_retry_then_delete() {
        let conn = open_in_memory().unwrap();
        let item = enqueue(&conn, &task(), "default").unwrap();
        assert_eq!(item.status, QueueStatus::Pending);

        mark(&conn, &item.id, QueueStatus::Failed, Some("boom")).unwrap();
        let fetched = get(&conn, &item.id).unwrap().unwrap();
        assert_eq!(fetched.status, QueueStatus::Failed);
        assert_eq!(fetched.attempts, 1);

        assert!(delete(&conn, &item.id).unwrap());
        assert!(get(&conn, &item.id).unwrap().is_none());
    }
}
