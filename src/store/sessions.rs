//! Session CRUD (C1). Grounded on the teacher's `engine/sessions/sessions.rs`
//! row-mapping shape, rebuilt against Tetora's `Session` entity.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::atoms::error::{TetoraError, TetoraResult};
use crate::atoms::types::{Session, SessionStatus};

fn status_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Active => "active",
        SessionStatus::Idle => "idle",
        SessionStatus::Closed => "closed",
    }
}

fn parse_status(s: &str) -> SessionStatus {
    match s {
        "idle" => SessionStatus::Idle,
        "closed" => SessionStatus::Closed,
        _ => SessionStatus::Active,
    }
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        agent: row.get(1)?,
        source: row.get(2)?,
        status: parse_status(&row.get::<_, String>(3)?),
        title: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Finds an existing active session for `(agent, source)` or creates a new
/// one — sessions group prompts sharing conversational context (spec §3).
pub fn find_or_create(conn: &Connection, agent: &str, source: &str, existing_id: Option<&str>) -> TetoraResult<Session> {
    if let Some(id) = existing_id {
        if let Some(s) = get(conn, id)? {
            return Ok(s);
        }
    }

    let now = Utc::now().to_rfc3339();
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions (id, agent, source, status, title, created_at, updated_at) VALUES (?1, ?2, ?3, 'active', '', ?4, ?4)",
        params![id, agent, source, now],
    )?;

    Ok(Session { id, agent: agent.to_string(), source: source.to_string(), status: SessionStatus::Active, title: String::new(), created_at: now.clone(), updated_at: now })
}

pub fn get(conn: &Connection, id: &str) -> TetoraResult<Option<Session>> {
    conn.query_row("SELECT id, agent, source, status, title, created_at, updated_at FROM sessions WHERE id = ?1", params![id], row_to_session)
        .optional()
        .map_err(TetoraError::from)
}

pub fn touch(conn: &Connection, id: &str) -> TetoraResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute("UPDATE sessions SET updated_at = ?2 WHERE id = ?1", params![id, now])?;
    Ok(())
}

pub fn set_status(conn: &Connection, id: &str, status: SessionStatus) -> TetoraResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute("UPDATE sessions SET status = ?2, updated_at = ?3 WHERE id = ?1", params![id, status_str(status), now])?;
    Ok(())
}

pub fn append_message(conn: &Connection, session_id: &str, role: &str, content: &str, tool_calls_json: Option<&str>, tool_call_id: Option<&str>) -> TetoraResult<()> {
    let now = Utc::now().to_rfc3339();
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO session_messages (id, session_id, role, content, tool_calls_json, tool_call_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, session_id, role, content, tool_calls_json, tool_call_id, now],
    )?;
    touch(conn, session_id)
}

#[derive(Debug, Clone)]
pub struct SessionMessageRow {
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// Returns up to `limit` most recent messages, oldest-first, matching the
/// per-tier context sizes derived by `Complexity::context_size` (§4.4).
pub fn recent_messages(conn: &Connection, session_id: &str, limit: usize) -> TetoraResult<Vec<SessionMessageRow>> {
    let mut stmt = conn.prepare("SELECT role, content, created_at FROM session_messages WHERE session_id = ?1 ORDER BY created_at DESC LIMIT ?2")?;
    let rows = stmt.query_map(params![session_id, limit as i64], |row| {
        Ok(SessionMessageRow { role: row.get(0)?, content: row.get(1)?, created_at: row.get(2)? })
    })?;
    let mut out: Vec<SessionMessageRow> = rows.collect::<Result<_, _>>()?;
    out.reverse();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory;

    #[test]
    fn create_and_fetch_session() {
        let conn = open_in_memory().unwrap();
        let s = find_or_create(&conn, "default", "http", None).unwrap();
        let fetched = get(&conn, &s.id).unwrap().unwrap();
        assert_eq!(fetched.agent, "default");
        assert_eq!(fetched.status, SessionStatus::Active);
    }

    #[test]
    fn existing_id_reused_when_present() {
        let conn = open_in_memory().unwrap();
        let s = find_or_create(&conn, "default", "http", None).unwrap();
        let again = find_or_create(&conn, "other-agent", "other-source", Some(&s.id)).unwrap();
        assert_eq!(again.id, s.id);
        assert_eq!(again.agent, "default");
    }

    #[test]
    fn messages_return_oldest_first_bounded_by_limit() {
        let conn = open_in_memory().unwrap();
        let s = find_or_create(&conn, "default", "http", None).unwrap();
        for i in 0..5 {
            append_message(&conn, &s.id, "user", &format!("msg {}", i), None, None).unwrap();
        }
        let recent = recent_messages(&conn, &s.id, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "msg 2");
        assert_eq!(recent[2].content, "msg 4");
    }
}
