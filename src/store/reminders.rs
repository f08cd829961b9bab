//! Reminder CRUD (C14). Time-based reminders fired by `crate::reminders`'s
//! polling loop and fanned out through `MultiNotifier`.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::atoms::error::{TetoraError, TetoraResult};

#[derive(Debug, Clone)]
pub struct Reminder {
    pub id: String,
    pub text: String,
    pub due_at: String,
    pub recurring: Option<String>,
    pub channel: String,
    pub user_id: String,
    pub fired: bool,
    pub created_at: String,
}

fn row_to_reminder(row: &rusqlite::Row) -> rusqlite::Result<Reminder> {
    Ok(Reminder {
        id: row.get(0)?,
        text: row.get(1)?,
        due_at: row.get(2)?,
        recurring: row.get(3)?,
        channel: row.get(4)?,
        user_id: row.get(5)?,
        fired: row.get::<_, i64>(6)? != 0,
        created_at: row.get(7)?,
    })
}

const COLUMNS: &str = "id, text, due_at, recurring, channel, user_id, fired, created_at";

pub fn create(conn: &Connection, text: &str, due_at: &str, recurring: Option<&str>, channel: &str, user_id: &str) -> TetoraResult<Reminder> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO reminders (id, text, due_at, recurring, channel, user_id, fired, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![id, text, due_at, recurring, channel, user_id, now],
    )?;
    Ok(Reminder { id, text: text.to_string(), due_at: due_at.to_string(), recurring: recurring.map(String::from), channel: channel.to_string(), user_id: user_id.to_string(), fired: false, created_at: now })
}

/// Reminders due at or before `now_rfc3339` that haven't fired yet.
pub fn due(conn: &Connection, now_rfc3339: &str) -> TetoraResult<Vec<Reminder>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM reminders WHERE fired = 0 AND due_at <= ?1 ORDER BY due_at", COLUMNS))?;
    let rows = stmt.query_map(params![now_rfc3339], row_to_reminder)?;
    rows.collect::<Result<_, _>>().map_err(TetoraError::from)
}

pub fn get(conn: &Connection, id: &str) -> TetoraResult<Option<Reminder>> {
    conn.query_row(&format!("SELECT {} FROM reminders WHERE id = ?1", COLUMNS), params![id], row_to_reminder).optional().map_err(TetoraError::from)
}

pub fn mark_fired(conn: &Connection, id: &str) -> TetoraResult<()> {
    conn.execute("UPDATE reminders SET fired = 1 WHERE id = ?1", params![id])?;
    Ok(())
}

/// Reschedules a recurring reminder's `due_at` to the next occurrence and
/// clears its `fired` flag, so the next poll picks it up again.
pub fn reschedule(conn: &Connection, id: &str, next_due_at: &str) -> TetoraResult<()> {
    conn.execute("UPDATE reminders SET due_at = ?2, fired = 0 WHERE id = ?1", params![id, next_due_at])?;
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> TetoraResult<bool> {
    Ok(conn.execute("DELETE FROM reminders WHERE id = ?1", params![id])? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory;

    #[test]
    fn due_reminders_returned_and_markable_fired() {
        let conn = open_in_memory().unwrap();
        let r = create(&conn, "take out trash", "2020-01-01T00:00:00+00:00", None, "sms", "u1").unwrap();
        let due_list = due(&conn, "2025-01-01T00:00:00+00:00").unwrap();
        assert_eq!(due_list.len(), 1);
        mark_fired(&conn, &r.id).unwrap();
        assert!(due(&conn, "2025-01-01T00:00:00+00:00").unwrap().is_empty());
    }
}
