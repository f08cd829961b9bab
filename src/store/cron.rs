//! Cron job CRUD (C13). A job fires a dispatch at scheduled instants; see
//! `crate::cron` for the schedule parser and polling loop.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::atoms::error::{TetoraError, TetoraResult};

#[derive(Debug, Clone)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub role: String,
    pub prompt: String,
    pub enabled: bool,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
    pub created_at: String,
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<CronJob> {
    Ok(CronJob {
        id: row.get(0)?,
        name: row.get(1)?,
        schedule: row.get(2)?,
        role: row.get(3)?,
        prompt: row.get(4)?,
        enabled: row.get::<_, i64>(5)? != 0,
        last_run_at: row.get(6)?,
        next_run_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const COLUMNS: &str = "id, name, schedule, role, prompt, enabled, last_run_at, next_run_at, created_at";

pub fn create(conn: &Connection, name: &str, schedule: &str, role: &str, prompt: &str) -> TetoraResult<CronJob> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO cron_jobs (id, name, schedule, role, prompt, enabled, created_at) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![id, name, schedule, role, prompt, now],
    )?;
    Ok(CronJob { id, name: name.to_string(), schedule: schedule.to_string(), role: role.to_string(), prompt: prompt.to_string(), enabled: true, last_run_at: None, next_run_at: None, created_at: now })
}

pub fn list(conn: &Connection) -> TetoraResult<Vec<CronJob>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM cron_jobs ORDER BY created_at", COLUMNS))?;
    let rows = stmt.query_map([], row_to_job)?;
    rows.collect::<Result<_, _>>().map_err(TetoraError::from)
}

pub fn get(conn: &Connection, id: &str) -> TetoraResult<Option<CronJob>> {
    conn.query_row(&format!("SELECT {} FROM cron_jobs WHERE id = ?1", COLUMNS), params![id], row_to_job).optional().map_err(TetoraError::from)
}

pub fn delete(conn: &Connection, id: &str) -> TetoraResult<bool> {
    Ok(conn.execute("DELETE FROM cron_jobs WHERE id = ?1", params![id])? > 0)
}

pub fn set_enabled(conn: &Connection, id: &str, enabled: bool) -> TetoraResult<()> {
    conn.execute("UPDATE cron_jobs SET enabled = ?2 WHERE id = ?1", params![id, enabled as i64])?;
    Ok(())
}

/// Records a fire: `last_run_at = now`, `next_run_at` is whatever the
/// scheduler computed as the job's following occurrence.
pub fn record_run(conn: &Connection, id: &str, last_run_at: &str, next_run_at: &str) -> TetoraResult<()> {
    conn.execute("UPDATE cron_jobs SET last_run_at = ?2, next_run_at = ?3 WHERE id = ?1", params![id, last_run_at, next_run_at])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory;

    #[test]
    fn create_list_delete_round_trip() {
        let conn = open_in_memory().unwrap();
        let job = create(&conn, "nightly-digest", "daily 09:00", "digest-bot", "summarize today").unwrap();
        assert!(job.enabled);
        assert_eq!(list(&conn).unwrap().len(), 1);
        assert!(delete(&conn, &job.id).unwrap());
        assert!(list(&conn).unwrap().is_empty());
    }
}
