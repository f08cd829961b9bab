//! Audit log (C15): append-only record of security-relevant events.

use rusqlite::{params, Connection};

use crate::atoms::error::TetoraResult;

pub fn record(conn: &Connection, event: &str, source: &str, detail: &str, ip: &str) -> TetoraResult<()> {
    conn.execute(
        "INSERT INTO audit_log (event, source, detail, ip) VALUES (?1, ?2, ?3, ?4)",
        params![event, source, detail, ip],
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub event: String,
    pub source: String,
    pub detail: String,
    pub ip: String,
    pub created_at: String,
}

pub fn recent(conn: &Connection, limit: usize) -> TetoraResult<Vec<AuditEntry>> {
    let mut stmt = conn.prepare("SELECT event, source, detail, ip, created_at FROM audit_log ORDER BY id DESC LIMIT ?1")?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(AuditEntry { event: row.get(0)?, source: row.get(1)?, detail: row.get(2)?, ip: row.get(3)?, created_at: row.get(4)? })
    })?;
    rows.collect::<Result<_, _>>().map_err(crate::atoms::error::TetoraError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory;

    #[test]
    fn record_then_read_back() {
        let conn = open_in_memory().unwrap();
        record(&conn, "login_failed", "dashboard", "bad password", "127.0.0.1").unwrap();
        let entries = recent(&conn, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, "login_failed");
    }
}
