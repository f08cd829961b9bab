//! OAuth credential store (§1, out of scope beyond being an opaque
//! credential store). Tetora persists whatever JSON blob the OAuth flow
//! (external collaborator) hands it, keyed by service name, and never
//! interprets its contents.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::atoms::error::TetoraResult;

pub fn put(conn: &Connection, service: &str, payload_json: &str) -> TetoraResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO oauth_credentials (service, payload_json, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(service) DO UPDATE SET payload_json = excluded.payload_json, updated_at = excluded.updated_at",
        params![service, payload_json, now],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, service: &str) -> TetoraResult<Option<String>> {
    conn.query_row("SELECT payload_json FROM oauth_credentials WHERE service = ?1", params![service], |row| row.get(0))
        .optional()
        .map_err(crate::atoms::error::TetoraError::from)
}

pub fn revoke(conn: &Connection, service: &str) -> TetoraResult<bool> {
    let n = conn.execute("DELETE FROM oauth_credentials WHERE service = ?1", params![service])?;
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory;

    #[test]
    fn put_get_revoke_roundtrip() {
        let conn = open_in_memory().unwrap();
        assert!(get(&conn, "github").unwrap().is_none());
        put(&conn, "github", "{\"token\":\"abc\"}").unwrap();
        assert_eq!(get(&conn, "github").unwrap().unwrap(), "{\"token\":\"abc\"}");
        assert!(revoke(&conn, "github").unwrap());
        assert!(get(&conn, "github").unwrap().is_none());
    }
}
