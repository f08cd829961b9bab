//! Unified memory (C10): a versioned, content-addressed, scoped key→value
//! store with tombstones and many-to-many links, per spec §4.9. The main
//! row for `(namespace,scope,key)` is always the *active* version; prior
//! values are copied into `memory_versions` on change — grounded on the
//! teacher's `engine/engram/schema.rs` `supersedes_id`/`version` columns on
//! `semantic_memories`, though the table itself is a fresh design since
//! spec's single unified entity doesn't match that richer, multi-kind
//! schema.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::atoms::error::{TetoraError, TetoraResult};
use crate::atoms::types::{MemoryLink, MemoryStatus, UnifiedMemoryEntry};

/// `contentHash = hash(namespace|scope|key|value)` — stable and
/// deterministic, used to dedup identical re-stores.
pub fn content_hash(namespace: &str, scope: &str, key: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"|");
    hasher.update(scope.as_bytes());
    hasher.update(b"|");
    hasher.update(key.as_bytes());
    hasher.update(b"|");
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct StoreInput<'a> {
    pub namespace: &'a str,
    pub scope: &'a str,
    pub key: &'a str,
    pub value: &'a str,
    pub source: &'a str,
    pub metadata: serde_json::Value,
    pub ttl_days: Option<u32>,
}

fn status_str(s: MemoryStatus) -> &'static str {
    match s {
        MemoryStatus::Active => "active",
        MemoryStatus::Tombstoned => "tombstoned",
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<UnifiedMemoryEntry> {
    let status: String = row.get(7)?;
    let metadata_json: String = row.get(9)?;
    Ok(UnifiedMemoryEntry {
        id: row.get(0)?,
        namespace: row.get(1)?,
        scope: row.get(2)?,
        key: row.get(3)?,
        value: row.get(4)?,
        source: row.get(5)?,
        version: row.get::<_, i64>(6)? as u64,
        status: if status == "tombstoned" { MemoryStatus::Tombstoned } else { MemoryStatus::Active },
        content_hash: row.get(8)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
        ttl_days: row.get::<_, Option<i64>>(10)?.map(|v| v as u32),
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        tombstoned_at: row.get(13)?,
    })
}

const SELECT_COLS: &str = "id, namespace, scope, key, value, source, version, status, content_hash, metadata, ttl_days, created_at, updated_at, tombstoned_at";

/// Stores an entry, returning `(id, created)` where `created` is `false`
/// when the store was a dedup no-op (identical contentHash).
pub fn store(conn: &Connection, input: StoreInput) -> TetoraResult<(String, bool)> {
    let hash = content_hash(input.namespace, input.scope, input.key, input.value);
    let now = Utc::now().to_rfc3339();
    let metadata_json = serde_json::to_string(&input.metadata)?;

    let existing = conn
        .query_row(
            &format!("SELECT {} FROM unified_memory WHERE namespace = ?1 AND scope = ?2 AND key = ?3 AND status = 'active'", SELECT_COLS),
            params![input.namespace, input.scope, input.key],
            row_to_entry,
        )
        .optional()?;

    match existing {
        Some(row) if row.content_hash == hash => Ok((row.id, false)),
        Some(row) => {
            // Copy the current value into memory_versions before overwriting.
            conn.execute(
                "INSERT INTO memory_versions (id, version, namespace, scope, key, value, source, content_hash, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![row.id, row.version as i64, row.namespace, row.scope, row.key, row.value, row.source, row.content_hash, serde_json::to_string(&row.metadata)?, row.updated_at],
            )?;

            let next_version = row.version + 1;
            conn.execute(
                "UPDATE unified_memory SET value = ?2, source = ?3, version = ?4, content_hash = ?5, metadata = ?6, ttl_days = ?7, updated_at = ?8 WHERE id = ?1",
                params![row.id, input.value, input.source, next_version as i64, hash, metadata_json, input.ttl_days.map(|v| v as i64), now],
            )?;
            Ok((row.id, true))
        }
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO unified_memory (id, namespace, scope, key, value, source, version, status, content_hash, metadata, ttl_days, created_at, updated_at, tombstoned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 'active', ?7, ?8, ?9, ?10, ?10, NULL)",
                params![id, input.namespace, input.scope, input.key, input.value, input.source, hash, metadata_json, input.ttl_days.map(|v| v as i64), now],
            )?;
            Ok((id, true))
        }
    }
}

/// Active lookup by `(namespace,scope,key)` — ignores tombstoned rows.
pub fn get(conn: &Connection, namespace: &str, scope: &str, key: &str) -> TetoraResult<Option<UnifiedMemoryEntry>> {
    conn.query_row(
        &format!("SELECT {} FROM unified_memory WHERE namespace = ?1 AND scope = ?2 AND key = ?3 AND status = 'active'", SELECT_COLS),
        params![namespace, scope, key],
        row_to_entry,
    )
    .optional()
    .map_err(TetoraError::from)
}

/// Fetches by id regardless of status — tombstoned entries are returned too.
pub fn get_by_id(conn: &Connection, id: &str) -> TetoraResult<Option<UnifiedMemoryEntry>> {
    conn.query_row(&format!("SELECT {} FROM unified_memory WHERE id = ?1", SELECT_COLS), params![id], row_to_entry)
        .optional()
        .map_err(TetoraError::from)
}

/// Tombstones an entry. A subsequent `store` with the same
/// `(namespace,scope,key)` succeeds as a fresh entry with a new id, since
/// lookups above only ever match `status = 'active'`.
pub fn delete(conn: &Connection, id: &str) -> TetoraResult<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn.execute("UPDATE unified_memory SET status = 'tombstoned', tombstoned_at = ?2 WHERE id = ?1 AND status = 'active'", params![id, now])?;
    Ok(n > 0)
}

pub fn list(conn: &Connection, namespace: Option<&str>, scope: Option<&str>, limit: usize) -> TetoraResult<Vec<UnifiedMemoryEntry>> {
    let mut sql = format!("SELECT {} FROM unified_memory WHERE status = 'active'", SELECT_COLS);
    if namespace.is_some() {
        sql.push_str(" AND namespace = ?1");
    }
    if scope.is_some() {
        sql.push_str(if namespace.is_some() { " AND scope = ?2" } else { " AND scope = ?1" });
    }
    sql.push_str(" ORDER BY updated_at DESC LIMIT ?");
    // placeholders are positional; rebuild with explicit params instead of
    // trying to juggle mixed optional binds through one prepared string.
    let mut stmt = conn.prepare(&sql.replace("LIMIT ?", &format!("LIMIT {}", limit)))?;
    let rows = match (namespace, scope) {
        (Some(ns), Some(sc)) => stmt.query_map(params![ns, sc], row_to_entry)?.collect::<Result<Vec<_>, _>>(),
        (Some(ns), None) => stmt.query_map(params![ns], row_to_entry)?.collect::<Result<Vec<_>, _>>(),
        (None, Some(sc)) => stmt.query_map(params![sc], row_to_entry)?.collect::<Result<Vec<_>, _>>(),
        (None, None) => stmt.query_map([], row_to_entry)?.collect::<Result<Vec<_>, _>>(),
    };
    rows.map_err(TetoraError::from)
}

/// Returns up to `n` prior versions, most-recent-first (descending version).
pub fn history(conn: &Connection, id: &str, n: usize) -> TetoraResult<Vec<UnifiedMemoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, namespace, scope, key, value, source, version, 'active', content_hash, metadata, NULL, created_at, created_at, NULL
         FROM memory_versions WHERE id = ?1 ORDER BY version DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![id, n as i64], row_to_entry)?;
    rows.collect::<Result<_, _>>().map_err(TetoraError::from)
}

/// Case-insensitive substring match on key and value, active rows only.
pub fn search(conn: &Connection, query: &str, namespace: Option<&str>, scope: Option<&str>, limit: usize) -> TetoraResult<Vec<UnifiedMemoryEntry>> {
    let like = format!("%{}%", query.to_lowercase());
    let mut sql = format!(
        "SELECT {} FROM unified_memory WHERE status = 'active' AND (LOWER(key) LIKE ?1 OR LOWER(value) LIKE ?1)",
        SELECT_COLS
    );
    let mut idx = 2;
    if namespace.is_some() {
        sql.push_str(&format!(" AND namespace = ?{}", idx));
        idx += 1;
    }
    if scope.is_some() {
        sql.push_str(&format!(" AND scope = ?{}", idx));
    }
    sql.push_str(" ORDER BY updated_at DESC LIMIT ?");
    let sql = sql.replace("LIMIT ?", &format!("LIMIT {}", limit));

    let mut stmt = conn.prepare(&sql)?;
    let rows = match (namespace, scope) {
        (Some(ns), Some(sc)) => stmt.query_map(params![like, ns, sc], row_to_entry)?.collect::<Result<Vec<_>, _>>(),
        (Some(ns), None) => stmt.query_map(params![like, ns], row_to_entry)?.collect::<Result<Vec<_>, _>>(),
        (None, Some(sc)) => stmt.query_map(params![like, sc], row_to_entry)?.collect::<Result<Vec<_>, _>>(),
        (None, None) => stmt.query_map(params![like], row_to_entry)?.collect::<Result<Vec<_>, _>>(),
    };
    rows.map_err(TetoraError::from)
}

/// Idempotent link insert — `(from,to,type)` is the primary key.
pub fn link(conn: &Connection, from_id: &str, to_id: &str, link_type: &str) -> TetoraResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO memory_links (from_id, to_id, type) VALUES (?1, ?2, ?3)",
        params![from_id, to_id, link_type],
    )?;
    Ok(())
}

pub fn get_links(conn: &Connection, id: &str) -> TetoraResult<Vec<MemoryLink>> {
    let mut stmt = conn.prepare("SELECT from_id, to_id, type FROM memory_links WHERE from_id = ?1 OR to_id = ?1")?;
    let rows = stmt.query_map(params![id], |row| Ok(MemoryLink { from_id: row.get(0)?, to_id: row.get(1)?, link_type: row.get(2)? }))?;
    rows.collect::<Result<_, _>>().map_err(TetoraError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory;

    fn input<'a>(ns: &'a str, scope: &'a str, key: &'a str, value: &'a str) -> StoreInput<'a> {
        StoreInput { namespace: ns, scope, key, value, source: "test", metadata: serde_json::json!({}), ttl_days: None }
    }

    #[test]
    fn store_dedups_identical_value() {
        let conn = open_in_memory().unwrap();
        let (id1, created1) = store(&conn, input("fact", "", "name", "A")).unwrap();
        assert!(created1);
        let (id2, created2) = store(&conn, input("fact", "", "name", "A")).unwrap();
        assert_eq!(id1, id2);
        assert!(!created2);
        let entry = get(&conn, "fact", "", "name").unwrap().unwrap();
        assert_eq!(entry.version, 1);
    }

    #[test]
    fn store_new_value_bumps_version_and_preserves_history() {
        let conn = open_in_memory().unwrap();
        let (id, _) = store(&conn, input("fact", "", "name", "A")).unwrap();
        let (id2, _) = store(&conn, input("fact", "", "name", "B")).unwrap();
        assert_eq!(id, id2);

        let current = get(&conn, "fact", "", "name").unwrap().unwrap();
        assert_eq!(current.value, "B");
        assert_eq!(current.version, 2);

        let hist = history(&conn, &id, 10).unwrap();
        assert_eq!(hist.len(), 1);
        assert_eq!(hist[0].value, "A");
        assert_eq!(hist[0].version, 1);
    }

    #[test]
    fn delete_then_restore_gets_fresh_id() {
        let conn = open_in_memory().unwrap();
        let (id, _) = store(&conn, input("fact", "", "name", "A")).unwrap();
        store(&conn, input("fact", "", "name", "B")).unwrap();

        assert!(delete(&conn, &id).unwrap());
        assert!(get(&conn, "fact", "", "name").unwrap().is_none());
        let tombstoned = get_by_id(&conn, &id).unwrap().unwrap();
        assert_eq!(tombstoned.status, MemoryStatus::Tombstoned);

        let (new_id, created) = store(&conn, input("fact", "", "name", "C")).unwrap();
        assert!(created);
        assert_ne!(new_id, id);
        let fresh = get(&conn, "fact", "", "name").unwrap().unwrap();
        assert_eq!(fresh.version, 1);
        assert_eq!(fresh.value, "C");
    }

    #[test]
    fn search_matches_key_or_value_case_insensitively() {
        let conn = open_in_memory().unwrap();
        store(&conn, input("fact", "", "project", "Tetora is a multi-agent orchestrator")).unwrap();
        let hits = search(&conn, "ORCHESTRATOR", None, None, 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn links_are_idempotent_and_bidirectional_lookup() {
        let conn = open_in_memory().unwrap();
        let (a, _) = store(&conn, input("fact", "", "a", "1")).unwrap();
        let (b, _) = store(&conn, input("fact", "", "b", "2")).unwrap();
        link(&conn, &a, &b, "related").unwrap();
        link(&conn, &a, &b, "related").unwrap();
        let from_a = get_links(&conn, &a).unwrap();
        assert_eq!(from_a.len(), 1);
        let from_b = get_links(&conn, &b).unwrap();
        assert_eq!(from_b.len(), 1);
    }
}
