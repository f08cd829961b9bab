//! Persistent store (C1): a single embedded relational database for
//! sessions, messages, history, unified memory, embeddings, workflow runs,
//! the offline queue, OAuth credentials and the audit log.
//!
//! Schema is created lazily (`CREATE TABLE IF NOT EXISTS`) on first open,
//! following the teacher's `engine/sessions/schema.rs` idiom. All writes go
//! through `Server::db`'s single mutex (§5); reads may run concurrently
//! since `rusqlite::Connection` itself is `!Sync` but the mutex already
//! serializes every statement issued against it.

pub mod audit;
pub mod cron;
pub mod history;
pub mod oauth;
pub mod pruner;
pub mod queue;
pub mod reminders;
pub mod schema;
pub mod sessions;
pub mod workflows;

use std::path::Path;

use rusqlite::Connection;

use crate::atoms::error::TetoraResult;

/// Opens (creating if absent) the SQLite database at `path` and runs
/// migrations. WAL mode is enabled for concurrent-read throughput, matching
/// the teacher's `SessionStore::open`.
pub fn open(path: &Path) -> TetoraResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::run_migrations(&conn)?;
    Ok(conn)
}

/// In-memory database, used by tests and benches.
pub fn open_in_memory() -> TetoraResult<Connection> {
    let conn = Connection::open_in_memory()?;
    schema::run_migrations(&conn)?;
    Ok(conn)
}
