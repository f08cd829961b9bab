//! Database schema and migrations. Grounded on the teacher's
//! `engine/sessions/schema.rs`: idempotent `CREATE TABLE IF NOT EXISTS`
//! statements run on every open, so upgrading is just appending new DDL —
//! existing SQL is never edited in place.

use log::info;
use rusqlite::Connection;

use crate::atoms::error::TetoraResult;

pub fn run_migrations(conn: &Connection) -> TetoraResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            agent TEXT NOT NULL,
            source TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            title TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_agent_source ON sessions(agent, source);

        CREATE TABLE IF NOT EXISTS session_messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            tool_calls_json TEXT,
            tool_call_id TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_session_messages_session ON session_messages(session_id, created_at);

        -- ═══ Dispatch history (denormalized task + result) ═══
        CREATE TABLE IF NOT EXISTS history (
            id TEXT PRIMARY KEY,
            task_json TEXT NOT NULL,
            result_json TEXT NOT NULL,
            status TEXT NOT NULL,
            session_id TEXT,
            start_at TEXT NOT NULL,
            end_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_history_session ON history(session_id, end_at);
        CREATE INDEX IF NOT EXISTS idx_history_status ON history(status);

        -- ═══ Unified memory (C10) ═══
        CREATE TABLE IF NOT EXISTS unified_memory (
            id TEXT PRIMARY KEY,
            namespace TEXT NOT NULL,
            scope TEXT NOT NULL DEFAULT '',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT '',
            version INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'active',
            content_hash TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            ttl_days INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            tombstoned_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_unified_memory_nsk ON unified_memory(namespace, scope, key, status);

        CREATE TABLE IF NOT EXISTS memory_versions (
            id TEXT NOT NULL,
            version INTEGER NOT NULL,
            namespace TEXT NOT NULL,
            scope TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT '',
            content_hash TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            PRIMARY KEY (id, version)
        );

        CREATE TABLE IF NOT EXISTS memory_links (
            from_id TEXT NOT NULL,
            to_id TEXT NOT NULL,
            type TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (from_id, to_id, type)
        );

        -- ═══ Embedding retrieval (C11) ═══
        CREATE TABLE IF NOT EXISTS embeddings (
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            content_hash TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (source, source_id)
        );

        -- ═══ Workflow executor (C9) ═══
        CREATE TABLE IF NOT EXISTS workflow_runs (
            id TEXT PRIMARY KEY,
            workflow_name TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            total_cost REAL NOT NULL DEFAULT 0,
            variables TEXT NOT NULL DEFAULT '{}',
            step_results TEXT NOT NULL DEFAULT '{}',
            error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_workflow_runs_name ON workflow_runs(workflow_name, started_at);

        CREATE TABLE IF NOT EXISTS handoffs (
            id TEXT PRIMARY KEY,
            workflow_run_id TEXT NOT NULL,
            from_step TEXT NOT NULL,
            to_role TEXT NOT NULL,
            input TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS agent_messages (
            id TEXT PRIMARY KEY,
            workflow_run_id TEXT,
            from_agent TEXT NOT NULL,
            to_agent TEXT,
            content TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- ═══ Offline queue ═══
        CREATE TABLE IF NOT EXISTS queue_items (
            id TEXT PRIMARY KEY,
            task_json TEXT NOT NULL,
            role_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_queue_status ON queue_items(status);

        -- ═══ OAuth credential store (treated as an opaque blob, §1) ═══
        CREATE TABLE IF NOT EXISTS oauth_credentials (
            service TEXT PRIMARY KEY,
            payload_json TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- ═══ Reminders (C14) ═══
        CREATE TABLE IF NOT EXISTS reminders (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            due_at TEXT NOT NULL,
            recurring TEXT,
            channel TEXT NOT NULL,
            user_id TEXT NOT NULL,
            fired INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_reminders_due ON reminders(due_at, fired);

        -- ═══ Cron jobs (C13) ═══
        CREATE TABLE IF NOT EXISTS cron_jobs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            schedule TEXT NOT NULL,
            role TEXT NOT NULL,
            prompt TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            last_run_at TEXT,
            next_run_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- ═══ Security & observability (C15) ═══
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event TEXT NOT NULL,
            source TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '',
            ip TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_audit_log_created ON audit_log(created_at);

        -- ═══ Generic config key/value (agent soul overrides, routing, etc.) ═══
        CREATE TABLE IF NOT EXISTS engine_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;

    info!("[store] schema up to date");
    Ok(())
}
