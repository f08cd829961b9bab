//! Workflow run persistence (C9): one row per `WorkflowRun`, plus the
//! `handoffs`/`agent_messages` rows a `handoff` step writes in live mode.
//! Grounded on `history.rs`'s JSON-blob-plus-indexed-columns shape.

use rusqlite::{params, Connection, OptionalExtension};

use crate::atoms::error::TetoraResult;
use crate::atoms::types::WorkflowRun;

/// Upserts the run's current snapshot — called after every step completes
/// so a crash mid-run still leaves a queryable partial record.
pub fn save_run(conn: &Connection, run: &WorkflowRun) -> TetoraResult<()> {
    let variables_json = serde_json::to_string(&run.variables)?;
    let step_results_json = serde_json::to_string(&run.step_results)?;

    conn.execute(
        "INSERT INTO workflow_runs (id, workflow_name, status, started_at, finished_at, duration_ms, total_cost, variables, step_results, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            finished_at = excluded.finished_at,
            duration_ms = excluded.duration_ms,
            total_cost = excluded.total_cost,
            step_results = excluded.step_results,
            error = excluded.error",
        params![run.id, run.workflow_name, run.status, run.started_at, run.finished_at, run.duration_ms, run.total_cost, variables_json, step_results_json, run.error],
    )?;
    Ok(())
}

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<WorkflowRun> {
    let variables_json: String = row.get(7)?;
    let step_results_json: String = row.get(8)?;
    Ok(WorkflowRun {
        id: row.get(0)?,
        workflow_name: row.get(1)?,
        status: row.get(2)?,
        started_at: row.get(3)?,
        finished_at: row.get(4)?,
        duration_ms: row.get(5)?,
        total_cost: row.get(6)?,
        variables: serde_json::from_str(&variables_json).unwrap_or(serde_json::Value::Null),
        step_results: serde_json::from_str(&step_results_json).unwrap_or_default(),
        error: row.get(9)?,
    })
}

pub fn get_run(conn: &Connection, id: &str) -> TetoraResult<Option<WorkflowRun>> {
    conn.query_row(
        "SELECT id, workflow_name, status, started_at, finished_at, duration_ms, total_cost, variables, step_results, error FROM workflow_runs WHERE id = ?1",
        params![id],
        row_to_run,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_runs(conn: &Connection, limit: usize) -> TetoraResult<Vec<WorkflowRun>> {
    let mut stmt = conn.prepare(
        "SELECT id, workflow_name, status, started_at, finished_at, duration_ms, total_cost, variables, step_results, error FROM workflow_runs ORDER BY started_at DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], row_to_run)?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

/// Records a `handoff` step's transfer (live mode only, §4.8).
pub fn record_handoff(conn: &Connection, workflow_run_id: &str, from_step: &str, to_role: &str, input: &str) -> TetoraResult<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO handoffs (id, workflow_run_id, from_step, to_role, input) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, workflow_run_id, from_step, to_role, input],
    )?;
    Ok(id)
}

/// Records one leg of an agent-to-agent message exchange.
pub fn record_agent_message(conn: &Connection, workflow_run_id: Option<&str>, from_agent: &str, to_agent: Option<&str>, content: &str) -> TetoraResult<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO agent_messages (id, workflow_run_id, from_agent, to_agent, content) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, workflow_run_id, from_agent, to_agent, content],
    )?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::StepStatus;
    use crate::store::open_in_memory;
    use std::collections::HashMap;

    fn sample_run() -> WorkflowRun {
        WorkflowRun {
            id: "wf1".into(),
            workflow_name: "onboarding".into(),
            status: "running".into(),
            started_at: "2026-01-01T00:00:00Z".into(),
            finished_at: None,
            duration_ms: 0,
            total_cost: 0.0,
            variables: serde_json::json!({"env": "prod"}),
            step_results: HashMap::new(),
            error: None,
        }
    }

    #[test]
    fn save_then_update_then_fetch() {
        let conn = open_in_memory().unwrap();
        let mut run = sample_run();
        save_run(&conn, &run).unwrap();

        run.status = "success".into();
        run.finished_at = Some("2026-01-01T00:01:00Z".into());
        save_run(&conn, &run).unwrap();

        let fetched = get_run(&conn, "wf1").unwrap().unwrap();
        assert_eq!(fetched.status, "success");
        assert_eq!(fetched.variables["env"], "prod");
    }

    #[test]
    fn handoff_and_agent_message_round_trip() {
        let conn = open_in_memory().unwrap();
        save_run(&conn, &sample_run()).unwrap();
        record_handoff(&conn, "wf1", "draft", "reviewer", "draft output").unwrap();
        record_agent_message(&conn, Some("wf1"), "drafter", Some("reviewer"), "please review").unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM handoffs WHERE workflow_run_id = 'wf1'", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn list_runs_orders_by_started_at_desc() {
        let conn = open_in_memory().unwrap();
        let mut a = sample_run();
        a.id = "a".into();
        a.started_at = "2026-01-01T00:00:00Z".into();
        let mut b = sample_run();
        b.id = "b".into();
        b.started_at = "2026-01-02T00:00:00Z".into();
        save_run(&conn, &a).unwrap();
        save_run(&conn, &b).unwrap();

        let list = list_runs(&conn, 10).unwrap();
        assert_eq!(list[0].id, "b");
    }
}
