// ── Workflow executor (C9) ─────────────────────────────────────────────────
// DAG scheduler over named steps: dependency countdown, linear retries,
// per-step `onError` policy, dry-run/shadow/live modes. New relative to the
// teacher — its `engine/n8n_engine/` manages an *external* n8n container
// rather than running a DAG in-process, so the scheduling idiom here is
// grounded in the same semaphore/task-tracking pattern as `dispatch.rs`
// (C7) instead: concurrent steps are spawned and awaited via
// `FuturesUnordered`, exactly as `dispatch::dispatch`'s batch runner awaits
// its concurrent task set.
//
// `onError` is read as three alternative per-step failure policies, not a
// composition with retryMax: `retry` retries up to `retryMax` times (linear
// `retryDelayMs` backoff) and aborts the run if still failing after the
// last attempt; `skip` tries once and, on failure, lets dependents proceed
// anyway; `stop` tries once and aborts the run on failure. Spec.md is silent
// on whether these compose, so this is an explicit Open Question decision
// (see DESIGN.md).

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{info, warn};

use crate::atoms::error::TetoraError;
use crate::atoms::types::{
    OnError, RoleConfig, SSEEvent, SSEEventType, StepKind, StepRunResult, StepStatus, Task, Workflow, WorkflowMode, WorkflowRun, WorkflowStep,
};
use crate::dispatch;
use crate::providers::messages::Message;
use crate::providers::AnyProvider;
use crate::server::Server;
use crate::store::workflows;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn mode_prefix(mode: WorkflowMode) -> &'static str {
    match mode {
        WorkflowMode::Live => "",
        WorkflowMode::DryRun => "dry-run:",
        WorkflowMode::Shadow => "shadow:",
    }
}

// ── Template rendering ──────────────────────────────────────────────────

/// Replaces `{{var}}` tokens with workflow variables and `{{steps.<id>.output}}`
/// tokens with a prior step's output. Unresolved tokens are left verbatim.
fn render_template(text: &str, vars: &serde_json::Value, step_outputs: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let token = after[..end].trim();
        let replacement = if let Some(step_id) = token.strip_prefix("steps.").and_then(|s| s.strip_suffix(".output")) {
            step_outputs.get(step_id).cloned().unwrap_or_default()
        } else {
            var_lookup(token, vars).map(|v| value_to_string(&v)).unwrap_or_default()
        };
        out.push_str(&replacement);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn var_lookup(path: &str, vars: &serde_json::Value) -> Option<serde_json::Value> {
    let mut cur = vars;
    for part in path.split('.') {
        cur = cur.get(part)?;
    }
    Some(cur.clone())
}

// ── Condition evaluation ─────────────────────────────────────────────────

fn is_truthy(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

fn resolve_operand(token: &str, vars: &serde_json::Value) -> serde_json::Value {
    let token = token.trim();
    if let Some(inner) = token.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return serde_json::Value::String(inner.to_string());
    }
    if token == "true" {
        return serde_json::Value::Bool(true);
    }
    if token == "false" {
        return serde_json::Value::Bool(false);
    }
    if let Ok(n) = token.parse::<f64>() {
        return serde_json::json!(n);
    }
    var_lookup(token, vars).unwrap_or(serde_json::Value::Null)
}

fn numeric_compare(a: &serde_json::Value, op: &str, b: &serde_json::Value) -> bool {
    let (Some(af), Some(bf)) = (a.as_f64(), b.as_f64()) else { return false };
    match op {
        ">" => af > bf,
        ">=" => af >= bf,
        "<" => af < bf,
        "<=" => af <= bf,
        _ => false,
    }
}

/// Evaluates a `condition` step's boolean expression against workflow
/// variables. Supports `!expr`, `a OP b` for `OP in {==,!=,>,>=,<,<=}`, and
/// a bare identifier's truthiness.
fn eval_condition(expr: &str, vars: &serde_json::Value) -> bool {
    let expr = expr.trim();
    if let Some(rest) = expr.strip_prefix('!') {
        return !eval_condition(rest, vars);
    }
    for op in ["==", "!=", ">=", "<=", ">", "<"] {
        if let Some(idx) = expr.find(op) {
            let lhs = &expr[..idx];
            let rhs = &expr[idx + op.len()..];
            let lval = resolve_operand(lhs, vars);
            let rval = resolve_operand(rhs, vars);
            return match op {
                "==" => lval == rval,
                "!=" => lval != rval,
                _ => numeric_compare(&lval, op, &rval),
            };
        }
    }
    is_truthy(&resolve_operand(expr, vars))
}

// ── Step execution ───────────────────────────────────────────────────────

fn role_for(server: &Arc<Server>, role_id: &str) -> RoleConfig {
    server.current_config().roles.get(role_id).cloned().unwrap_or_else(|| RoleConfig { id: role_id.to_string(), soul_file: None, model: None, provider: None, tool_profile: crate::atoms::types::ToolProfile::Standard, budget_usd: None, description: None })
}

/// Runs a provider call directly, bypassing `dispatch.rs`'s session/history
/// persistence and SSE emission entirely — the execution path `shadow` mode
/// uses (§4.8: "bypasses history/session/handoff recording").
async fn shadow_call(server: &Arc<Server>, role_id: &str, prompt: &str) -> Result<(String, f64), TetoraError> {
    let cfg = server.current_config();
    let role = role_for(server, role_id);
    let provider_id = role.provider.clone().or_else(|| cfg.default_provider.clone()).unwrap_or_else(|| "claude".to_string());
    let provider_cfg = cfg.providers.iter().find(|p| p.id == provider_id).cloned().unwrap_or_else(|| crate::atoms::types::ProviderConfig { id: provider_id.clone(), kind: crate::atoms::types::ProviderKind::ClaudeCode, api_key: String::new(), base_url: None, default_model: None });
    let provider = AnyProvider::from_config(server.http_client.clone(), &provider_cfg);
    let model = role.model.clone().or_else(|| provider_cfg.default_model.clone()).unwrap_or_else(|| "claude-sonnet-4-20250514".to_string());

    let soul = crate::prompt::load_soul(role.soul_file.as_deref());
    let messages = vec![Message::system(soul), Message::user(prompt.to_string())];
    let chunks = crate::providers::execute(server, &provider, &provider_id, &messages, &[], &model, None, cfg.default_timeout_secs).await?;

    let mut text = String::new();
    let mut tokens_in = 0u64;
    let mut tokens_out = 0u64;
    for chunk in &chunks {
        if let Some(t) = &chunk.delta_text {
            text.push_str(t);
        }
        if let Some(u) = chunk.usage {
            tokens_in += u.input_tokens;
            tokens_out += u.output_tokens;
        }
    }
    let cost = crate::pricing::estimate_cost_usd(&model, tokens_in, tokens_out, 0, 0);
    Ok((text, cost))
}

async fn run_dispatch_like(server: &Arc<Server>, mode: WorkflowMode, role_id: &str, prompt: &str, run_id: &str, step_id: &str) -> (StepStatus, String, Option<String>, f64, Option<String>, Option<String>) {
    match mode {
        WorkflowMode::DryRun => {
            let role = role_for(server, role_id);
            let model = role.model.clone().or_else(|| server.current_config().default_model.clone()).unwrap_or_else(|| "claude-sonnet-4-20250514".to_string());
            let estimated_tokens = (prompt.len() / 4).max(1) as u64;
            let cost = crate::pricing::estimate_cost_usd(&model, estimated_tokens, 0, 0, 0);
            let preview: String = prompt.chars().take(200).collect();
            (StepStatus::Success, format!("[DRY-RUN] would dispatch to role '{}': {}", role_id, preview), None, cost, None, None)
        }
        WorkflowMode::Shadow => match shadow_call(server, role_id, prompt).await {
            Ok((text, cost)) => (StepStatus::Success, text, None, cost, None, None),
            Err(e) => (StepStatus::Error, String::new(), Some(e.to_string()), 0.0, None, None),
        },
        WorkflowMode::Live => {
            let task = Task {
                id: uuid::Uuid::new_v4().to_string(),
                name: step_id.to_string(),
                prompt: prompt.to_string(),
                agent: role_id.to_string(),
                model: None,
                provider: None,
                timeout_secs: None,
                budget_usd: None,
                permission_mode: None,
                source: format!("workflow:{}", run_id),
                session_id: None,
                add_dirs: vec![],
                mcp_path: None,
            };
            let result = dispatch::dispatch_single(server, task).await;
            let status = match result.status {
                crate::atoms::types::TaskStatus::Success => StepStatus::Success,
                crate::atoms::types::TaskStatus::Error => StepStatus::Error,
                crate::atoms::types::TaskStatus::Timeout => StepStatus::Timeout,
                crate::atoms::types::TaskStatus::Cancelled => StepStatus::Cancelled,
            };
            (status, result.output, result.error, result.cost_usd, Some(result.id), result.session_id)
        }
    }
}

async fn run_skill(server: &Arc<Server>, command: &str, args: &[String]) -> Result<String, String> {
    let cfg = server.current_config();
    let skill = cfg.skills.get(command).cloned().ok_or_else(|| format!("unknown skill '{}'", command))?;
    let timeout = Duration::from_secs(skill.timeout_secs.unwrap_or(crate::atoms::constants::DEFAULT_TOOL_TIMEOUT_SECS));

    let mut full_args = skill.args.clone();
    full_args.extend(args.iter().cloned());

    let fut = tokio::process::Command::new(&skill.command).args(&full_args).output();
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).to_string();
            if !output.status.success() {
                text.push_str(&format!("\n[exit {}] {}", output.status.code().unwrap_or(-1), String::from_utf8_lossy(&output.stderr)));
                return Err(text);
            }
            Ok(text)
        }
        Ok(Err(e)) => Err(format!("failed to spawn skill '{}': {}", command, e)),
        Err(_) => Err(format!("skill '{}' timed out after {}s", command, timeout.as_secs())),
    }
}

async fn run_tool_call(server: &Arc<Server>, tool: &str, input: &serde_json::Value) -> Result<String, String> {
    use crate::atoms::types::{ToolProfile, TrustLevel};
    use crate::providers::messages::{ToolCall, ToolCallFunction};
    use crate::tools::ToolAllowance;
    // Workflow tool_call steps name the tool explicitly in the workflow
    // definition, not via a model's tool_use block, so they're allowed the
    // full registry rather than a derived per-session allowance.
    let allowance = ToolAllowance { trust_level: TrustLevel::Auto, tool_profile: ToolProfile::Full, sandbox: false, tools_disabled: false };
    let ctx = crate::tools::ToolContext { server: server.clone(), agent_id: "workflow".to_string(), sandbox: false, allowance };
    let call = ToolCall { id: uuid::Uuid::new_v4().to_string(), tool_type: "function".into(), function: ToolCallFunction { name: tool.to_string(), arguments: input.to_string() } };
    let result = crate::tools::executor::execute_one(&ctx, &call).await;
    if result.success {
        Ok(result.output)
    } else {
        Err(result.output)
    }
}

fn parse_duration(spec: &str) -> Duration {
    let spec = spec.trim();
    let (num_part, unit) = spec.split_at(spec.trim_end_matches(|c: char| c.is_ascii_alphabetic()).len());
    let n: u64 = num_part.trim().parse().unwrap_or(0);
    match unit.trim() {
        "ms" => Duration::from_millis(n),
        "s" | "" => Duration::from_secs(n),
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 3600),
        _ => Duration::from_secs(n),
    }
}

struct StepOutcome {
    status: StepStatus,
    output: String,
    error: Option<String>,
    cost_usd: f64,
    task_id: Option<String>,
    session_id: Option<String>,
    retries: u32,
}

/// Executes one step (recursing into `parallel`'s nested list), honoring
/// `onError`/`retryMax`/`retryDelayMs` — retries apply only to the
/// `dispatch`/`handoff`/`skill`/`tool_call` kinds, which are the only ones
/// with an externally-observable failure mode.
fn execute_step<'a>(
    server: &'a Arc<Server>,
    step: &'a WorkflowStep,
    mode: WorkflowMode,
    vars: &'a serde_json::Value,
    step_outputs: &'a HashMap<String, String>,
    run_id: &'a str,
    cancel: &'a Arc<AtomicBool>,
) -> BoxFuture<'a, StepOutcome> {
    Box::pin(async move {
        let max_attempts = if matches!(step.on_error, OnError::Retry) { step.retry_max.max(1) } else { 1 };
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let once = execute_step_once(server, step, mode, vars, step_outputs, run_id, cancel).await;
            let failed = matches!(once.status, StepStatus::Error | StepStatus::Timeout);
            if !failed || attempt >= max_attempts || cancel.load(Ordering::Acquire) {
                return StepOutcome { retries: attempt - 1, ..once };
            }
            if step.retry_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.retry_delay_ms)).await;
            }
            warn!("[workflow] step '{}' failed (attempt {}/{}), retrying", step.id, attempt, max_attempts);
        }
    })
}

fn step_outcome_basic(status: StepStatus, output: String, error: Option<String>, cost_usd: f64) -> StepOutcome {
    StepOutcome { status, output, error, cost_usd, task_id: None, session_id: None, retries: 0 }
}

async fn execute_step_once(server: &Arc<Server>, step: &WorkflowStep, mode: WorkflowMode, vars: &serde_json::Value, step_outputs: &HashMap<String, String>, run_id: &str, cancel: &Arc<AtomicBool>) -> StepOutcome {
    match &step.kind {
        StepKind::Dispatch { prompt, role } => {
            let rendered = render_template(prompt, vars, step_outputs);
            let role_id = role.clone().unwrap_or_else(|| "default".to_string());
            let (status, output, error, cost, task_id, session_id) = run_dispatch_like(server, mode, &role_id, &rendered, run_id, &step.id).await;
            StepOutcome { status, output, error, cost_usd: cost, task_id, session_id, retries: 0 }
        }
        StepKind::Handoff { handoff_from, to_role } => {
            let input = step_outputs.get(handoff_from).cloned().unwrap_or_default();
            let (status, output, error, cost, task_id, session_id) = run_dispatch_like(server, mode, to_role, &input, run_id, &step.id).await;
            if matches!(mode, WorkflowMode::Live) && matches!(status, StepStatus::Success) {
                if let Err(e) = workflows::record_handoff(&server.db.lock(), run_id, handoff_from, to_role, &input) {
                    warn!("[workflow] failed to record handoff for step '{}': {}", step.id, e);
                }
                let _ = workflows::record_agent_message(&server.db.lock(), Some(run_id), handoff_from, Some(to_role), &input);
                let _ = workflows::record_agent_message(&server.db.lock(), Some(run_id), to_role, Some(handoff_from), &output);
                let event = SSEEvent { event_type: SSEEventType::Handoff, task_id: None, session_id: None, data: serde_json::json!({"runId": run_id, "stepId": step.id, "from": handoff_from, "to": to_role}), timestamp: now_rfc3339() };
                server.broker.publish(run_id, event);
            }
            StepOutcome { status, output, error, cost_usd: cost, task_id, session_id, retries: 0 }
        }
        StepKind::Skill { command, args } => {
            let rendered_args: Vec<String> = args.iter().map(|a| render_template(a, vars, step_outputs)).collect();
            match run_skill(server, command, &rendered_args).await {
                Ok(out) => step_outcome_basic(StepStatus::Success, out, None, 0.0),
                Err(e) => step_outcome_basic(StepStatus::Error, String::new(), Some(e), 0.0),
            }
        }
        StepKind::Condition { expr, on_true, on_false } => {
            let chosen = if eval_condition(expr, vars) { on_true } else { on_false };
            step_outcome_basic(StepStatus::Success, chosen.clone(), None, 0.0)
        }
        StepKind::Parallel { steps } => {
            let mut futs = FuturesUnordered::new();
            for sub in steps {
                futs.push(execute_step(server, sub, mode, vars, step_outputs, run_id, cancel));
            }
            let mut outputs = Vec::new();
            let mut any_failed = false;
            let mut first_error = None;
            while let Some(outcome) = futs.next().await {
                if matches!(outcome.status, StepStatus::Error | StepStatus::Timeout) {
                    any_failed = true;
                    first_error.get_or_insert(outcome.error.clone().unwrap_or_default());
                }
                outputs.push(outcome.output);
            }
            let joined = outputs.join("\n---\n");
            if any_failed {
                step_outcome_basic(StepStatus::Error, joined, first_error, 0.0)
            } else {
                step_outcome_basic(StepStatus::Success, joined, None, 0.0)
            }
        }
        StepKind::ToolCall { tool, input } => {
            let rendered_input = render_template(&input.to_string(), vars, step_outputs);
            let parsed: serde_json::Value = serde_json::from_str(&rendered_input).unwrap_or_else(|_| input.clone());
            match run_tool_call(server, tool, &parsed).await {
                Ok(out) => step_outcome_basic(StepStatus::Success, out, None, 0.0),
                Err(e) => step_outcome_basic(StepStatus::Error, String::new(), Some(e), 0.0),
            }
        }
        StepKind::Delay { duration } => {
            let d = parse_duration(duration);
            let deadline = Instant::now() + d;
            while Instant::now() < deadline {
                if cancel.load(Ordering::Acquire) {
                    return step_outcome_basic(StepStatus::Cancelled, String::new(), Some("cancelled during delay".to_string()), 0.0);
                }
                tokio::time::sleep(Duration::from_millis(100).min(deadline.saturating_duration_since(Instant::now()))).await;
            }
            step_outcome_basic(StepStatus::Success, String::new(), None, 0.0)
        }
        StepKind::Notify { message } => {
            let rendered = render_template(message, vars, step_outputs);
            let event = SSEEvent { event_type: SSEEventType::WorkflowNotify, task_id: None, session_id: None, data: serde_json::json!({"runId": run_id, "stepId": step.id, "message": rendered}), timestamp: now_rfc3339() };
            server.broker.publish(run_id, event);
            step_outcome_basic(StepStatus::Success, String::new(), None, 0.0)
        }
    }
}

// ── DAG scheduler ─────────────────────────────────────────────────────────

fn validate_dag(steps: &[WorkflowStep]) -> Result<(), TetoraError> {
    let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    for step in steps {
        for dep in &step.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(TetoraError::validation(format!("step '{}' depends on unknown step '{}'", step.id, dep)));
            }
        }
    }
    // Cycle detection via Kahn's algorithm.
    let mut remaining: HashMap<&str, usize> = steps.iter().map(|s| (s.id.as_str(), s.depends_on.len())).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps {
        for dep in &step.depends_on {
            dependents.entry(dep.as_str()).or_default().push(step.id.as_str());
        }
    }
    let mut queue: Vec<&str> = remaining.iter().filter(|(_, r)| **r == 0).map(|(id, _)| *id).collect();
    let mut visited = 0usize;
    while let Some(id) = queue.pop() {
        visited += 1;
        for dep in dependents.get(id).cloned().unwrap_or_default() {
            let r = remaining.get_mut(dep).unwrap();
            *r -= 1;
            if *r == 0 {
                queue.push(dep);
            }
        }
    }
    if visited != steps.len() {
        return Err(TetoraError::validation("workflow graph contains a cycle"));
    }
    Ok(())
}

/// Recursively marks a step (and anything transitively depending on it)
/// `skipped`, without running it — used both for aborted-run cleanup and
/// for a `condition` step's un-chosen branch.
fn cascade_skip(id: &str, dependents: &HashMap<String, Vec<String>>, pending: &mut HashSet<String>, results: &mut HashMap<String, StepRunResult>) {
    if !pending.remove(id) {
        return;
    }
    results.insert(id.to_string(), StepRunResult { step_id: id.to_string(), status: StepStatus::Skipped, output: String::new(), error: None, started_at: None, finished_at: None, duration_ms: 0, cost_usd: 0.0, task_id: None, session_id: None, retries: 0 });
    if let Some(deps) = dependents.get(id) {
        for dep in deps.clone() {
            cascade_skip(&dep, dependents, pending, results);
        }
    }
}

/// Runs a workflow to completion under the given mode. Never returns an
/// `Err` for step-level failures — those are captured in `step_results`;
/// the `Result` is reserved for a malformed graph (§4.8).
pub async fn run(server: &Arc<Server>, workflow: &Workflow, mode: WorkflowMode) -> Result<WorkflowRun, TetoraError> {
    validate_dag(&workflow.steps)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = now_rfc3339();
    let started = Instant::now();
    let cancel = Arc::new(AtomicBool::new(false));
    server.workflow_cancels.lock().insert(run_id.clone(), cancel.clone());

    let started_event = SSEEvent { event_type: SSEEventType::WorkflowStarted, task_id: None, session_id: None, data: serde_json::json!({"runId": run_id, "workflow": workflow.name, "mode": mode_prefix(mode)}), timestamp: now_rfc3339() };
    server.broker.publish(&run_id, started_event);

    let by_id: HashMap<String, &WorkflowStep> = workflow.steps.iter().map(|s| (s.id.clone(), s)).collect();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    let mut remaining: HashMap<String, usize> = HashMap::new();
    for step in &workflow.steps {
        remaining.insert(step.id.clone(), step.depends_on.len());
        for dep in &step.depends_on {
            dependents.entry(dep.clone()).or_default().push(step.id.clone());
        }
    }

    let mut pending: HashSet<String> = workflow.steps.iter().map(|s| s.id.clone()).collect();
    let mut results: HashMap<String, StepRunResult> = HashMap::new();
    let mut step_outputs: HashMap<String, String> = HashMap::new();
    let mut aborted = false;
    let mut total_cost = 0.0f64;
    let timeout = workflow.timeout_secs.map(Duration::from_secs);

    type StepFuture<'a> = Pin<Box<dyn std::future::Future<Output = (String, StepOutcome)> + Send + 'a>>;
    let mut in_flight: FuturesUnordered<StepFuture<'_>> = FuturesUnordered::new();

    let seed: Vec<String> = remaining.iter().filter(|(_, r)| **r == 0).map(|(id, _)| id.clone()).collect();
    for id in seed {
        pending.remove(&id);
        let step = by_id[&id];
        let vars = workflow.variables.clone();
        let outputs_snapshot = step_outputs.clone();
        let run_id_cl = run_id.clone();
        let cancel_cl = cancel.clone();
        let server_cl = server.clone();
        server.broker.publish(&run_id, SSEEvent { event_type: SSEEventType::StepStarted, task_id: None, session_id: None, data: serde_json::json!({"runId": run_id, "stepId": id}), timestamp: now_rfc3339() });
        in_flight.push(Box::pin(async move {
            let outcome = execute_step(&server_cl, step, mode, &vars, &outputs_snapshot, &run_id_cl, &cancel_cl).await;
            (id, outcome)
        }) as StepFuture<'_>);
    }

    let mut timed_out = false;
    while let Some((id, outcome)) = in_flight.next().await {
        if let Some(t) = timeout {
            if started.elapsed() > t {
                timed_out = true;
            }
        }

        total_cost += outcome.cost_usd;
        let step = by_id[&id];
        step_outputs.insert(id.clone(), outcome.output.clone());

        let step_failed = matches!(outcome.status, StepStatus::Error | StepStatus::Timeout | StepStatus::Cancelled);
        server.broker.publish(&run_id, SSEEvent { event_type: SSEEventType::StepCompleted, task_id: None, session_id: None, data: serde_json::json!({"runId": run_id, "stepId": id, "status": format!("{:?}", outcome.status)}), timestamp: now_rfc3339() });
        results.insert(id.clone(), StepRunResult { step_id: id.clone(), status: outcome.status, output: outcome.output, error: outcome.error, started_at: None, finished_at: Some(now_rfc3339()), duration_ms: 0, cost_usd: outcome.cost_usd, task_id: outcome.task_id, session_id: outcome.session_id, retries: outcome.retries });

        if step_failed && matches!(step.on_error, OnError::Stop | OnError::Retry) {
            aborted = true;
        }

        if let StepKind::Condition { on_true, on_false, .. } = &step.kind {
            let chosen = &results[&id].output;
            let skipped = if chosen == on_true { on_false } else { on_true };
            cascade_skip(skipped, &dependents, &mut pending, &mut results);
        }

        if aborted || timed_out || cancel.load(Ordering::Acquire) {
            for dep_id in dependents.get(&id).cloned().unwrap_or_default() {
                cascade_skip(&dep_id, &dependents, &mut pending, &mut results);
            }
            continue;
        }

        for dep in dependents.get(&id).cloned().unwrap_or_default() {
            if !pending.contains(&dep) {
                continue;
            }
            let r = remaining.get_mut(&dep).unwrap();
            *r -= 1;
            if *r == 0 {
                pending.remove(&dep);
                let step = by_id[&dep];
                let vars = workflow.variables.clone();
                let outputs_snapshot = step_outputs.clone();
                let run_id_cl = run_id.clone();
                let cancel_cl = cancel.clone();
                let server_cl = server.clone();
                server.broker.publish(&run_id, SSEEvent { event_type: SSEEventType::StepStarted, task_id: None, session_id: None, data: serde_json::json!({"runId": run_id, "stepId": dep}), timestamp: now_rfc3339() });
                in_flight.push(Box::pin(async move {
                    let outcome = execute_step(&server_cl, step, mode, &vars, &outputs_snapshot, &run_id_cl, &cancel_cl).await;
                    (dep, outcome)
                }) as StepFuture<'_>);
            }
        }
    }

    for id in pending.drain().collect::<Vec<_>>() {
        results.insert(id.clone(), StepRunResult { step_id: id, status: StepStatus::Skipped, output: String::new(), error: None, started_at: None, finished_at: None, duration_ms: 0, cost_usd: 0.0, task_id: None, session_id: None, retries: 0 });
    }

    server.workflow_cancels.lock().remove(&run_id);

    let base_status = if timed_out {
        "timeout"
    } else if cancel.load(Ordering::Acquire) {
        "cancelled"
    } else if aborted || results.values().any(|r| matches!(r.status, StepStatus::Error)) {
        "error"
    } else {
        "success"
    };
    let status = format!("{}{}", mode_prefix(mode), base_status);

    let run = WorkflowRun {
        id: run_id.clone(),
        workflow_name: workflow.name.clone(),
        status,
        started_at,
        finished_at: Some(now_rfc3339()),
        duration_ms: started.elapsed().as_millis() as u64,
        total_cost,
        variables: workflow.variables.clone(),
        step_results: results,
        error: if aborted { Some("one or more steps failed with onError=stop/retry".to_string()) } else { None },
    };

    if matches!(mode, WorkflowMode::Live) {
        if let Err(e) = workflows::save_run(&server.db.lock(), &run) {
            warn!("[workflow] failed to persist run {}: {}", run.id, e);
        }
    }

    let event = SSEEvent { event_type: SSEEventType::WorkflowCompleted, task_id: None, session_id: None, data: serde_json::json!({"runId": run.id, "status": run.status}), timestamp: now_rfc3339() };
    server.broker.publish(&run.id, event);

    info!("[workflow] run {} ({}) finished: {}", run.id, workflow.name, run.status);
    Ok(run)
}

/// Cancels a running workflow by id. Returns `true` if a matching run was
/// found and signalled.
pub fn cancel(server: &Arc<Server>, run_id: &str) -> bool {
    if let Some(flag) = server.workflow_cancels.lock().get(run_id) {
        flag.store(true, Ordering::Release);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_equality_and_negation() {
        let vars = serde_json::json!({"env": "prod", "count": 3});
        assert!(eval_condition("env == \"prod\"", &vars));
        assert!(!eval_condition("env == \"staging\"", &vars));
        assert!(eval_condition("count > 1", &vars));
        assert!(eval_condition("!ready", &vars));
    }

    #[test]
    fn template_renders_vars_and_step_outputs() {
        let vars = serde_json::json!({"name": "Ada"});
        let mut outputs = HashMap::new();
        outputs.insert("draft".to_string(), "hello world".to_string());
        let rendered = render_template("Hi {{name}}, draft said: {{steps.draft.output}}", &vars, &outputs);
        assert_eq!(rendered, "Hi Ada, draft said: hello world");
    }

    #[test]
    fn parses_common_duration_units() {
        assert_eq!(parse_duration("500ms"), Duration::from_millis(500));
        assert_eq!(parse_duration("5s"), Duration::from_secs(5));
        assert_eq!(parse_duration("2m"), Duration::from_secs(120));
    }

    #[test]
    fn validate_dag_rejects_cycle() {
        let steps = vec![
            WorkflowStep { id: "a".into(), kind: StepKind::Notify { message: "a".into() }, depends_on: vec!["b".into()], on_error: OnError::Stop, retry_max: 0, retry_delay_ms: 0 },
            WorkflowStep { id: "b".into(), kind: StepKind::Notify { message: "b".into() }, depends_on: vec!["a".into()], on_error: OnError::Stop, retry_max: 0, retry_delay_ms: 0 },
        ];
        assert!(validate_dag(&steps).is_err());
    }

    #[test]
    fn validate_dag_accepts_diamond() {
        let steps = vec![
            WorkflowStep { id: "a".into(), kind: StepKind::Notify { message: "a".into() }, depends_on: vec![], on_error: OnError::Stop, retry_max: 0, retry_delay_ms: 0 },
            WorkflowStep { id: "b".into(), kind: StepKind::Notify { message: "b".into() }, depends_on: vec!["a".into()], on_error: OnError::Stop, retry_max: 0, retry_delay_ms: 0 },
            WorkflowStep { id: "c".into(), kind: StepKind::Notify { message: "c".into() }, depends_on: vec!["a".into()], on_error: OnError::Stop, retry_max: 0, retry_delay_ms: 0 },
            WorkflowStep { id: "d".into(), kind: StepKind::Notify { message: "d".into() }, depends_on: vec!["b".into(), "c".into()], on_error: OnError::Stop, retry_max: 0, retry_delay_ms: 0 },
        ];
        assert!(validate_dag(&steps).is_ok());
    }
}
