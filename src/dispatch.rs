// ── Dispatch engine (C7) ───────────────────────────────────────────────────
// Concurrency-gated task runner: resolves a role + provider, assembles the
// prompt, round-trips tool calls, persists history/session state and emits
// the full per-task SSE sequence (spec §4.6). Grounded on the teacher's
// `engine/state.rs::EngineState` (`run_semaphore`, `active_runs` as an
// abort-handle map) and `engine/orchestrator/mod.rs::run_project`'s
// single-task execution loop, generalized from "run one n8n-style project"
// into the abstract `Dispatch`/`RunSingle`/`Cancel`/`Retry`/`Reroute`
// contract spec names.
//
// `SessionScope` isn't derived anywhere else in the spec or data model, so
// inbound source strings are read as `"<channel>:<scope>"` (e.g.
// `"discord:dm"`, `"discord:group"`) with an unsuffixed source defaulting
// to `main` — an implementation decision recorded in DESIGN.md.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::atoms::constants::MAX_TOOL_ROUNDS;
use crate::atoms::error::TetoraError;
use crate::atoms::types::{
    Complexity, EngineConfig, ProviderConfig, ProviderKind, RoleConfig, SSEEvent, SSEEventType, SessionScope, Task, TaskResult, TaskStatus,
};
use crate::broker::Broker;
use crate::classifier;
use crate::prompt::{self, PromptInputs};
use crate::providers::messages::{Message, Role, ToolCall, ToolCallFunction, ToolDefinition};
use crate::providers::AnyProvider;
use crate::router;
use crate::server::{ActiveRun, RouteResultEntry, RouteResultStatus, Server};
use crate::store::{history, sessions};
use crate::tools::{self, derive_tool_allowance, tools_for_profile, ToolContext};

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn infer_scope(source: &str) -> SessionScope {
    let lower = source.to_lowercase();
    if lower.ends_with(":dm") {
        SessionScope::Dm
    } else if lower.ends_with(":group") {
        SessionScope::Group
    } else {
        SessionScope::Main
    }
}

fn role_for(cfg: &EngineConfig, agent: &str) -> RoleConfig {
    cfg.roles.get(agent).cloned().unwrap_or_else(|| RoleConfig { id: agent.to_string(), soul_file: None, model: None, provider: None, tool_profile: crate::atoms::types::ToolProfile::Standard, budget_usd: None, description: None })
}

fn resolve_provider_id(task: &Task, role: &RoleConfig, cfg: &EngineConfig) -> String {
    task.provider.clone().or_else(|| role.provider.clone()).or_else(|| cfg.default_provider.clone()).unwrap_or_else(|| "claude".to_string())
}

fn provider_config_for(cfg: &EngineConfig, provider_id: &str) -> ProviderConfig {
    cfg.providers
        .iter()
        .find(|p| p.id == provider_id)
        .cloned()
        .unwrap_or_else(|| ProviderConfig { id: provider_id.to_string(), kind: ProviderKind::ClaudeCode, api_key: String::new(), base_url: None, default_model: None })
}

fn publish_event(broker: &Broker, task: &Task, session_id: Option<&str>, event_type: SSEEventType, data: serde_json::Value) {
    let event = SSEEvent { event_type, task_id: Some(task.id.clone()), session_id: session_id.map(String::from), data, timestamp: now_rfc3339() };
    match session_id {
        Some(sid) if sid != task.id => broker.publish_multi(&[task.id.as_str(), sid], event),
        _ => broker.publish(&task.id, event),
    }
}

/// Accumulated results of merging one provider turn's `StreamChunk`s: the
/// full text, any tool calls requested, the finish reason, token usage, and
/// (subprocess providers only, §4.3) the provider's own reported cost,
/// session id and error flag.
struct MergedTurn {
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<String>,
    usage: crate::providers::messages::TokenUsage,
    native_cost_usd: Option<f64>,
    native_session_id: Option<String>,
    is_error: Option<bool>,
}

/// Flattens accumulated `StreamChunk`s from one provider turn into the full
/// text, any tool calls requested, the finish reason, token usage, and any
/// subprocess-native cost/session/error fields (§4.3).
fn merge_stream(chunks: &[crate::providers::messages::StreamChunk]) -> MergedTurn {
    let mut text = String::new();
    let mut builders: BTreeMap<usize, (Option<String>, Option<String>, String)> = BTreeMap::new();
    let mut finish_reason = None;
    let mut usage = crate::providers::messages::TokenUsage::default();
    let mut native_cost_usd = None;
    let mut native_session_id = None;
    let mut is_error = None;

    for chunk in chunks {
        if let Some(t) = &chunk.delta_text {
            text.push_str(t);
        }
        for tc in &chunk.tool_calls {
            let entry = builders.entry(tc.index).or_default();
            if let Some(id) = &tc.id {
                entry.0 = Some(id.clone());
            }
            if let Some(name) = &tc.function_name {
                entry.1 = Some(name.clone());
            }
            if let Some(args) = &tc.arguments_delta {
                entry.2.push_str(args);
            }
        }
        if chunk.finish_reason.is_some() {
            finish_reason = chunk.finish_reason.clone();
        }
        if let Some(u) = chunk.usage {
            usage = u;
        }
        if chunk.native_cost_usd.is_some() {
            native_cost_usd = chunk.native_cost_usd;
        }
        if chunk.native_session_id.is_some() {
            native_session_id = chunk.native_session_id.clone();
        }
        if chunk.is_error.is_some() {
            is_error = chunk.is_error;
        }
    }

    let tool_calls = builders
        .into_iter()
        .map(|(idx, (id, name, args))| ToolCall {
            id: id.unwrap_or_else(|| format!("call_{}", idx)),
            tool_type: "function".to_string(),
            function: ToolCallFunction { name: name.unwrap_or_default(), arguments: if args.is_empty() { "{}".to_string() } else { args } },
        })
        .collect();

    MergedTurn { text, tool_calls, finish_reason, usage, native_cost_usd, native_session_id, is_error }
}

/// Core single-task execution: validates, resolves provider/model, builds
/// the conversation, round-trips tool calls, persists history + session
/// activity, and emits the task's SSE event sequence. Never returns an
/// `Err` — failures are reported as an `error`-status `TaskResult` so one
/// bad task in a batch can't poison the others (§4.6 `Dispatch`).
pub async fn run_single(server: &Arc<Server>, task: Task, role: RoleConfig) -> TaskResult {
    let start_at = now_rfc3339();
    let started = Instant::now();
    let cfg = server.current_config();

    for dir in &task.add_dirs {
        if !std::path::Path::new(dir).is_dir() {
            return TaskResult {
                id: task.id.clone(),
                name: task.name.clone(),
                status: TaskStatus::Error,
                output: String::new(),
                error: Some(format!("addDirs entry '{}' does not exist", dir)),
                cost_usd: 0.0,
                duration_ms: started.elapsed().as_millis() as u64,
                tokens_in: 0,
                tokens_out: 0,
                provider_ms: 0,
                session_id: task.session_id.clone(),
                provider: String::new(),
                exit_code: None,
            };
        }
    }

    let session = match sessions::find_or_create(&server.db.lock(), &task.agent, &task.source, task.session_id.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            return TaskResult { id: task.id.clone(), name: task.name.clone(), status: TaskStatus::Error, output: String::new(), error: Some(e.to_string()), cost_usd: 0.0, duration_ms: started.elapsed().as_millis() as u64, tokens_in: 0, tokens_out: 0, provider_ms: 0, session_id: None, provider: String::new(), exit_code: None };
        }
    };

    publish_event(&server.broker, &task, Some(&session.id), SSEEventType::TaskReceived, serde_json::json!({"agent": task.agent, "source": task.source}));

    let complexity = classifier::classify(&task.prompt, &task.source);
    let provider_id = resolve_provider_id(&task, &role, &cfg);
    let provider_cfg = provider_config_for(&cfg, &provider_id);
    let provider = AnyProvider::from_config(server.http_client.clone(), &provider_cfg);
    let model = task.model.clone().or_else(|| role.model.clone()).or_else(|| provider_cfg.default_model.clone()).unwrap_or_else(|| "claude-sonnet-4-20250514".to_string());

    publish_event(&server.broker, &task, Some(&session.id), SSEEventType::TaskProcessing, serde_json::json!({"complexity": format!("{:?}", complexity), "provider": provider_id, "model": model}));

    let scope = infer_scope(&task.source);
    let allowance = derive_tool_allowance(role.tool_profile, scope, complexity);
    let tool_defs: Vec<ToolDefinition> = if allowance.tools_disabled { vec![] } else { tools_for_profile(allowance.tool_profile) };

    let soul = prompt::load_soul(role.soul_file.as_deref());
    let system_prompt = prompt::assemble(
        complexity,
        provider.kind(),
        &PromptInputs { soul: &soul, reflection_entries: &[], writing_style: None, citation_rules: None, workspace_knowledge: None, workspace_docs: &[], add_dirs: &task.add_dirs },
        &cfg.prompt_budget,
    );

    let (history_limit, _char_budget) = complexity.context_size();
    let recent = sessions::recent_messages(&server.db.lock(), &session.id, history_limit).unwrap_or_default();

    let mut messages = vec![Message::system(system_prompt)];
    for row in &recent {
        messages.push(match row.role.as_str() {
            "assistant" => Message::assistant(row.content.clone()),
            "tool" => Message::tool_result("unknown", row.content.clone()),
            _ => Message::user(row.content.clone()),
        });
    }
    messages.push(Message::user(task.prompt.clone()));

    let timeout_secs = task.timeout_secs.unwrap_or(cfg.default_timeout_secs);
    let tool_ctx = ToolContext { server: server.clone(), agent_id: task.agent.clone(), sandbox: allowance.sandbox, allowance };

    let exec_future = run_turns(server, &provider, &provider_id, &mut messages, &tool_defs, &model, &task, &tool_ctx, &session.id, timeout_secs);
    let outcome = tokio::time::timeout(Duration::from_secs(timeout_secs.max(1)), exec_future).await;

    let (status, output, error, tokens_in, tokens_out, cost_usd, provider_ms, mut native_session_id) = match outcome {
        Err(_) => (TaskStatus::Timeout, String::new(), Some(format!("task timed out after {}s", timeout_secs)), 0, 0, 0.0, 0, None),
        Ok(Err(e)) => (TaskStatus::Error, String::new(), Some(e.to_string()), 0, 0, 0.0, 0, None),
        Ok(Ok((text, usage, provider_ms, native_cost_usd, native_session_id, is_error))) => {
            let estimated_cost = crate::pricing::estimate_cost_usd(&model, usage.input_tokens, usage.output_tokens, 0, 0);
            let cost = native_cost_usd.unwrap_or(estimated_cost);
            if is_error == Some(true) {
                (TaskStatus::Error, text.clone(), Some("provider reported isError".to_string()), usage.input_tokens, usage.output_tokens, cost, provider_ms, native_session_id)
            } else {
                (TaskStatus::Success, text, None, usage.input_tokens, usage.output_tokens, cost, provider_ms, native_session_id)
            }
        }
    };
    let result_session_id = native_session_id.take().unwrap_or_else(|| session.id.clone());

    if status == TaskStatus::Success {
        let _ = sessions::append_message(&server.db.lock(), &session.id, "user", &task.prompt, None, None);
        let _ = sessions::append_message(&server.db.lock(), &session.id, "assistant", &output, None, None);
        publish_event(&server.broker, &task, Some(&session.id), SSEEventType::SessionMessage, serde_json::json!({"role": "assistant", "content": output}));
    }

    server.daily_tracker.record(tokens_in, tokens_out, cost_usd);

    let result = TaskResult {
        id: task.id.clone(),
        name: task.name.clone(),
        status,
        output,
        error,
        cost_usd,
        duration_ms: started.elapsed().as_millis() as u64,
        tokens_in,
        tokens_out,
        provider_ms,
        session_id: Some(result_session_id),
        provider: provider_id,
        exit_code: None,
    };

    match history::record(&server.db.lock(), &task, &result, &start_at) {
        Ok(_) => {}
        Err(e) => warn!("[dispatch] failed to record history for task {}: {}", task.id, e),
    }

    let terminal_type = if result.status == TaskStatus::Success { SSEEventType::Completed } else { SSEEventType::Error };
    publish_event(&server.broker, &task, Some(&session.id), terminal_type, serde_json::json!({"status": format!("{:?}", result.status), "error": result.error}));

    result
}

/// One provider turn plus the tool-call round-trip loop (§4.3), bounded by
/// `MAX_TOOL_ROUNDS`. Returns `(finalText, usage, providerMs)`.
async fn run_turns(
    server: &Arc<Server>,
    provider: &AnyProvider,
    provider_id: &str,
    messages: &mut Vec<Message>,
    tool_defs: &[ToolDefinition],
    model: &str,
    task: &Task,
    tool_ctx: &ToolContext,
    session_id: &str,
    timeout_secs: u64,
) -> Result<(String, crate::providers::messages::TokenUsage, u64, Option<f64>, Option<String>, Option<bool>), TetoraError> {
    let mut rounds = 0u32;
    let mut total_usage = crate::providers::messages::TokenUsage::default();
    let mut total_provider_ms: u64 = 0;
    let mut native_cost_usd = None;
    let mut native_session_id = None;
    let mut is_error = None;

    loop {
        let turn_started = Instant::now();
        let chunks = crate::providers::execute(server, provider, provider_id, messages, tool_defs, model, None, timeout_secs).await?;
        total_provider_ms += turn_started.elapsed().as_millis() as u64;

        let merged = merge_stream(&chunks);
        let (text, tool_calls, finish_reason, usage) = (merged.text, merged.tool_calls, merged.finish_reason, merged.usage);
        total_usage.input_tokens += usage.input_tokens;
        total_usage.output_tokens += usage.output_tokens;
        total_usage.total_tokens += usage.total_tokens;
        if merged.native_cost_usd.is_some() {
            native_cost_usd = merged.native_cost_usd;
        }
        if merged.native_session_id.is_some() {
            native_session_id = merged.native_session_id;
        }
        if merged.is_error.is_some() {
            is_error = merged.is_error;
        }

        if !text.is_empty() {
            publish_event(&server.broker, task, Some(session_id), SSEEventType::OutputChunk, serde_json::json!({"text": text}));
        }

        let wants_tools = finish_reason.as_deref() == Some("tool_calls") || (!tool_calls.is_empty() && finish_reason.as_deref() != Some("stop"));
        if !wants_tools || tool_calls.is_empty() || tool_defs.is_empty() {
            return Ok((text, total_usage, total_provider_ms, native_cost_usd, native_session_id, is_error));
        }

        rounds += 1;
        if rounds > MAX_TOOL_ROUNDS {
            warn!("[dispatch] task {} hit max tool rounds ({})", task.id, MAX_TOOL_ROUNDS);
            return Ok((text, total_usage, total_provider_ms, native_cost_usd, native_session_id, is_error));
        }

        messages.push(Message { role: Role::Assistant, content: crate::providers::messages::MessageContent::Text(text), tool_calls: Some(tool_calls.clone()), tool_call_id: None, name: None });

        for call in &tool_calls {
            publish_event(&server.broker, task, Some(session_id), SSEEventType::ToolCall, serde_json::json!({"name": call.function.name, "arguments": call.function.arguments}));
        }

        let executed = tools::executor::execute_batch(tool_ctx, &tool_calls).await;
        for result in &executed {
            publish_event(&server.broker, task, Some(session_id), SSEEventType::ToolResult, serde_json::json!({"success": result.success, "output": result.output}));
            messages.push(Message::tool_result(result.tool_call_id.clone(), result.output.clone()));
        }
    }
}

/// Acquires the concurrency gate, spawns the run so it's abortable via
/// `Cancel`, and awaits it — translating an aborted join into a
/// `cancelled` result instead of propagating the `JoinError`.
async fn dispatch_one(server: Arc<Server>, task: Task, role: RoleConfig) -> TaskResult {
    let task_id = task.id.clone();
    let task_name = task.name.clone();

    if server.run_semaphore.available_permits() == 0 {
        publish_event(&server.broker, &task, None, SSEEventType::TaskQueued, serde_json::json!({"agent": task.agent}));
    }

    let server_for_run = server.clone();
    let handle = tokio::spawn(async move {
        let _permit = server_for_run.run_semaphore.acquire().await.expect("semaphore never closed");
        run_single(&server_for_run, task, role).await
    });

    server.active_runs.lock().insert(task_id.clone(), ActiveRun { abort: handle.abort_handle(), started_at: Instant::now(), task_name: task_name.clone() });

    let outcome = handle.await;
    server.active_runs.lock().remove(&task_id);

    match outcome {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => TaskResult { id: task_id, name: task_name, status: TaskStatus::Cancelled, output: String::new(), error: Some("cancelled".to_string()), cost_usd: 0.0, duration_ms: 0, tokens_in: 0, tokens_out: 0, provider_ms: 0, session_id: None, provider: String::new(), exit_code: None },
        Err(e) => TaskResult { id: task_id, name: task_name, status: TaskStatus::Error, output: String::new(), error: Some(e.to_string()), cost_usd: 0.0, duration_ms: 0, tokens_in: 0, tokens_out: 0, provider_ms: 0, session_id: None, provider: String::new(), exit_code: None },
    }
}

/// Runs a batch of tasks, one per configured role, up to `run_semaphore`'s
/// concurrency bound. Refuses re-entry while a batch is already running
/// (§4.6: "fails with `dispatch already running`").
pub async fn dispatch(server: &Arc<Server>, tasks: Vec<Task>) -> Result<Vec<TaskResult>, TetoraError> {
    if server.dispatch_active.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
        return Err(TetoraError::conflict("dispatch already running"));
    }

    let cfg = server.current_config();
    let futures = tasks.into_iter().map(|task| {
        let role = role_for(&cfg, &task.agent);
        dispatch_one(server.clone(), task, role)
    });

    let results = futures::future::join_all(futures).await;
    server.dispatch_active.store(false, Ordering::Release);
    Ok(results)
}

/// Runs a single task outside of a batch, resolving its role from config.
pub async fn dispatch_single(server: &Arc<Server>, task: Task) -> TaskResult {
    let cfg = server.current_config();
    let role = role_for(&cfg, &task.agent);
    dispatch_one(server.clone(), task, role).await
}

/// Cancels one running task by id, or every running task when `task_id` is
/// `None` (spec §4.6's bare `Cancel()`). Returns the number of tasks
/// aborted.
pub fn cancel(server: &Arc<Server>, task_id: Option<&str>) -> usize {
    let mut runs = server.active_runs.lock();
    match task_id {
        Some(id) => {
            if let Some(run) = runs.remove(id) {
                run.abort.abort();
                1
            } else {
                0
            }
        }
        None => {
            let n = runs.len();
            for (_, run) in runs.drain() {
                run.abort.abort();
            }
            n
        }
    }
}

/// Re-dispatches a previously recorded task with a fresh id and
/// `source="retry:<orig>"` (§4.6).
pub async fn retry(server: &Arc<Server>, task_id: &str) -> Result<TaskResult, TetoraError> {
    let original = history::get(&server.db.lock(), task_id)?.ok_or_else(|| TetoraError::not_found(format!("no history record for task '{}'", task_id)))?.task;

    let mut retried = original.clone();
    retried.id = uuid::Uuid::new_v4().to_string();
    retried.source = format!("retry:{}", task_id);

    Ok(dispatch_single(server, retried).await)
}

/// Re-classifies a previously recorded task via the smart router (C8) and
/// re-dispatches it to the newly picked role (§4.6).
pub async fn reroute(server: &Arc<Server>, task_id: &str) -> Result<TaskResult, TetoraError> {
    let original = history::get(&server.db.lock(), task_id)?.ok_or_else(|| TetoraError::not_found(format!("no history record for task '{}'", task_id)))?.task;

    let cfg = server.current_config();
    let decision = router::resolve(server, &cfg, &original.prompt).await;

    let mut rerouted = original.clone();
    rerouted.id = uuid::Uuid::new_v4().to_string();
    rerouted.agent = decision.role.clone();
    rerouted.source = format!("reroute:{}", task_id);

    let role = role_for(&cfg, &decision.role);
    Ok(dispatch_one(server.clone(), rerouted, role).await)
}

/// Records a route's outcome in the async route-result store, keyed by
/// task id, with the TTL the cleanup ticker below enforces.
pub fn record_route_result(server: &Arc<Server>, task_id: &str, result: &TaskResult) {
    let status = match result.status {
        TaskStatus::Success => RouteResultStatus::Success,
        TaskStatus::Cancelled => RouteResultStatus::Cancelled,
        TaskStatus::Error | TaskStatus::Timeout => RouteResultStatus::Error,
    };
    server.route_results.lock().insert(task_id.to_string(), RouteResultEntry { status, result: Some(result.clone()), error: result.error.clone(), created_at: Instant::now() });
}

const ROUTE_CLEANUP_INTERVAL_SECS: u64 = 5 * 60;

/// Periodically evicts route-result entries older than
/// `crate::atoms::constants::ROUTE_TTL_SECS` (§4.6).
pub fn spawn_route_cleanup_ticker(server: Arc<Server>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(ROUTE_CLEANUP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let ttl = Duration::from_secs(crate::atoms::constants::ROUTE_TTL_SECS);
            let mut map = server.route_results.lock();
            let before = map.len();
            map.retain(|_, entry| entry.created_at.elapsed() < ttl);
            let removed = before - map.len();
            if removed > 0 {
                info!("[dispatch] route-result cleanup evicted {} expired entries", removed);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_scope_from_source_suffix() {
        assert_eq!(infer_scope("discord:dm"), SessionScope::Dm);
        assert_eq!(infer_scope("discord:group"), SessionScope::Group);
        assert_eq!(infer_scope("http"), SessionScope::Main);
    }

    #[test]
    fn merge_stream_concatenates_text_and_rebuilds_indexed_tool_calls() {
        use crate::providers::messages::{StreamChunk, ToolCallDelta};

        let chunks = vec![
            StreamChunk { delta_text: Some("Hello, ".into()), tool_calls: vec![], ..Default::default() },
            StreamChunk { delta_text: Some("world".into()), tool_calls: vec![ToolCallDelta { index: 0, id: Some("call_1".into()), function_name: Some("fetch".into()), arguments_delta: Some("{\"url\":".into()) }], ..Default::default() },
            StreamChunk {
                delta_text: None,
                tool_calls: vec![ToolCallDelta { index: 0, id: None, function_name: None, arguments_delta: Some("\"https://x\"}".into()) }],
                finish_reason: Some("tool_calls".into()),
                usage: Some(crate::providers::messages::TokenUsage { input_tokens: 10, output_tokens: 5, total_tokens: 15 }),
                ..Default::default()
            },
        ];

        let merged = merge_stream(&chunks);
        assert_eq!(merged.text, "Hello, world");
        assert_eq!(merged.tool_calls.len(), 1);
        assert_eq!(merged.tool_calls[0].function.name, "fetch");
        assert_eq!(merged.tool_calls[0].function.arguments, "{\"url\":\"https://x\"}");
        assert_eq!(merged.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(merged.usage.input_tokens, 10);
    }
}
