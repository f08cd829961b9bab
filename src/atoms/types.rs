// ── Tetora Atoms: Core Types ──────────────────────────────────────────────
// Struct/enum definitions only. Impls and free functions live beside the
// logic that uses them, mirroring the teacher's atoms/engine split.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Complexity tier (C5) ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Standard,
    Complex,
}

impl Complexity {
    /// Session context size derived from complexity (§4.4).
    pub fn context_size(&self) -> (usize, usize) {
        match self {
            Complexity::Simple => (5, 4000),
            Complexity::Standard => (10, 8000),
            Complexity::Complex => (20, 16000),
        }
    }
}

// ── Trust / tool profile (C6) ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Observe = 0,
    Suggest = 1,
    Auto = 2,
}

impl TrustLevel {
    /// The more restrictive of two trust levels.
    pub fn min(a: TrustLevel, b: TrustLevel) -> TrustLevel {
        if a < b { a } else { b }
    }

    pub fn from_str_degrading(s: &str) -> TrustLevel {
        match s {
            "auto" => TrustLevel::Auto,
            "suggest" => TrustLevel::Suggest,
            _ => TrustLevel::Observe,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolProfile {
    Minimal,
    Standard,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionScope {
    Main,
    Dm,
    Group,
}

/// `{sessionType, trustLevel, toolProfile, sandbox}` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustScope {
    pub session_type: SessionScope,
    pub trust_level: TrustLevel,
    pub tool_profile: ToolProfile,
    pub sandbox: bool,
}

// ── Task / TaskResult (C7) ──────────────────────────────────────────────

/// Per-million-token USD price for one model. Used by the dispatch cost
/// estimator (§4.6) and the workflow dry-run mode (§4.8).
#[derive(Debug, Clone, Copy)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub prompt: String,
    pub agent: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub budget_usd: Option<f64>,
    #[serde(default)]
    pub permission_mode: Option<String>,
    pub source: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub add_dirs: Vec<String>,
    #[serde(default)]
    pub mcp_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Error,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub provider_ms: u64,
    #[serde(default)]
    pub session_id: Option<String>,
    pub provider: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

// ── Session ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent: String,
    pub source: String,
    pub status: SessionStatus,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

// ── HistoryRecord ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub task: Task,
    pub result: TaskResult,
    pub start_at: String,
    pub end_at: String,
}

// ── Unified memory (C10) ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    Active,
    Tombstoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedMemoryEntry {
    pub id: String,
    /// Open-ended namespace (fact, preference, episode, emotion, ...). Kept
    /// as a `String` rather than a closed enum since spec marks it open-set.
    pub namespace: String,
    pub scope: String,
    pub key: String,
    pub value: String,
    pub source: String,
    pub version: u64,
    pub status: MemoryStatus,
    pub content_hash: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub ttl_days: Option<u32>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub tombstoned_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLink {
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub link_type: String,
}

// ── Embedding retrieval (C11) ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub source: String,
    pub source_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub created_at: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub source_id: String,
    pub source: String,
    pub content: String,
    pub score: f64,
    pub created_at: String,
}

// ── Workflow (C9) ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    Live,
    DryRun,
    Shadow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_name: String,
    /// e.g. "running", "success", "error", "cancelled", "timeout",
    /// "dry-run:success", "shadow:success", ...
    pub status: String,
    pub started_at: String,
    #[serde(default)]
    pub finished_at: Option<String>,
    pub duration_ms: u64,
    pub total_cost: f64,
    #[serde(default)]
    pub variables: serde_json::Value,
    pub step_results: HashMap<String, StepRunResult>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Error,
    Skipped,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRunResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    pub duration_ms: u64,
    pub cost_usd: f64,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Stop,
    Skip,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Dispatch { prompt: String, #[serde(default)] role: Option<String> },
    Skill { command: String, #[serde(default)] args: Vec<String> },
    Condition { expr: String, on_true: String, on_false: String },
    Parallel { steps: Vec<WorkflowStep> },
    Handoff { handoff_from: String, to_role: String },
    ToolCall { tool: String, #[serde(default)] input: serde_json::Value },
    Delay { duration: String },
    Notify { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_on_error")]
    pub on_error: OnError,
    #[serde(default)]
    pub retry_max: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
}

fn default_on_error() -> OnError {
    OnError::Stop
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub variables: serde_json::Value,
    pub steps: Vec<WorkflowStep>,
}

// ── Offline queue ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub task_json: String,
    pub role_name: String,
    pub status: QueueStatus,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: String,
}

// ── SSE (C2) ─────────────────────────────────────────────────────────────

/// Closed event-type set per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SSEEventType {
    TaskReceived,
    TaskRouting,
    TaskProcessing,
    TaskQueued,
    DiscordProcessing,
    DiscordReplying,
    OutputChunk,
    ToolCall,
    ToolResult,
    SessionMessage,
    Completed,
    Error,
    Heartbeat,
    WorkflowStarted,
    StepStarted,
    StepCompleted,
    WorkflowCompleted,
    WorkflowNotify,
    Handoff,
}

impl SSEEventType {
    /// Terminal events close the per-task stream (§4.2).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SSEEventType::Completed | SSEEventType::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SSEEvent {
    #[serde(rename = "type")]
    pub event_type: SSEEventType,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub data: serde_json::Value,
    pub timestamp: String,
}

// ── Provider registry config ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Google,
    Ollama,
    OpenRouter,
    DeepSeek,
    Grok,
    Mistral,
    Moonshot,
    /// Subprocess / stream-json CLI provider (e.g. "claude-code").
    ClaudeCode,
    Custom,
}

impl ProviderKind {
    pub fn default_base_url(&self) -> &str {
        match self {
            ProviderKind::OpenAI => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::Ollama => "http://localhost:11434",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::DeepSeek => "https://api.deepseek.com/v1",
            ProviderKind::Grok => "https://api.x.ai/v1",
            ProviderKind::Mistral => "https://api.mistral.ai/v1",
            ProviderKind::Moonshot => "https://api.moonshot.cn/v1",
            ProviderKind::ClaudeCode | ProviderKind::Custom => "",
        }
    }

    /// Whether this provider is of subprocess type — only the soul prompt
    /// layer is used, all other prompt layers are skipped (§4.4).
    pub fn is_subprocess(&self) -> bool {
        matches!(self, ProviderKind::ClaudeCode)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub id: String,
    #[serde(default)]
    pub soul_file: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_tool_profile")]
    pub tool_profile: ToolProfile,
    #[serde(default)]
    pub budget_usd: Option<f64>,
    /// Short free-text description used by the smart router's
    /// embedding-nearest-role fallback (§4.7) to pick a role when no rule
    /// matches and no coordinator is configured.
    #[serde(default)]
    pub description: Option<String>,
}

fn default_tool_profile() -> ToolProfile {
    ToolProfile::Standard
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartDispatchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub coordinator: Option<String>,
    #[serde(default = "default_role_name")]
    pub default_role: String,
    #[serde(default)]
    pub rules: Vec<crate::router::RoutingRule>,
}

fn default_role_name() -> String {
    "default".into()
}

impl Default for SmartDispatchConfig {
    fn default() -> Self {
        Self { enabled: false, coordinator: None, default_role: default_role_name(), rules: vec![] }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MmrConfig {
    #[serde(default = "default_lambda")]
    pub lambda: f64,
}

fn default_lambda() -> f64 {
    0.7
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self { lambda: default_lambda() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalDecayConfig {
    #[serde(default = "default_half_life")]
    pub half_life_days: f64,
}

fn default_half_life() -> f64 {
    30.0
}

impl Default for TemporalDecayConfig {
    fn default() -> Self {
        Self { half_life_days: default_half_life() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mmr: MmrConfig,
    #[serde(default)]
    pub temporal_decay: TemporalDecayConfig,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

fn default_embedding_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mmr: MmrConfig::default(),
            temporal_decay: TemporalDecayConfig::default(),
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBudgetConfig {
    #[serde(default = "default_soul_max")]
    pub soul_max: usize,
    #[serde(default = "default_total_max")]
    pub total_max: usize,
}

fn default_soul_max() -> usize {
    4096
}
fn default_total_max() -> usize {
    32 * 1024
}

impl Default for PromptBudgetConfig {
    fn default() -> Self {
        Self { soul_max: default_soul_max(), total_max: default_total_max() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationFormat {
    Bracket,
    Footnote,
    Inline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_citation_format")]
    pub format: CitationFormat,
}

fn default_citation_format() -> CitationFormat {
    CitationFormat::Bracket
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self { enabled: false, format: default_citation_format() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectionConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WritingStyleConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_tool_profile")]
    pub default_profile: ToolProfile,
    #[serde(default)]
    pub builtin: HashMap<String, bool>,
}

impl Default for ToolProfile {
    fn default() -> Self {
        ToolProfile::Standard
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_per_min")]
    pub max_per_min: u32,
}

fn default_true() -> bool {
    true
}
fn default_max_per_min() -> u32 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { enabled: true, max_per_min: default_max_per_min() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardAuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthServiceConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub services: HashMap<String, OAuthServiceConfig>,
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub redirect_base: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_permission_mode")]
    pub default_permission_mode: String,
    #[serde(default)]
    pub roles: HashMap<String, RoleConfig>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub smart_dispatch: SmartDispatchConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub prompt_budget: PromptBudgetConfig,
    #[serde(default)]
    pub reflection: ReflectionConfig,
    #[serde(default)]
    pub citation: CitationConfig,
    #[serde(default)]
    pub writing_style: WritingStyleConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub dashboard_auth: DashboardAuthConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    #[serde(default = "default_daily_budget_usd")]
    pub daily_budget_usd: f64,
    /// Registered external commands a workflow `skill` step may invoke by
    /// name (§4.8) — the step's `command` field is looked up here rather
    /// than run directly, so a workflow definition can't shell out to
    /// anything the operator hasn't explicitly allow-listed.
    #[serde(default)]
    pub skills: HashMap<String, SkillConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

pub fn default_listen_addr() -> String {
    "127.0.0.1:8787".into()
}
pub fn default_timeout_secs() -> u64 {
    120
}
pub fn default_permission_mode() -> String {
    "suggest".into()
}
pub fn default_max_concurrent_runs() -> usize {
    4
}
pub fn default_daily_budget_usd() -> f64 {
    0.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            listen_addr: default_listen_addr(),
            default_provider: None,
            default_model: None,
            default_timeout_secs: default_timeout_secs(),
            default_permission_mode: default_permission_mode(),
            roles: HashMap::new(),
            providers: vec![],
            smart_dispatch: SmartDispatchConfig::default(),
            embedding: EmbeddingConfig::default(),
            prompt_budget: PromptBudgetConfig::default(),
            reflection: ReflectionConfig::default(),
            citation: CitationConfig::default(),
            writing_style: WritingStyleConfig::default(),
            tools: ToolsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            allowed_ips: vec![],
            dashboard_auth: DashboardAuthConfig::default(),
            oauth: OAuthConfig::default(),
            tls: None,
            max_concurrent_runs: default_max_concurrent_runs(),
            daily_budget_usd: default_daily_budget_usd(),
            skills: HashMap::new(),
        }
    }
}
