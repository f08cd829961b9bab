pub mod anthropic;
pub mod google;
pub mod http;
pub mod messages;
pub mod openai;
pub mod subprocess;

use std::sync::Arc;

use crate::atoms::error::{TetoraError, TetoraResult};
use crate::atoms::types::{ProviderConfig, ProviderKind};
use crate::server::Server;

use anthropic::AnthropicProvider;
use google::GoogleProvider;
use messages::{Message, StreamChunk, ToolDefinition};
use openai::OpenAiProvider;
use subprocess::SubprocessProvider;

/// Runtime handle to a configured provider, dispatching to the concrete
/// HTTP adapter or the subprocess adapter. Mirrors the teacher's
/// `AnyProvider` factory enum (§4.3's Execute contract).
pub enum AnyProvider {
    OpenAi(OpenAiProvider),
    Anthropic(AnthropicProvider),
    Google(GoogleProvider),
    Subprocess(SubprocessProvider),
}

impl AnyProvider {
    pub fn from_config(http_client: reqwest::Client, config: &ProviderConfig) -> Self {
        match config.kind {
            ProviderKind::OpenAI
            | ProviderKind::OpenRouter
            | ProviderKind::Ollama
            | ProviderKind::DeepSeek
            | ProviderKind::Grok
            | ProviderKind::Mistral
            | ProviderKind::Moonshot
            | ProviderKind::Custom => AnyProvider::OpenAi(OpenAiProvider::new(http_client, config)),
            ProviderKind::Anthropic => AnyProvider::Anthropic(AnthropicProvider::new(http_client, config)),
            ProviderKind::Google => AnyProvider::Google(GoogleProvider::new(http_client, config)),
            ProviderKind::ClaudeCode => AnyProvider::Subprocess(SubprocessProvider::new(config.id.clone(), vec![], None)),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            AnyProvider::OpenAi(_) => ProviderKind::OpenAI,
            AnyProvider::Anthropic(_) => ProviderKind::Anthropic,
            AnyProvider::Google(_) => ProviderKind::Google,
            AnyProvider::Subprocess(_) => ProviderKind::ClaudeCode,
        }
    }

    pub fn is_subprocess(&self) -> bool {
        matches!(self, AnyProvider::Subprocess(_))
    }
}

/// Single chat round-trip against a provider: formats messages/tools,
/// performs the HTTP call (or subprocess run) with retry/circuit-breaker
/// protection, and returns accumulated stream chunks (§4.3).
pub async fn execute(
    server: &Arc<Server>,
    provider: &AnyProvider,
    provider_id: &str,
    messages: &[Message],
    tools: &[ToolDefinition],
    model: &str,
    temperature: Option<f64>,
    timeout_secs: u64,
) -> TetoraResult<Vec<StreamChunk>> {
    let circuit_breaker = server.circuit_breaker_for(provider_id);

    let result = match provider {
        AnyProvider::OpenAi(p) => p.chat_stream(messages, tools, model, temperature, &circuit_breaker, &server.audit_log).await,
        AnyProvider::Anthropic(p) => p.chat_stream(messages, tools, model, temperature, &circuit_breaker, &server.audit_log).await,
        AnyProvider::Google(p) => p.chat_stream(messages, tools, model, temperature, &circuit_breaker, &server.audit_log).await,
        AnyProvider::Subprocess(p) => {
            let soul = messages.iter().find(|m| m.role == messages::Role::System).map(|m| m.content.as_text()).unwrap_or_default();
            let prompt = SubprocessProvider::flatten_prompt(&soul, messages);
            p.run(&prompt, model, timeout_secs, &circuit_breaker, &server.audit_log).await
        }
    };

    result.map_err(|message| TetoraError::provider(provider_id, message, true))
}
