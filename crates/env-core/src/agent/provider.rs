//! Provider dispatch for the LLM arena.
//!
//! All supported backends speak the OpenAI chat-completions dialect; they
//! differ only in base URL, credential env var, and how far their structured
//! output support goes. One client serves all of them, selected by
//! configuration.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema;

const CHAT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Grok,
    Gemini,
    Local,
}

impl ProviderKind {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Grok => "https://api.x.ai/v1",
            // Google AI Studio's OpenAI-compatible endpoint.
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            ProviderKind::Local => "http://localhost:1234/v1",
        }
    }

    pub fn default_api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Grok => Some("XAI_API_KEY"),
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::Local => None,
        }
    }

    /// `response_format` payload. OpenAI and most local servers accept a full
    /// JSON schema; Grok and Gemini only take `json_object` mode.
    pub fn response_format(&self) -> Value {
        match self {
            ProviderKind::OpenAi | ProviderKind::Local => serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "game_actions",
                    "schema": schema::actions_list_schema()
                }
            }),
            ProviderKind::Grok | ProviderKind::Gemini => {
                serde_json::json!({"type": "json_object"})
            }
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    800
}

/// Static per-player configuration, loaded once per match and immutable
/// afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub player_id: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub strategy_hint: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AgentConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("player{}", self.player_id))
    }

    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Inline key, then the configured env var, then the provider's default
    /// env var. Local endpoints fall back to a placeholder key.
    pub fn resolve_api_key(&self) -> anyhow::Result<String> {
        if let Some(key) = self.api_key.as_deref()
            && !key.trim().is_empty()
        {
            return Ok(key.to_string());
        }

        let env_name = self
            .api_key_env
            .clone()
            .or_else(|| self.provider.default_api_key_env().map(String::from));

        match env_name {
            Some(name) => std::env::var(&name)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .with_context(|| format!("api key not found: set {name}")),
            None => Ok("not-needed".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Boundary the match runner uses to obtain a raw model response for a
/// prompt. [`ChatClient`] implements it against live providers; tests queue
/// canned responses.
pub trait ChatModel: Send + Sync {
    fn complete<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
    response_format: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct ChatClient {
    provider: ProviderKind,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_output_tokens: u32,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn from_agent(cfg: &AgentConfig) -> anyhow::Result<Self> {
        Ok(Self {
            provider: cfg.provider,
            base_url: cfg.resolved_base_url(),
            api_key: cfg
                .resolve_api_key()
                .with_context(|| format!("agent {}", cfg.display_name()))?,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_output_tokens: cfg.max_output_tokens,
            http: reqwest::Client::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: &messages,
            temperature: self.temperature,
            max_tokens: self.max_output_tokens,
            response_format: self.provider.response_format(),
        };

        let resp: ChatResponse = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .timeout(CHAT_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("chat request to {url} failed"))?
            .error_for_status()
            .context("chat endpoint returned non-2xx")?
            .json()
            .await
            .context("chat response decode failed")?;

        let choice = resp
            .choices
            .into_iter()
            .next()
            .context("chat response has no choices")?;

        if choice.finish_reason.as_deref() == Some("length") {
            tracing::warn!(
                model = %self.model,
                max_tokens = self.max_output_tokens,
                "llm.response_truncated"
            );
        }

        choice.message.content.context("chat response missing content")
    }
}

impl ChatModel for ChatClient {
    fn complete<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move { self.chat(messages).await })
    }
}
