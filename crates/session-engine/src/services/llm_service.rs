use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::models::{ConversationMessage, MessageRole};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// What the actor generator receives for one turn
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Persona, behavioral directives and context summary
    pub system_directive: String,
    /// Bounded recent history, oldest first
    pub history: Vec<ConversationMessage>,
    pub user_turn: String,
}

impl GenerationRequest {
    /// Chat-completion messages: system, then history, then the new turn.
    /// The participant speaks as `user`, the simulated actor as `assistant`.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if !self.system_directive.is_empty() {
            messages.push(ChatMessage::system(&self.system_directive));
        }
        messages.extend(self.history.iter().map(|m| match m.role {
            MessageRole::Participant => ChatMessage::user(&m.content),
            MessageRole::Actor => ChatMessage::assistant(&m.content),
        }));
        messages.push(ChatMessage::user(&self.user_turn));
        messages
    }
}

/// Opaque text-generation backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completion endpoint
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_chat(&self, messages: Vec<ChatMessage>) -> Result<String> {
        debug!("Starting chat generation with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(self.completions_url())
            .json(&request)
            .send()
            .await
            .context("Failed to call LLM API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("LLM API error: {} - {}", status, body));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("No choices returned from LLM"))?;

        let content = content.trim();
        if content.is_empty() {
            return Err(anyhow!("LLM returned an empty reply"));
        }
        Ok(content.to_string())
    }
}

#[async_trait]
impl GenerationProvider for LlmService {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.generate_chat(request.to_messages()).await
    }
}
