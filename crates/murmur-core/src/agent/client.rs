//! ============================================================================
//! HTTP Agent Client - OpenAI-style chat completions with tools
//! ============================================================================
//! Sends the conversation plus this turn's context to the provider and
//! hands the body to the resilient parser. Timeouts live on the reqwest
//! client and surface as `AgentError::Transport`.
//! ============================================================================

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::parse::interpret_response;
use super::prompt::{format_user_content, system_prompt, tool_schemas};
use super::{AgentError, AgentRequest, AgentResponse, AgentService};
use crate::conversation::Conversation;

/// Default chat completions endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.ppq.ai/chat/completions";

/// Default model for entry management
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.6";

/// Agent connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub endpoint: String,
    pub model: String,
    /// Bearer token, never logged
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
            timeout_secs: 60,
            max_tokens: 4096,
        }
    }
}

/// Agent client over HTTP
pub struct HttpAgentClient {
    client: reqwest::Client,
    config: AgentConfig,
}

impl HttpAgentClient {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        if config.api_key.trim().is_empty() {
            return Err(AgentError::NotConfigured("missing API key".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request_body(&self, messages: &impl Serialize) -> Value {
        json!({
            "model": self.config.model,
            "messages": messages,
            "tools": tool_schemas(),
            "tool_choice": "auto",
            "max_tokens": self.config.max_tokens,
        })
    }
}

#[async_trait]
impl AgentService for HttpAgentClient {
    async fn send(
        &self,
        conversation: &mut Conversation,
        request: AgentRequest<'_>,
    ) -> Result<AgentResponse, AgentError> {
        let user_content = format_user_content(request.input, request.entries, request.memory);
        let messages = conversation.request_messages(&user_content, || system_prompt(&Local::now()));
        let body = self.request_body(&messages);

        debug!(
            "Calling agent {} with {} messages, {} context entries",
            self.config.model,
            messages.len(),
            request.entries.len()
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AgentError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        debug!("Agent responded with {} bytes", text.len());

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| AgentError::MalformedResponse(format!("invalid JSON body: {}", e)))?;
        let (assistant, parsed) = interpret_response(&value)?;

        conversation.record_turn(messages, assistant);

        info!(
            "Agent turn: {} actions, {} parse failures, {} tokens",
            parsed.actions.len(),
            parsed.parse_failures.len(),
            parsed.usage.total_tokens()
        );
        Ok(parsed)
    }
}
