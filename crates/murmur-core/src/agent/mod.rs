//! ============================================================================
//! Agent Module - Tool-calling LLM client for entry management
//! ============================================================================
//! - prompt: system prompt, tool schema, per-turn context formatting
//! - parse: resilient decoding of provider responses into typed actions
//! - client: HTTP chat-completions client implementing `AgentService`
//! ============================================================================

mod client;
mod parse;
mod prompt;

pub use client::{AgentConfig, HttpAgentClient};
pub use parse::{interpret_response, parse_tool_calls, parse_usage, summarize_actions, ParsedToolCalls};
pub use prompt::{
    format_user_content, system_prompt, temporal_context, tool_schemas, TOOL_ARCHIVE,
    TOOL_COMPLETE, TOOL_CONFIRM, TOOL_CREATE, TOOL_MEMORY, TOOL_UPDATE,
};

use async_trait::async_trait;
use std::ops::Range;
use thiserror::Error;

use crate::conversation::Conversation;
use crate::credits::TokenUsage;
use crate::types::{AgentContextEntry, EntryCategory, EntryStatus, HabitCadence};

// ============================================================================
// Actions
// ============================================================================

/// A mutation (or request) proposed by the agent
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    Create(CreateAction),
    Update(UpdateAction),
    Complete(TargetedAction),
    Archive(TargetedAction),
    ConfirmationRequest { message: String },
    MemoryUpdate { text: String },
}

impl AgentAction {
    /// Short id targeted by a mutation action
    pub fn target_id(&self) -> Option<&str> {
        match self {
            AgentAction::Update(u) => Some(&u.id),
            AgentAction::Complete(t) | AgentAction::Archive(t) => Some(&t.id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateAction {
    pub content: String,
    pub category: EntryCategory,
    pub source_text: String,
    pub summary: String,
    pub priority: Option<i32>,
    pub due_date_description: Option<String>,
    pub cadence: Option<HabitCadence>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAction {
    pub id: String,
    pub fields: UpdateFields,
    pub reason: String,
}

/// Sparse patch: `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateFields {
    pub content: Option<String>,
    pub summary: Option<String>,
    pub category: Option<EntryCategory>,
    pub priority: Option<i32>,
    pub due_date_description: Option<String>,
    pub cadence: Option<HabitCadence>,
    pub status: Option<EntryStatus>,
    /// Natural-language phrase, only meaningful with `status: snoozed`
    pub snooze_until: Option<String>,
}

impl UpdateFields {
    pub fn is_empty(&self) -> bool {
        *self == UpdateFields::default()
    }
}

/// Complete/archive payload
#[derive(Debug, Clone, PartialEq)]
pub struct TargetedAction {
    pub id: String,
    pub reason: String,
}

// ============================================================================
// Response
// ============================================================================

/// Actions produced by one provider tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallGroup {
    pub tool_call_id: String,
    pub tool_name: String,
    pub action_range: Range<usize>,
}

/// A tool call whose arguments could not be decoded
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    pub tool_call_id: Option<String>,
    pub tool_name: String,
    pub error_description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub actions: Vec<AgentAction>,
    pub tool_call_groups: Vec<ToolCallGroup>,
    pub parse_failures: Vec<ParseFailure>,
    pub usage: TokenUsage,
    /// Plain assistant text, if the model said anything
    pub text: Option<String>,
    /// Assistant text, or a count summary of the actions
    pub summary: String,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Agent API error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed agent response: {0}")]
    MalformedResponse(String),

    #[error("Agent returned no actionable output")]
    NoActionableOutput,

    #[error("Agent is not configured: {0}")]
    NotConfigured(String),
}

impl AgentError {
    /// Network, timeout or non-2xx failures
    pub fn is_transport(&self) -> bool {
        matches!(self, AgentError::Transport(_) | AgentError::Http { .. })
    }
}

/// Per-turn input to the agent
#[derive(Debug, Clone, Copy)]
pub struct AgentRequest<'a> {
    pub input: &'a str,
    pub entries: &'a [AgentContextEntry],
    pub memory: Option<&'a str>,
}

/// Sends one turn to the agent. On success the conversation has been
/// extended with the request, the assistant message and placeholder tool
/// results; on failure it is left untouched.
#[async_trait]
pub trait AgentService: Send + Sync {
    async fn send(
        &self,
        conversation: &mut Conversation,
        request: AgentRequest<'_>,
    ) -> Result<AgentResponse, AgentError>;
}
