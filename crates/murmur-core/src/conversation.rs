//! ============================================================================
//! Conversation - Provider message history for multi-turn agent sessions
//! ============================================================================
//! Messages stay semi-opaque JSON objects so assistant messages (tool calls,
//! reasoning metadata, fields we don't know about) round-trip to the provider
//! untouched. Construction and the handful of fields the core reads go
//! through `WireMessage`.
//! ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Default number of messages kept by `truncate`, including the system prompt
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Message has missing or unknown role")]
    InvalidRole,

    #[error("Tool message is missing tool_call_id")]
    MissingToolCallId,
}

/// One provider message: role, content and passthrough metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireMessage(Map<String, Value>);

impl WireMessage {
    fn with_content(role: Role, content: &str) -> Self {
        let mut map = Map::new();
        map.insert("role".into(), json!(role.as_str()));
        map.insert("content".into(), json!(content));
        Self(map)
    }

    pub fn system(content: &str) -> Self {
        Self::with_content(Role::System, content)
    }

    pub fn user(content: &str) -> Self {
        Self::with_content(Role::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::with_content(Role::Assistant, content)
    }

    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        let mut message = Self::with_content(Role::Tool, content);
        message.0.insert("tool_call_id".into(), json!(tool_call_id));
        message
    }

    /// Wrap a message received from the provider, keeping every field
    pub fn from_value(value: Value) -> Result<Self, WireError> {
        let Value::Object(map) = value else {
            return Err(WireError::NotAnObject);
        };
        let role = map
            .get("role")
            .and_then(Value::as_str)
            .and_then(Role::parse)
            .ok_or(WireError::InvalidRole)?;
        if role == Role::Tool && map.get("tool_call_id").and_then(Value::as_str).is_none() {
            return Err(WireError::MissingToolCallId);
        }
        Ok(Self(map))
    }

    pub fn role(&self) -> Option<Role> {
        self.0.get("role").and_then(Value::as_str).and_then(Role::parse)
    }

    pub fn content(&self) -> Option<&str> {
        self.0.get("content").and_then(Value::as_str)
    }

    pub fn set_content(&mut self, content: &str) {
        self.0.insert("content".into(), json!(content));
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.0.get("tool_call_id").and_then(Value::as_str)
    }

    /// Raw `tool_calls` array of an assistant message
    pub fn tool_calls(&self) -> &[Value] {
        self.0
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `(id, function name)` for every tool call that carries an id
    pub fn tool_call_refs(&self) -> Vec<(String, String)> {
        self.tool_calls()
            .iter()
            .filter_map(|call| {
                let id = call.get("id").and_then(Value::as_str)?;
                let name = call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or("tool");
                Some((id.to_string(), name.to_string()))
            })
            .collect()
    }

    pub fn is_role(&self, role: Role) -> bool {
        self.role() == Some(role)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Placeholder result recorded for each tool call until real results arrive
pub fn placeholder_result(tool_name: &str) -> String {
    format!("{} accepted.", tool_name)
}

/// Ordered message history for one logical thread
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<WireMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn messages(&self) -> &[WireMessage] {
        &self.messages
    }

    /// Messages for the next request. An empty history starts with the
    /// system prompt; tool results orphaned by truncation are left out.
    pub fn request_messages(
        &self,
        user_content: &str,
        system_prompt: impl FnOnce() -> String,
    ) -> Vec<WireMessage> {
        let mut request = Vec::with_capacity(self.messages.len() + 2);

        if self.messages.is_empty() {
            request.push(WireMessage::system(&system_prompt()));
        } else {
            let mut leading = true;
            for (idx, message) in self.messages.iter().enumerate() {
                if idx > 0 && leading && message.is_role(Role::Tool) {
                    continue;
                }
                if idx > 0 {
                    leading = false;
                }
                request.push(message.clone());
            }
        }

        request.push(WireMessage::user(user_content));
        request
    }

    /// Record a completed turn: the request as sent, the assistant message,
    /// and one placeholder tool result per tool call.
    pub fn record_turn(&mut self, request: Vec<WireMessage>, assistant: WireMessage) {
        let placeholders: Vec<WireMessage> = assistant
            .tool_call_refs()
            .into_iter()
            .map(|(id, name)| WireMessage::tool_result(&id, &placeholder_result(&name)))
            .collect();

        self.messages = request;
        self.messages.push(assistant);
        self.messages.extend(placeholders);
    }

    /// Swap placeholder contents for real tool results. Only the tool
    /// messages after the latest assistant message are touched, since ids
    /// may repeat across turns. Returns how many messages were updated.
    pub fn replace_tool_results(&mut self, results: &[(String, String)]) -> usize {
        let start = self
            .messages
            .iter()
            .rposition(|m| m.is_role(Role::Assistant))
            .map_or(0, |idx| idx + 1);

        let mut replaced = 0;
        for message in self.messages[start..]
            .iter_mut()
            .filter(|m| m.is_role(Role::Tool))
        {
            let Some(id) = message.tool_call_id().map(str::to_string) else {
                continue;
            };
            if let Some((_, content)) = results.iter().find(|(rid, _)| *rid == id) {
                message.set_content(content);
                replaced += 1;
            }
        }
        replaced
    }

    /// Keep the system message plus the most recent `keep - 1` messages
    pub fn truncate(&mut self, keep: usize) {
        if self.messages.len() <= keep {
            return;
        }
        if keep == 0 {
            self.messages.clear();
            return;
        }

        let has_system = self.messages[0].is_role(Role::System);
        if has_system {
            let tail_start = self.messages.len() - (keep - 1);
            self.messages.drain(1..tail_start);
        } else {
            let start = self.messages.len() - keep;
            self.messages.drain(..start);
        }
    }

    pub fn reset(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant_with_calls(calls: &[(&str, &str)]) -> WireMessage {
        let tool_calls: Vec<Value> = calls
            .iter()
            .map(|(id, name)| {
                json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": "{}" }
                })
            })
            .collect();
        WireMessage::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": tool_calls,
            "reasoning": "kept verbatim"
        }))
        .unwrap()
    }

    fn long_conversation(turns: usize) -> Conversation {
        let mut conversation = Conversation::new();
        for turn in 0..turns {
            let request = conversation.request_messages(&format!("input {}", turn), || {
                "system prompt".to_string()
            });
            conversation.record_turn(request, WireMessage::assistant(&format!("reply {}", turn)));
        }
        conversation
    }

    #[test]
    fn test_first_turn_starts_with_system_prompt() {
        let conversation = Conversation::new();
        let request = conversation.request_messages("buy milk", || "be helpful".into());
        assert_eq!(request.len(), 2);
        assert_eq!(request[0].role(), Some(Role::System));
        assert_eq!(request[0].content(), Some("be helpful"));
        assert_eq!(request[1].content(), Some("buy milk"));
    }

    #[test]
    fn test_record_turn_adds_placeholders() {
        let mut conversation = Conversation::new();
        let request = conversation.request_messages("hi", || "sys".into());
        conversation.record_turn(
            request,
            assistant_with_calls(&[("call_1", "create_entries"), ("call_2", "complete_entries")]),
        );

        let messages = conversation.messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2].to_value()["reasoning"], "kept verbatim");
        assert_eq!(messages[3].tool_call_id(), Some("call_1"));
        assert_eq!(messages[3].content(), Some("create_entries accepted."));
        assert_eq!(messages[4].content(), Some("complete_entries accepted."));
    }

    #[test]
    fn test_replace_tool_results() {
        let mut conversation = Conversation::new();
        let request = conversation.request_messages("hi", || "sys".into());
        conversation.record_turn(request, assistant_with_calls(&[("call_1", "create_entries")]));

        let replaced = conversation.replace_tool_results(&[
            ("call_1".into(), "Created [abc123] 'Buy milk'".into()),
            ("call_unknown".into(), "ignored".into()),
        ]);
        assert_eq!(replaced, 1);
        assert_eq!(
            conversation.messages()[3].content(),
            Some("Created [abc123] 'Buy milk'")
        );
    }

    #[test]
    fn test_replace_leaves_earlier_turns_with_same_id() {
        let mut conversation = Conversation::new();
        let request = conversation.request_messages("buy milk", || "sys".into());
        conversation.record_turn(request, assistant_with_calls(&[("call_0", "create_entries")]));
        conversation.replace_tool_results(&[("call_0".into(), "Created [aaa111] 'Buy milk'".into())]);

        let request = conversation.request_messages("call mom", || "sys".into());
        conversation.record_turn(request, assistant_with_calls(&[("call_0", "create_entries")]));
        let replaced =
            conversation.replace_tool_results(&[("call_0".into(), "Created [bbb222] 'Call mom'".into())]);

        assert_eq!(replaced, 1);
        let results: Vec<&str> = conversation
            .messages()
            .iter()
            .filter(|m| m.is_role(Role::Tool))
            .filter_map(WireMessage::content)
            .collect();
        assert_eq!(
            results,
            vec!["Created [aaa111] 'Buy milk'", "Created [bbb222] 'Call mom'"]
        );
    }

    #[test]
    fn test_truncate_keeps_system_and_recent() {
        for turns in [10, 11, 25, 100] {
            let mut conversation = long_conversation(turns);
            let before: Vec<WireMessage> = conversation.messages().to_vec();
            conversation.truncate(DEFAULT_HISTORY_LIMIT);

            let after = conversation.messages();
            assert_eq!(after.len(), DEFAULT_HISTORY_LIMIT.min(before.len()));
            assert_eq!(after[0].role(), Some(Role::System));
            assert_eq!(after[1..], before[before.len() - (after.len() - 1)..]);
        }
    }

    #[test]
    fn test_truncate_short_history_is_noop() {
        let mut conversation = long_conversation(2);
        let before = conversation.clone();
        conversation.truncate(DEFAULT_HISTORY_LIMIT);
        assert_eq!(conversation, before);
    }

    #[test]
    fn test_request_skips_orphaned_tool_results() {
        let mut conversation = Conversation::new();
        let request = conversation.request_messages("one", || "sys".into());
        conversation.record_turn(
            request,
            assistant_with_calls(&[("a", "create_entries"), ("b", "create_entries")]),
        );
        // [sys, user, assistant, tool a, tool b] -> [sys, tool b]
        conversation.truncate(2);
        assert_eq!(conversation.messages()[1].role(), Some(Role::Tool));

        let request = conversation.request_messages("two", || unreachable!());
        assert_eq!(request.len(), 2);
        assert_eq!(request[0].role(), Some(Role::System));
        assert_eq!(request[1].content(), Some("two"));
    }

    #[test]
    fn test_from_value_validation() {
        assert_eq!(
            WireMessage::from_value(json!("text")),
            Err(WireError::NotAnObject)
        );
        assert_eq!(
            WireMessage::from_value(json!({ "role": "narrator" })),
            Err(WireError::InvalidRole)
        );
        assert_eq!(
            WireMessage::from_value(json!({ "role": "tool", "content": "x" })),
            Err(WireError::MissingToolCallId)
        );
    }
}
