//! ============================================================================
//! Response Parsing - Provider JSON to typed agent actions
//! ============================================================================
//! Every tool call is decoded on its own. A call whose arguments don't decode
//! becomes a `ParseFailure` tied to its id; its siblings are unaffected.
//! Field-level decoding is lenient: unknown categories become `note`, unknown
//! cadences are dropped, priorities are clamped.
//! ============================================================================

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use super::prompt::{TOOL_ARCHIVE, TOOL_COMPLETE, TOOL_CONFIRM, TOOL_CREATE, TOOL_MEMORY, TOOL_UPDATE};
use super::{
    AgentAction, AgentError, AgentResponse, CreateAction, ParseFailure, TargetedAction,
    ToolCallGroup, UpdateAction, UpdateFields,
};
use crate::conversation::WireMessage;
use crate::credits::TokenUsage;
use crate::types::{clamp_priority, EntryCategory, EntryStatus, HabitCadence};

const DEFAULT_REASON: &str = "No reason provided";

/// Characters of `content` used when the agent omits a summary
const SUMMARY_FALLBACK_CHARS: usize = 50;

// ============================================================================
// Wire argument shapes
// ============================================================================

#[derive(Deserialize)]
struct CreateArgs {
    entries: Vec<CreateEntryArgs>,
}

#[derive(Deserialize)]
struct CreateEntryArgs {
    content: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    source_text: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default, deserialize_with = "lenient_priority")]
    priority: Option<i32>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    cadence: Option<String>,
}

#[derive(Deserialize)]
struct UpdateArgs {
    updates: Vec<UpdateEntryArgs>,
}

#[derive(Deserialize)]
struct UpdateEntryArgs {
    id: String,
    #[serde(default)]
    fields: UpdateFieldArgs,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct UpdateFieldArgs {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, deserialize_with = "lenient_priority")]
    priority: Option<i32>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    cadence: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    snooze_until: Option<String>,
}

#[derive(Deserialize)]
struct TargetedArgs {
    entries: Vec<TargetedEntryArgs>,
}

#[derive(Deserialize)]
struct TargetedEntryArgs {
    id: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct MemoryArgs {
    memory: String,
}

#[derive(Deserialize)]
struct ConfirmArgs {
    message: String,
}

/// Accepts integers, floats and numeric strings; anything else is absent
fn lenient_priority<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let number = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        _ => None,
    };
    Ok(number.map(clamp_priority))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn reason_or_default(reason: Option<String>) -> String {
    non_empty(reason).unwrap_or_else(|| DEFAULT_REASON.to_string())
}

// ============================================================================
// Tool call decoding
// ============================================================================

/// Decoded tool calls of one assistant message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedToolCalls {
    pub actions: Vec<AgentAction>,
    pub groups: Vec<ToolCallGroup>,
    pub failures: Vec<ParseFailure>,
}

/// Arguments arrive as a JSON-encoded string; some providers send the
/// object directly.
fn normalize_arguments(raw: Option<&Value>) -> Result<Value, String> {
    match raw {
        None | Some(Value::Null) => Ok(Value::Object(Default::default())),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Value::Object(Default::default())),
        Some(Value::String(s)) => {
            serde_json::from_str(s).map_err(|e| format!("invalid JSON arguments: {}", e))
        }
        Some(v @ Value::Object(_)) => Ok(v.clone()),
        Some(other) => Err(format!("unexpected arguments type: {}", other)),
    }
}

fn decode<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| e.to_string())
}

fn decode_tool_call(name: &str, raw_arguments: Option<&Value>) -> Result<Vec<AgentAction>, String> {
    let args = normalize_arguments(raw_arguments)?;

    let actions = match name {
        TOOL_CREATE => decode::<CreateArgs>(args)?
            .entries
            .into_iter()
            .map(|e| {
                let content = e.content.trim().to_string();
                let summary = non_empty(e.summary)
                    .unwrap_or_else(|| content.chars().take(SUMMARY_FALLBACK_CHARS).collect());
                AgentAction::Create(CreateAction {
                    category: e
                        .category
                        .as_deref()
                        .map(EntryCategory::from_agent)
                        .unwrap_or(EntryCategory::Note),
                    source_text: e.source_text.unwrap_or_default(),
                    summary,
                    priority: e.priority,
                    due_date_description: non_empty(e.due_date),
                    cadence: e.cadence.as_deref().and_then(HabitCadence::parse),
                    content,
                })
            })
            .collect(),
        TOOL_UPDATE => decode::<UpdateArgs>(args)?
            .updates
            .into_iter()
            .map(|u| {
                let f = u.fields;
                AgentAction::Update(UpdateAction {
                    id: u.id,
                    fields: UpdateFields {
                        content: non_empty(f.content),
                        summary: non_empty(f.summary),
                        category: f.category.as_deref().and_then(EntryCategory::parse),
                        priority: f.priority,
                        due_date_description: non_empty(f.due_date),
                        cadence: f.cadence.as_deref().and_then(HabitCadence::parse),
                        status: f.status.as_deref().and_then(EntryStatus::parse),
                        snooze_until: non_empty(f.snooze_until),
                    },
                    reason: reason_or_default(u.reason),
                })
            })
            .collect(),
        TOOL_COMPLETE | TOOL_ARCHIVE => {
            let archive = name == TOOL_ARCHIVE;
            decode::<TargetedArgs>(args)?
                .entries
                .into_iter()
                .map(|t| {
                    let target = TargetedAction {
                        id: t.id,
                        reason: reason_or_default(t.reason),
                    };
                    if archive {
                        AgentAction::Archive(target)
                    } else {
                        AgentAction::Complete(target)
                    }
                })
                .collect()
        }
        TOOL_MEMORY => vec![AgentAction::MemoryUpdate {
            text: decode::<MemoryArgs>(args)?.memory.trim().to_string(),
        }],
        TOOL_CONFIRM => vec![AgentAction::ConfirmationRequest {
            message: decode::<ConfirmArgs>(args)?.message,
        }],
        other => return Err(format!("unknown tool '{}'", other)),
    };

    Ok(actions)
}

/// Decode the raw `tool_calls` array of an assistant message
pub fn parse_tool_calls(tool_calls: &[Value]) -> ParsedToolCalls {
    let mut parsed = ParsedToolCalls::default();

    for call in tool_calls {
        let id = call.get("id").and_then(Value::as_str).map(str::to_string);
        let Some(name) = call.pointer("/function/name").and_then(Value::as_str) else {
            warn!("Tool call {:?} has no function name", id);
            parsed.failures.push(ParseFailure {
                tool_call_id: id,
                tool_name: "unknown".to_string(),
                error_description: "missing function name".to_string(),
            });
            continue;
        };

        match decode_tool_call(name, call.pointer("/function/arguments")) {
            Ok(actions) => {
                let start = parsed.actions.len();
                parsed.actions.extend(actions);
                debug!("Tool call {} produced {} actions", name, parsed.actions.len() - start);
                if let Some(id) = id {
                    parsed.groups.push(ToolCallGroup {
                        tool_call_id: id,
                        tool_name: name.to_string(),
                        action_range: start..parsed.actions.len(),
                    });
                }
            }
            Err(error) => {
                warn!("Failed to parse {} tool call {:?}: {}", name, id, error);
                parsed.failures.push(ParseFailure {
                    tool_call_id: id,
                    tool_name: name.to_string(),
                    error_description: error,
                });
            }
        }
    }

    parsed
}

/// Token usage in either OpenAI or Anthropic naming; absent usage is zero
pub fn parse_usage(body: &Value) -> TokenUsage {
    let Some(usage) = body.get("usage") else {
        return TokenUsage::default();
    };
    let field = |primary: &str, fallback: &str| {
        usage
            .get(primary)
            .or_else(|| usage.get(fallback))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    TokenUsage::new(
        field("prompt_tokens", "input_tokens"),
        field("completion_tokens", "output_tokens"),
    )
}

/// "created 2, completed 1", or "No actions"
pub fn summarize_actions(actions: &[AgentAction]) -> String {
    let mut counts = [0usize; 6];
    for action in actions {
        let slot = match action {
            AgentAction::Create(_) => 0,
            AgentAction::Update(_) => 1,
            AgentAction::Complete(_) => 2,
            AgentAction::Archive(_) => 3,
            AgentAction::MemoryUpdate { .. } => 4,
            AgentAction::ConfirmationRequest { .. } => 5,
        };
        counts[slot] += 1;
    }

    let labels = ["created", "updated", "completed", "archived", "memory updated", "confirmations"];
    let parts: Vec<String> = labels
        .iter()
        .zip(counts)
        .filter(|(_, n)| *n > 0)
        .map(|(label, n)| format!("{} {}", label, n))
        .collect();

    if parts.is_empty() {
        "No actions".to_string()
    } else {
        parts.join(", ")
    }
}

/// Split a chat-completions body into the assistant message (kept verbatim
/// for the conversation) and the typed response.
pub fn interpret_response(body: &Value) -> Result<(WireMessage, AgentResponse), AgentError> {
    let mut message = body
        .pointer("/choices/0/message")
        .cloned()
        .ok_or_else(|| AgentError::MalformedResponse("missing choices[0].message".into()))?;

    if let Value::Object(map) = &mut message {
        map.entry("role").or_insert_with(|| Value::from("assistant"));
    }
    let assistant = WireMessage::from_value(message)
        .map_err(|e| AgentError::MalformedResponse(e.to_string()))?;

    let text = assistant
        .content()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let tool_calls = assistant.tool_calls();
    if tool_calls.is_empty() && text.is_none() {
        return Err(AgentError::NoActionableOutput);
    }

    let parsed = parse_tool_calls(tool_calls);
    let summary = text
        .clone()
        .unwrap_or_else(|| summarize_actions(&parsed.actions));

    let response = AgentResponse {
        actions: parsed.actions,
        tool_call_groups: parsed.groups,
        parse_failures: parsed.failures,
        usage: parse_usage(body),
        text,
        summary,
    };
    Ok((assistant, response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str, arguments: Value) -> Value {
        json!({
            "id": id,
            "type": "function",
            "function": { "name": name, "arguments": arguments.to_string() }
        })
    }

    fn raw_call(id: &str, name: &str, arguments: &str) -> Value {
        json!({
            "id": id,
            "type": "function",
            "function": { "name": name, "arguments": arguments }
        })
    }

    fn body(tool_calls: Vec<Value>, content: Value) -> Value {
        json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": content,
                    "tool_calls": tool_calls
                }
            }],
            "usage": { "prompt_tokens": 1200, "completion_tokens": 80 }
        })
    }

    #[test]
    fn test_malformed_call_is_isolated() {
        let calls = vec![
            call("c1", TOOL_CREATE, json!({ "entries": [{ "content": "Buy milk", "category": "todo" }] })),
            raw_call("c2", TOOL_CREATE, "{\"entries\": [{\"content\": "),
            call("c3", TOOL_COMPLETE, json!({ "entries": [{ "id": "abc123", "reason": "done" }] })),
            call("c4", TOOL_CREATE, json!({ "entries": [
                { "content": "Call mom", "category": "reminder" },
                { "content": "Dentist", "category": "todo" }
            ] })),
        ];

        let parsed = parse_tool_calls(&calls);
        assert_eq!(parsed.failures.len(), 1);
        assert_eq!(parsed.failures[0].tool_call_id.as_deref(), Some("c2"));
        assert_eq!(parsed.failures[0].tool_name, TOOL_CREATE);
        assert_eq!(parsed.actions.len(), 4);

        let ranges: Vec<_> = parsed
            .groups
            .iter()
            .map(|g| (g.tool_call_id.as_str(), g.action_range.clone()))
            .collect();
        assert_eq!(ranges, vec![("c1", 0..1), ("c3", 1..2), ("c4", 2..4)]);
    }

    #[test]
    fn test_lenient_entry_fields() {
        let calls = vec![call(
            "c1",
            TOOL_CREATE,
            json!({ "entries": [
                { "content": "Groceries", "category": "shopping", "priority": 0, "cadence": "hourly" },
                { "content": "Taxes", "category": "TODO", "priority": 99 },
                { "content": "Run", "category": "habit", "priority": "2.6", "cadence": "daily" },
                { "content": "Blank", "priority": "soon" }
            ] }),
        )];

        let parsed = parse_tool_calls(&calls);
        let creates: Vec<&CreateAction> = parsed
            .actions
            .iter()
            .map(|a| match a {
                AgentAction::Create(c) => c,
                other => panic!("unexpected {:?}", other),
            })
            .collect();

        assert_eq!(creates[0].category, EntryCategory::Note);
        assert_eq!(creates[0].priority, Some(1));
        assert_eq!(creates[0].cadence, None);
        assert_eq!(creates[1].category, EntryCategory::Todo);
        assert_eq!(creates[1].priority, Some(5));
        assert_eq!(creates[2].priority, Some(3));
        assert_eq!(creates[2].cadence, Some(HabitCadence::Daily));
        assert_eq!(creates[3].priority, None);
        assert_eq!(creates[3].category, EntryCategory::Note);
        assert_eq!(creates[3].summary, "Blank");
    }

    #[test]
    fn test_update_and_targeted_defaults() {
        let calls = vec![
            call("u1", TOOL_UPDATE, json!({ "updates": [{
                "id": "abc123",
                "fields": { "status": "snoozed", "snooze_until": "tomorrow", "category": "bogus" }
            }] })),
            call("a1", TOOL_ARCHIVE, json!({ "entries": [{ "id": "def456" }] })),
        ];

        let parsed = parse_tool_calls(&calls);
        assert!(parsed.failures.is_empty());
        match &parsed.actions[0] {
            AgentAction::Update(u) => {
                assert_eq!(u.reason, DEFAULT_REASON);
                assert_eq!(u.fields.status, Some(EntryStatus::Snoozed));
                assert_eq!(u.fields.snooze_until.as_deref(), Some("tomorrow"));
                assert_eq!(u.fields.category, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            parsed.actions[1],
            AgentAction::Archive(TargetedAction {
                id: "def456".into(),
                reason: DEFAULT_REASON.into()
            })
        );
    }

    #[test]
    fn test_object_arguments_and_unknown_tools() {
        let calls = vec![
            json!({
                "id": "m1",
                "function": { "name": TOOL_MEMORY, "arguments": { "memory": " Works nights " } }
            }),
            call("x1", "delete_everything", json!({})),
            json!({ "function": { "name": TOOL_CONFIRM, "arguments": "{\"message\":\"Archive all?\"}" } }),
        ];

        let parsed = parse_tool_calls(&calls);
        assert_eq!(
            parsed.actions,
            vec![
                AgentAction::MemoryUpdate { text: "Works nights".into() },
                AgentAction::ConfirmationRequest { message: "Archive all?".into() },
            ]
        );
        // The id-less confirmation produces actions but no group
        assert_eq!(parsed.groups.len(), 1);
        assert_eq!(parsed.failures.len(), 1);
        assert!(parsed.failures[0].error_description.contains("unknown tool"));
    }

    #[test]
    fn test_interpret_response() {
        let b = body(
            vec![call("c1", TOOL_CREATE, json!({ "entries": [{ "content": "Buy milk", "category": "todo" }] }))],
            Value::Null,
        );
        let (assistant, response) = interpret_response(&b).unwrap();
        assert_eq!(assistant.tool_calls().len(), 1);
        assert_eq!(response.usage, TokenUsage::new(1200, 80));
        assert_eq!(response.text, None);
        assert_eq!(response.summary, "created 1");
    }

    #[test]
    fn test_text_only_response() {
        let b = body(vec![], json!("  Nothing to file here. "));
        let (_, response) = interpret_response(&b).unwrap();
        assert!(response.actions.is_empty());
        assert_eq!(response.summary, "Nothing to file here.");
    }

    #[test]
    fn test_no_actionable_output() {
        let b = body(vec![], json!("   "));
        assert!(matches!(interpret_response(&b), Err(AgentError::NoActionableOutput)));

        let missing = json!({ "choices": [] });
        assert!(matches!(
            interpret_response(&missing),
            Err(AgentError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_usage_alternate_names() {
        let b = json!({ "usage": { "input_tokens": 10, "output_tokens": 3 } });
        assert_eq!(parse_usage(&b), TokenUsage::new(10, 3));
        assert_eq!(parse_usage(&json!({})), TokenUsage::default());
    }

    #[test]
    fn test_summarize_actions() {
        let actions = vec![
            AgentAction::Create(CreateAction {
                content: "a".into(),
                category: EntryCategory::Todo,
                source_text: String::new(),
                summary: "a".into(),
                priority: None,
                due_date_description: None,
                cadence: None,
            }),
            AgentAction::Complete(TargetedAction { id: "x".into(), reason: "r".into() }),
            AgentAction::Complete(TargetedAction { id: "y".into(), reason: "r".into() }),
        ];
        assert_eq!(summarize_actions(&actions), "created 1, completed 2");
        assert_eq!(summarize_actions(&[]), "No actions");
    }
}
