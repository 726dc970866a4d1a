//! ============================================================================
//! Agent Prompt - System prompt, tool schema and turn context
//! ============================================================================

use chrono::{DateTime, Datelike, TimeZone, Timelike, Weekday};
use serde_json::{json, Value};
use std::fmt::Display;

use crate::types::{compare_for_agent, AgentContextEntry, EntryStatus};

pub const TOOL_CREATE: &str = "create_entries";
pub const TOOL_UPDATE: &str = "update_entries";
pub const TOOL_COMPLETE: &str = "complete_entries";
pub const TOOL_ARCHIVE: &str = "archive_entries";
pub const TOOL_MEMORY: &str = "update_memory";
pub const TOOL_CONFIRM: &str = "request_confirmation";

const CATEGORIES: [&str; 8] = [
    "todo", "note", "reminder", "idea", "list", "habit", "question", "thought",
];
const CADENCES: [&str; 4] = ["daily", "weekdays", "weekly", "monthly"];
const STATUSES: [&str; 4] = ["active", "snoozed", "completed", "archived"];

const ENTRY_MANAGER_PROMPT: &str = "\
You are Murmur, an assistant that keeps a user's personal entries in order. \
Input usually comes from speech recognition, so expect misheard words.

Each turn you get the user's current entries (possibly none), optional notes \
you saved about the user earlier, and what the user just said.

Act only through tools:
- create_entries for things that are genuinely new
- update_entries to change an existing entry (snooze with status=snoozed plus snooze_until)
- complete_entries when the user says something is done
- archive_entries when an entry no longer matters
- update_memory to rewrite your notes about the user (full replacement text, keep it short)
- request_confirmation only when an action would be destructive and the intent is unclear

Matching:
- Match loose references (\"that one\", \"the dentist thing\", garbled names) to existing entries.
- Prefer updating or completing an existing entry over creating a near-duplicate.
- Use entry ids exactly as shown in the context.

Writing entries:
- content is short and card-like; summary is ten words or fewer.
- Leave due_date and snooze_until as the user's own phrase (\"tomorrow at 5\").
- Set cadence for habits when it is clear.
- Express urgency through priority (1 highest, 5 lowest), not in the text.
- Every update, completion and archive carries a short reason.

Never ask clarifying questions in plain text. Call several tools in one turn \
when the input covers several things.";

/// "Current: Sunday, October 18, 2026 at 3:04 PM (weekend, afternoon)"
pub fn temporal_context<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    let day_kind = match now.weekday() {
        Weekday::Sat | Weekday::Sun => "weekend",
        _ => "weekday",
    };
    let part = match now.hour() {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=20 => "evening",
        _ => "night",
    };
    format!(
        "Current: {} ({}, {})",
        now.format("%A, %B %-d, %Y at %-I:%M %p"),
        day_kind,
        part
    )
}

/// System message for the first turn of a conversation
pub fn system_prompt<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    format!("{}\n\n{}", temporal_context(now), ENTRY_MANAGER_PROMPT)
}

/// User message content: current entries, memory, then the transcript
pub fn format_user_content(
    input: &str,
    entries: &[AgentContextEntry],
    memory: Option<&str>,
) -> String {
    let mut sorted: Vec<&AgentContextEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| compare_for_agent(a, b));

    let mut lines = vec!["## Current Entries".to_string()];
    if sorted.is_empty() {
        lines.push("(none)".to_string());
    }
    lines.extend(sorted.into_iter().map(format_context_line));

    if let Some(memory) = memory.map(str::trim).filter(|m| !m.is_empty()) {
        lines.push(String::new());
        lines.push("## Agent Memory".to_string());
        lines.push(memory.to_string());
    }

    lines.push(String::new());
    lines.push("## User Transcript".to_string());
    lines.push(input.to_string());
    lines.join("\n")
}

fn format_context_line(entry: &AgentContextEntry) -> String {
    let mut line = format!("- [{}] {}", entry.id, entry.category.as_str().to_uppercase());

    if let Some(priority) = entry.priority {
        line.push_str(&format!(" P{}", priority));
    }

    let summary = collapse_whitespace(&entry.summary);
    if summary.is_empty() {
        line.push_str(" \"(no summary)\"");
    } else {
        line.push_str(&format!(" \"{}\"", summary.replace('"', "'")));
    }

    if let Some(due) = entry.due_date_description.as_deref().map(collapse_whitespace) {
        if !due.is_empty() {
            line.push_str(&format!(" due:{}", due));
        }
    }
    if let Some(cadence) = entry.cadence {
        line.push_str(&format!(" cadence:{}", cadence));
    }
    if entry.status != EntryStatus::Active {
        line.push_str(&format!(" status:{}", entry.status));
    }
    line
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn function(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

fn targeted_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entries": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "reason": { "type": "string" }
                    },
                    "required": ["id", "reason"]
                }
            }
        },
        "required": ["entries"]
    })
}

/// JSON-schema definitions of every tool the agent may call
pub fn tool_schemas() -> Value {
    json!([
        function(
            TOOL_CREATE,
            "Create new entries from the user's input",
            json!({
                "type": "object",
                "properties": {
                    "entries": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "content": { "type": "string", "description": "Cleaned, concise entry text" },
                                "category": { "type": "string", "enum": CATEGORIES },
                                "source_text": { "type": "string", "description": "Transcript span this came from" },
                                "summary": { "type": "string", "description": "Card title, ten words or fewer" },
                                "priority": { "type": "integer", "minimum": 1, "maximum": 5 },
                                "due_date": { "type": "string", "description": "User's own due phrase" },
                                "cadence": { "type": "string", "enum": CADENCES }
                            },
                            "required": ["content", "category", "source_text", "summary"]
                        }
                    }
                },
                "required": ["entries"]
            }),
        ),
        function(
            TOOL_UPDATE,
            "Change fields on existing entries",
            json!({
                "type": "object",
                "properties": {
                    "updates": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "string" },
                                "fields": {
                                    "type": "object",
                                    "properties": {
                                        "content": { "type": "string" },
                                        "summary": { "type": "string" },
                                        "category": { "type": "string", "enum": CATEGORIES },
                                        "priority": { "type": "integer", "minimum": 1, "maximum": 5 },
                                        "due_date": { "type": "string" },
                                        "cadence": { "type": "string", "enum": CADENCES },
                                        "status": { "type": "string", "enum": STATUSES },
                                        "snooze_until": { "type": "string" }
                                    }
                                },
                                "reason": { "type": "string" }
                            },
                            "required": ["id", "fields", "reason"]
                        }
                    }
                },
                "required": ["updates"]
            }),
        ),
        function(TOOL_COMPLETE, "Mark existing entries as done", targeted_parameters()),
        function(TOOL_ARCHIVE, "Archive entries that no longer matter", targeted_parameters()),
        function(
            TOOL_MEMORY,
            "Replace your saved notes about the user",
            json!({
                "type": "object",
                "properties": {
                    "memory": { "type": "string", "description": "Complete replacement text" }
                },
                "required": ["memory"]
            }),
        ),
        function(
            TOOL_CONFIRM,
            "Ask the user to confirm before a destructive change",
            json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                },
                "required": ["message"]
            }),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryCategory, HabitCadence};
    use chrono::{Duration, Utc};

    fn context(id: &str, summary: &str, priority: Option<i32>) -> AgentContextEntry {
        AgentContextEntry {
            id: id.into(),
            summary: summary.into(),
            category: EntryCategory::Todo,
            priority,
            due_date_description: None,
            cadence: None,
            status: EntryStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_temporal_context() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 15, 4, 0).unwrap();
        assert_eq!(
            temporal_context(&now),
            "Current: Sunday, October 18, 2026 at 3:04 PM (weekend, afternoon)"
        );
        assert!(system_prompt(&now).contains("create_entries"));
    }

    #[test]
    fn test_user_content_lists_entries_by_priority() {
        let mut snoozed = context("bbb222", "Dentist", None);
        snoozed.status = EntryStatus::Snoozed;
        snoozed.due_date_description = Some("next  friday".into());
        snoozed.created_at = Utc::now() - Duration::hours(1);
        let mut habit = context("ccc333", "Stretch", Some(4));
        habit.category = EntryCategory::Habit;
        habit.cadence = Some(HabitCadence::Daily);
        let urgent = context("aaa111", "Pay rent", Some(1));

        let content = format_user_content("done with rent", &[snoozed, habit, urgent], None);
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "## Current Entries");
        assert_eq!(lines[1], "- [aaa111] TODO P1 \"Pay rent\"");
        assert_eq!(lines[2], "- [ccc333] HABIT P4 \"Stretch\" cadence:daily");
        assert_eq!(lines[3], "- [bbb222] TODO \"Dentist\" due:next friday status:snoozed");
        assert_eq!(lines[5], "## User Transcript");
        assert_eq!(lines[6], "done with rent");
    }

    #[test]
    fn test_user_content_empty_and_memory() {
        let content = format_user_content("buy milk", &[], Some("  Vegetarian. "));
        assert!(content.starts_with("## Current Entries\n(none)\n"));
        assert!(content.contains("## Agent Memory\nVegetarian."));
        assert!(content.ends_with("## User Transcript\nbuy milk"));

        let without = format_user_content("buy milk", &[], Some("   "));
        assert!(!without.contains("Agent Memory"));
    }

    #[test]
    fn test_tool_schema_names() {
        let tools = tool_schemas();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![TOOL_CREATE, TOOL_UPDATE, TOOL_COMPLETE, TOOL_ARCHIVE, TOOL_MEMORY, TOOL_CONFIRM]
        );
    }
}
