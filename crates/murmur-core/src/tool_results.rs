//! ============================================================================
//! Tool Result Builder - Real results for the agent's tool calls
//! ============================================================================
//! The provider expects exactly one tool message per tool call it issued.
//! Groups are rendered from their slice of execution outcomes; tool calls
//! that never produced a group get an explicit parse error instead.
//! ============================================================================

use std::collections::HashSet;

use crate::agent::{ParseFailure, ToolCallGroup};
use crate::conversation::placeholder_result;
use crate::executor::{ActionOutcome, AppliedChange};

/// Characters of an entry summary echoed back to the agent
const SUMMARY_PREVIEW_CHARS: usize = 30;

pub struct ToolResultBuilder;

impl ToolResultBuilder {
    /// `(tool_call_id, content)` pairs for `Conversation::replace_tool_results`
    pub fn build(
        groups: &[ToolCallGroup],
        outcomes: &[ActionOutcome],
        failures: &[ParseFailure],
    ) -> Vec<(String, String)> {
        let mut results = Vec::with_capacity(groups.len() + failures.len());
        let mut covered = HashSet::new();

        for group in groups {
            covered.insert(group.tool_call_id.as_str());
            let slice = outcomes.get(group.action_range.clone()).unwrap_or(&[]);
            let lines: Vec<String> = slice.iter().map(describe_outcome).collect();

            let content = if lines.is_empty() {
                placeholder_result(&group.tool_name)
            } else {
                lines.join("\n")
            };
            results.push((group.tool_call_id.clone(), content));
        }

        for failure in failures {
            let Some(id) = failure.tool_call_id.as_deref() else {
                continue;
            };
            if covered.insert(id) {
                results.push((
                    id.to_string(),
                    format!(
                        "Error: failed to parse {}: {}",
                        failure.tool_name, failure.error_description
                    ),
                ));
            }
        }

        results
    }
}

/// One line describing what happened to an action
pub fn describe_outcome(outcome: &ActionOutcome) -> String {
    match outcome {
        ActionOutcome::Applied { change, entry } => {
            let id = entry.short_id();
            match change {
                AppliedChange::Created => {
                    let preview: String = entry.summary.chars().take(SUMMARY_PREVIEW_CHARS).collect();
                    format!("Created [{}] '{}'", id, preview)
                }
                AppliedChange::Updated => format!("Updated [{}]", id),
                AppliedChange::Completed => format!("Completed [{}]", id),
                AppliedChange::Archived => format!("Archived [{}]", id),
            }
        }
        ActionOutcome::MemorySaved { word_count } => {
            format!("Memory updated ({} words)", word_count)
        }
        ActionOutcome::AwaitingConfirmation { message } => {
            format!("Awaiting confirmation: {}", message)
        }
        ActionOutcome::Skipped { target, reason } => match target {
            Some(id) => format!("Skipped [{}]: {}", id, reason),
            None => format!("Skipped: {}", reason),
        },
        ActionOutcome::Failed { target, reason } => match target {
            Some(id) => format!("Failed [{}]: {}", id, reason),
            None => format!("Failed: {}", reason),
        },
    }
}
