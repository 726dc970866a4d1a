//! ============================================================================
//! Executor Module - Applies agent actions to entries
//! ============================================================================
//! - actions: `AgentActionExecutor`, best-effort per action, one save per batch
//! - undo: `UndoTransaction` recorded while applying and replayed in reverse
//! ============================================================================

mod actions;
mod undo;

pub use actions::AgentActionExecutor;
pub use undo::{FieldSnapshot, StatusSnapshot, UndoItem, UndoSummary, UndoTransaction};

use chrono::{DateTime, Utc};

use crate::notify::NotificationScheduler;
use crate::store::{EntryStore, MemoryStore};
use crate::types::{Entry, EntrySource};

/// Everything a batch (or its undo) reads and writes.
///
/// `entries` is the caller's snapshot; it is kept in step with the staged
/// store writes so later actions in a batch see earlier ones.
pub struct ExecutionContext<'a> {
    pub entries: &'a mut Vec<Entry>,
    pub store: &'a mut dyn EntryStore,
    pub notifier: &'a dyn NotificationScheduler,
    pub memory: Option<&'a dyn MemoryStore>,
    /// Provenance stamped on created entries
    pub source: EntrySource,
    pub now: DateTime<Utc>,
}

/// Which mutation an applied action performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedChange {
    Created,
    Updated,
    Completed,
    Archived,
}

impl AppliedChange {
    fn label(&self) -> &'static str {
        match self {
            AppliedChange::Created => "Created",
            AppliedChange::Updated => "Updated",
            AppliedChange::Completed => "Completed",
            AppliedChange::Archived => "Archived",
        }
    }
}

/// Result of one action, in the same position as the action
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Applied { change: AppliedChange, entry: Entry },
    MemorySaved { word_count: usize },
    AwaitingConfirmation { message: String },
    Skipped { target: Option<String>, reason: String },
    Failed { target: Option<String>, reason: String },
}

impl ActionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ActionOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub outcomes: Vec<ActionOutcome>,
    pub undo: UndoTransaction,
}

impl ExecutionResult {
    /// Entry mutations plus memory saves
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ActionOutcome::Applied { .. } | ActionOutcome::MemorySaved { .. }))
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ActionOutcome::Skipped { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Option<String>, &str)> {
        self.outcomes.iter().filter_map(|o| match o {
            ActionOutcome::Failed { target, reason } => Some((target, reason.as_str())),
            _ => None,
        })
    }

    /// Confirmation messages the agent asked for
    pub fn confirmations(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter_map(|o| match o {
            ActionOutcome::AwaitingConfirmation { message } => Some(message.as_str()),
            _ => None,
        })
    }

    /// "Created 1 entry, Completed 2 entries"
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for change in [
            AppliedChange::Created,
            AppliedChange::Updated,
            AppliedChange::Completed,
            AppliedChange::Archived,
        ] {
            let count = self
                .outcomes
                .iter()
                .filter(|o| matches!(o, ActionOutcome::Applied { change: c, .. } if *c == change))
                .count();
            if count > 0 {
                let noun = if count == 1 { "entry" } else { "entries" };
                parts.push(format!("{} {} {}", change.label(), count, noun));
            }
        }
        if self
            .outcomes
            .iter()
            .any(|o| matches!(o, ActionOutcome::MemorySaved { .. }))
        {
            parts.push("Memory updated".to_string());
        }
        let failed = self.failure_count();
        if failed > 0 {
            parts.push(format!("{} failed", failed));
        }

        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}
