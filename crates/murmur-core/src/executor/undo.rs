//! Undo log for one executed batch.
//!
//! Items are recorded in the order mutations were applied and replayed in
//! reverse, so later changes to the same entry are unwound first.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ExecutionContext;
use crate::store::StoreError;
use crate::types::{Entry, EntryCategory, EntryStatus, HabitCadence};

/// Status plus the timestamps tied to it
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub status: EntryStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub snooze_until: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn capture(entry: &Entry) -> Self {
        Self {
            status: entry.status,
            completed_at: entry.completed_at,
            snooze_until: entry.snooze_until,
            updated_at: entry.updated_at,
        }
    }

    fn restore(&self, entry: &mut Entry) {
        entry.status = self.status;
        entry.completed_at = self.completed_at;
        entry.snooze_until = self.snooze_until;
        entry.updated_at = self.updated_at;
    }
}

/// Previous values of the fields an update touched. The outer `Option`
/// marks whether the field was touched; the inner one is the old value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSnapshot {
    pub content: Option<String>,
    pub summary: Option<String>,
    pub category: Option<EntryCategory>,
    pub priority: Option<Option<i32>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub due_date_description: Option<Option<String>>,
    pub cadence: Option<Option<HabitCadence>>,
    pub status: Option<StatusSnapshot>,
    pub updated_at: DateTime<Utc>,
}

impl FieldSnapshot {
    /// Empty snapshot of `entry`, remembering only `updated_at`
    pub fn new(entry: &Entry) -> Self {
        Self {
            content: None,
            summary: None,
            category: None,
            priority: None,
            due_date: None,
            due_date_description: None,
            cadence: None,
            status: None,
            updated_at: entry.updated_at,
        }
    }

    fn restore(&self, entry: &mut Entry) {
        if let Some(content) = &self.content {
            entry.content = content.clone();
        }
        if let Some(summary) = &self.summary {
            entry.summary = summary.clone();
        }
        if let Some(category) = self.category {
            entry.category = category;
        }
        if let Some(priority) = self.priority {
            entry.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            entry.due_date = due_date;
        }
        if let Some(description) = &self.due_date_description {
            entry.due_date_description = description.clone();
        }
        if let Some(cadence) = self.cadence {
            entry.cadence = cadence;
        }
        if let Some(status) = &self.status {
            status.restore(entry);
        }
        entry.updated_at = self.updated_at;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UndoItem {
    Created { entry_id: Uuid },
    Updated { entry_id: Uuid, previous: FieldSnapshot },
    Completed { entry_id: Uuid, previous: StatusSnapshot },
    Archived { entry_id: Uuid, previous: StatusSnapshot },
}

impl UndoItem {
    pub fn entry_id(&self) -> Uuid {
        match self {
            UndoItem::Created { entry_id }
            | UndoItem::Updated { entry_id, .. }
            | UndoItem::Completed { entry_id, .. }
            | UndoItem::Archived { entry_id, .. } => *entry_id,
        }
    }
}

/// What an undo pass managed to revert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UndoSummary {
    pub reverted: usize,
    /// Items whose entry was no longer in the snapshot
    pub missing: usize,
}

/// Mutations of one turn, in the order they were applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UndoTransaction {
    items: Vec<UndoItem>,
}

impl UndoTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: UndoItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[UndoItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Revert every item, newest first, and commit the result in one save.
    /// Consumes the transaction so it cannot be applied twice.
    pub fn execute(self, ctx: &mut ExecutionContext<'_>) -> Result<UndoSummary, StoreError> {
        let mut summary = UndoSummary::default();

        for item in self.items.into_iter().rev() {
            let entry_id = item.entry_id();
            let Some(idx) = ctx.entries.iter().position(|e| e.id == entry_id) else {
                warn!("Undo skipped: entry {} is gone", entry_id);
                summary.missing += 1;
                continue;
            };

            match item {
                UndoItem::Created { .. } => {
                    ctx.entries.remove(idx);
                    ctx.store.delete(entry_id);
                    ctx.notifier.cancel(entry_id);
                }
                UndoItem::Updated { previous, .. } => {
                    let entry = &mut ctx.entries[idx];
                    previous.restore(entry);
                    ctx.store.update(entry.clone());
                    ctx.notifier.sync(entry);
                }
                UndoItem::Completed { previous, .. } | UndoItem::Archived { previous, .. } => {
                    let entry = &mut ctx.entries[idx];
                    previous.restore(entry);
                    ctx.store.update(entry.clone());
                    ctx.notifier.sync(entry);
                }
            }
            debug!("Reverted change to entry {}", entry_id);
            summary.reverted += 1;
        }

        if ctx.store.has_changes() {
            if let Err(e) = ctx.store.save() {
                ctx.store.discard();
                return Err(e);
            }
        }

        info!(
            "Undo reverted {} changes ({} missing)",
            summary.reverted, summary.missing
        );
        Ok(summary)
    }
}
