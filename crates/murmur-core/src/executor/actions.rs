//! Applies a batch of agent actions. Each action succeeds, skips or fails
//! on its own; staged writes are committed with a single save at the end.

use chrono::Duration;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::undo::{FieldSnapshot, StatusSnapshot, UndoItem, UndoTransaction};
use super::{ActionOutcome, AppliedChange, ExecutionContext, ExecutionResult};
use crate::agent::{AgentAction, CreateAction, TargetedAction, UpdateAction};
use crate::dates::resolve_due_date;
use crate::store::StoreError;
use crate::types::{clamp_priority, resolve_entry, Entry, EntryLookup, EntryStatus};

/// Length of a snooze when the agent gives no usable time
const DEFAULT_SNOOZE_MINUTES: i64 = 60;

#[derive(Debug, Clone)]
pub struct AgentActionExecutor {
    default_snooze: Duration,
}

impl Default for AgentActionExecutor {
    fn default() -> Self {
        Self {
            default_snooze: Duration::minutes(DEFAULT_SNOOZE_MINUTES),
        }
    }
}

impl AgentActionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_snooze(default_snooze: Duration) -> Self {
        Self { default_snooze }
    }

    /// Apply `actions` in order. Per-action problems land in the outcomes;
    /// only a failed commit is returned as an error, after which nothing
    /// from this batch is persisted.
    pub fn execute(
        &self,
        actions: &[AgentAction],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionResult, StoreError> {
        let completing = completion_targets(actions, &ctx.entries[..]);
        let mut undo = UndoTransaction::new();
        let mut outcomes = Vec::with_capacity(actions.len());

        for action in actions {
            let outcome = match action {
                AgentAction::Create(create) => self.apply_create(create, ctx, &mut undo),
                AgentAction::Update(update) => self.apply_update(update, &completing, ctx, &mut undo),
                AgentAction::Complete(target) => {
                    apply_status(target, EntryStatus::Completed, ctx, &mut undo)
                }
                AgentAction::Archive(target) => {
                    apply_status(target, EntryStatus::Archived, ctx, &mut undo)
                }
                AgentAction::MemoryUpdate { text } => save_memory(text, ctx),
                AgentAction::ConfirmationRequest { message } => {
                    ActionOutcome::AwaitingConfirmation {
                        message: message.clone(),
                    }
                }
            };

            match &outcome {
                ActionOutcome::Failed { target, reason } => {
                    warn!("Action failed ({}): {}", target.as_deref().unwrap_or("-"), reason)
                }
                ActionOutcome::Skipped { target, reason } => {
                    debug!("Action skipped ({}): {}", target.as_deref().unwrap_or("-"), reason)
                }
                _ => {}
            }
            outcomes.push(outcome);
        }

        if ctx.store.has_changes() {
            match ctx.store.save() {
                Ok(written) => debug!("Committed {} staged entry writes", written),
                Err(e) => {
                    ctx.store.discard();
                    return Err(e);
                }
            }
        }

        let result = ExecutionResult { outcomes, undo };
        info!(
            "Executed {} actions: {} ({} skipped)",
            actions.len(),
            result.summary(),
            result.skipped_count()
        );
        Ok(result)
    }

    fn apply_create(
        &self,
        create: &CreateAction,
        ctx: &mut ExecutionContext<'_>,
        undo: &mut UndoTransaction,
    ) -> ActionOutcome {
        let content = create.content.trim();
        if content.is_empty() {
            return ActionOutcome::Failed {
                target: None,
                reason: "entry has no content".into(),
            };
        }

        let mut entry = Entry::new(content, create.category, ctx.source, ctx.now);
        let summary = create.summary.trim();
        if !summary.is_empty() {
            entry.summary = summary.to_string();
        }
        entry.source_text = create.source_text.clone();
        entry.priority = create.priority.map(|p| clamp_priority(p as i64));
        entry.cadence = create.cadence;
        if let Some(phrase) = non_empty(create.due_date_description.as_deref()) {
            entry.due_date = resolve_due_date(phrase, ctx.now);
            entry.due_date_description = Some(phrase.to_string());
        }

        ctx.store.insert(entry.clone());
        ctx.notifier.sync(&entry);
        ctx.entries.push(entry.clone());
        undo.push(UndoItem::Created { entry_id: entry.id });

        ActionOutcome::Applied {
            change: AppliedChange::Created,
            entry,
        }
    }

    fn apply_update(
        &self,
        update: &UpdateAction,
        completing: &HashSet<Uuid>,
        ctx: &mut ExecutionContext<'_>,
        undo: &mut UndoTransaction,
    ) -> ActionOutcome {
        let idx = match lookup(&ctx.entries[..], &update.id) {
            Ok(idx) => idx,
            Err(outcome) => return outcome,
        };
        if completing.contains(&ctx.entries[idx].id) {
            return ActionOutcome::Skipped {
                target: Some(update.id.clone()),
                reason: "completed in the same turn".into(),
            };
        }
        if update.fields.is_empty() {
            return ActionOutcome::Skipped {
                target: Some(update.id.clone()),
                reason: "no fields to change".into(),
            };
        }

        let now = ctx.now;
        let fields = &update.fields;
        let entry = &mut ctx.entries[idx];
        let mut previous = FieldSnapshot::new(entry);

        if let Some(content) = non_empty(fields.content.as_deref()) {
            previous.content = Some(std::mem::replace(&mut entry.content, content.to_string()));
        }
        if let Some(summary) = non_empty(fields.summary.as_deref()) {
            previous.summary = Some(std::mem::replace(&mut entry.summary, summary.to_string()));
        }
        if let Some(category) = fields.category {
            previous.category = Some(entry.category);
            entry.category = category;
        }
        if let Some(priority) = fields.priority {
            previous.priority = Some(entry.priority);
            entry.priority = Some(clamp_priority(priority as i64));
        }
        if let Some(phrase) = fields.due_date_description.as_deref() {
            previous.due_date = Some(entry.due_date);
            previous.due_date_description = Some(entry.due_date_description.clone());
            match non_empty(Some(phrase)) {
                Some(phrase) => {
                    entry.due_date = resolve_due_date(phrase, now);
                    entry.due_date_description = Some(phrase.to_string());
                }
                None => {
                    entry.due_date = None;
                    entry.due_date_description = None;
                }
            }
        }
        if let Some(cadence) = fields.cadence {
            previous.cadence = Some(entry.cadence);
            entry.cadence = Some(cadence);
        }

        // A snooze time on its own still means "snooze"
        let status = fields.status.or_else(|| {
            non_empty(fields.snooze_until.as_deref()).map(|_| EntryStatus::Snoozed)
        });
        if let Some(status) = status {
            if status != entry.status || status == EntryStatus::Snoozed {
                let until = non_empty(fields.snooze_until.as_deref())
                    .and_then(|phrase| resolve_due_date(phrase, now))
                    .filter(|until| *until > now)
                    .unwrap_or(now + self.default_snooze);
                previous.status = Some(StatusSnapshot::capture(entry));
                entry.transition(status, until, now);
            }
        }

        entry.updated_at = now;
        let entry = entry.clone();
        ctx.store.update(entry.clone());
        ctx.notifier.sync(&entry);
        undo.push(UndoItem::Updated {
            entry_id: entry.id,
            previous,
        });

        ActionOutcome::Applied {
            change: AppliedChange::Updated,
            entry,
        }
    }
}

fn apply_status(
    target: &TargetedAction,
    status: EntryStatus,
    ctx: &mut ExecutionContext<'_>,
    undo: &mut UndoTransaction,
) -> ActionOutcome {
    let idx = match lookup(&ctx.entries[..], &target.id) {
        Ok(idx) => idx,
        Err(outcome) => return outcome,
    };

    let now = ctx.now;
    let entry = &mut ctx.entries[idx];
    if entry.status == status {
        return ActionOutcome::Skipped {
            target: Some(target.id.clone()),
            reason: format!("already {}", status),
        };
    }

    let previous = StatusSnapshot::capture(entry);
    let (change, item) = match status {
        EntryStatus::Completed => {
            entry.complete(now);
            (
                AppliedChange::Completed,
                UndoItem::Completed {
                    entry_id: entry.id,
                    previous,
                },
            )
        }
        _ => {
            entry.archive(now);
            (
                AppliedChange::Archived,
                UndoItem::Archived {
                    entry_id: entry.id,
                    previous,
                },
            )
        }
    };

    let entry = entry.clone();
    ctx.store.update(entry.clone());
    ctx.notifier.cancel(entry.id);
    undo.push(item);
    debug!("{} [{}]: {}", change.label(), entry.short_id(), target.reason);

    ActionOutcome::Applied { change, entry }
}

fn save_memory(text: &str, ctx: &ExecutionContext<'_>) -> ActionOutcome {
    let Some(memory) = ctx.memory else {
        return ActionOutcome::Failed {
            target: None,
            reason: "memory is not available".into(),
        };
    };

    let text = text.trim();
    match memory.save(text) {
        Ok(()) => ActionOutcome::MemorySaved {
            word_count: text.split_whitespace().count(),
        },
        Err(e) => ActionOutcome::Failed {
            target: None,
            reason: format!("memory not saved: {}", e),
        },
    }
}

/// Entries some `Complete` in this batch will finish
fn completion_targets(actions: &[AgentAction], entries: &[Entry]) -> HashSet<Uuid> {
    actions
        .iter()
        .filter_map(|action| match action {
            AgentAction::Complete(target) => match resolve_entry(entries, &target.id) {
                EntryLookup::Found(idx) => Some(entries[idx].id),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

fn lookup(entries: &[Entry], id: &str) -> Result<usize, ActionOutcome> {
    match resolve_entry(entries, id) {
        EntryLookup::Found(idx) => Ok(idx),
        EntryLookup::NotFound => Err(ActionOutcome::Failed {
            target: Some(id.to_string()),
            reason: "entry not found".into(),
        }),
        EntryLookup::Ambiguous(count) => Err(ActionOutcome::Failed {
            target: Some(id.to_string()),
            reason: format!("id matches {} entries", count),
        }),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
