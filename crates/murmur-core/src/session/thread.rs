//! Items shown in a session thread.

use serde::Serialize;

use crate::credits::CreditReceipt;
use crate::executor::{ExecutionResult, UndoTransaction};
use crate::tool_results::describe_outcome;
use crate::types::EntrySource;

/// Id of the single status item, reused every time it is replaced
pub const STATUS_ITEM_ID: u64 = 0;

/// What the input control is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputState {
    Idle,
    Recording,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum StatusKind {
    Recording { live_transcript: String },
    Processing,
}

/// Display-ready account of one executed batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionReport {
    /// "Created 1 entry, Completed 2 entries"
    pub summary: String,
    pub lines: Vec<String>,
    pub applied: usize,
    pub failed: usize,
    /// Tool calls whose arguments could not be decoded
    pub parse_failures: usize,
    pub credits_charged: Option<i64>,
}

impl ActionReport {
    pub fn from_execution(
        execution: &ExecutionResult,
        parse_failures: usize,
        receipt: Option<&CreditReceipt>,
    ) -> Self {
        Self {
            summary: execution.summary(),
            lines: execution.outcomes.iter().map(describe_outcome).collect(),
            applied: execution.applied_count(),
            failed: execution.failure_count(),
            parse_failures,
            credits_charged: receipt.map(|r| r.credits_charged),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThreadItemKind {
    UserInput {
        text: String,
        source: EntrySource,
    },
    AgentText {
        text: String,
    },
    ActionResult {
        /// Generation of the turn that produced it; undo is only valid while current
        generation: u64,
        report: ActionReport,
        undo: Option<UndoTransaction>,
    },
    Confirmation {
        message: String,
    },
    Error {
        message: String,
        retry_text: Option<String>,
    },
    Status(StatusKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadItem {
    pub id: u64,
    pub kind: ThreadItemKind,
}

impl ThreadItem {
    pub fn is_status(&self) -> bool {
        matches!(self.kind, ThreadItemKind::Status(_))
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.kind, ThreadItemKind::ActionResult { undo: Some(_), .. })
    }
}

/// Ordered thread items with one in-place status slot
#[derive(Debug, Default)]
pub(super) struct Thread {
    items: Vec<ThreadItem>,
    next_id: u64,
}

impl Thread {
    pub fn items(&self) -> &[ThreadItem] {
        &self.items
    }

    pub fn push(&mut self, kind: ThreadItemKind) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.items.push(ThreadItem { id, kind });
        id
    }

    /// Replace the status item in place, or append it if there is none
    pub fn set_status(&mut self, status: StatusKind) {
        let kind = ThreadItemKind::Status(status);
        match self.items.iter_mut().find(|item| item.is_status()) {
            Some(item) => item.kind = kind,
            None => self.items.push(ThreadItem {
                id: STATUS_ITEM_ID,
                kind,
            }),
        }
    }

    pub fn clear_status(&mut self) {
        self.items.retain(|item| !item.is_status());
    }

    pub fn remove(&mut self, id: u64) -> Option<ThreadItem> {
        let idx = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(idx))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
