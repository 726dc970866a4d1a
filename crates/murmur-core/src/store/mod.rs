//! ============================================================================
//! Store - Entry persistence, agent memory and their in-memory versions
//! ============================================================================
//! `EntryStore` is a mutation context: writes are staged and only become
//! visible to `fetch` once `save` commits them as a single batch.
//! ============================================================================

mod db;
mod memory;

pub use db::{DbEntryStore, DbStats, MurmurDb};
pub use memory::{InMemoryEntryStore, InMemoryMemoryStore};

use thiserror::Error;
use uuid::Uuid;

use crate::types::{Entry, EntryCategory, EntryStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<anyhow::Error> for StoreError {
    fn from(e: anyhow::Error) -> Self {
        StoreError::Backend(format!("{:#}", e))
    }
}

/// A staged write
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Upsert(Entry),
    Delete(Uuid),
}

/// Changes waiting for the next `save`
#[derive(Debug, Default)]
pub struct PendingChanges {
    changes: Vec<Change>,
}

impl PendingChanges {
    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn take(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.changes)
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}

/// Optional status/category filter for `fetch`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFilter {
    pub statuses: Option<Vec<EntryStatus>>,
    pub category: Option<EntryCategory>,
}

impl EntryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Active and snoozed entries, the ones the agent works with
    pub fn current() -> Self {
        Self {
            statuses: Some(vec![EntryStatus::Active, EntryStatus::Snoozed]),
            category: None,
        }
    }

    pub fn with_status(status: EntryStatus) -> Self {
        Self {
            statuses: Some(vec![status]),
            category: None,
        }
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        let status_ok = self
            .statuses
            .as_ref()
            .map_or(true, |s| s.contains(&entry.status));
        let category_ok = self.category.map_or(true, |c| c == entry.category);
        status_ok && category_ok
    }
}

/// Persisted entries behind a staged mutation context
pub trait EntryStore: Send {
    /// Committed entries matching `filter`, oldest first
    fn fetch(&self, filter: &EntryFilter) -> Result<Vec<Entry>, StoreError>;

    fn insert(&mut self, entry: Entry);

    fn update(&mut self, entry: Entry);

    fn delete(&mut self, id: Uuid);

    /// Commit every staged change at once, returning how many were applied
    fn save(&mut self) -> Result<usize, StoreError>;

    /// Drop staged changes without committing them
    fn discard(&mut self);

    fn has_changes(&self) -> bool;
}

/// Small persisted text blob the agent keeps between sessions
pub trait MemoryStore: Send + Sync {
    fn load(&self) -> Result<String, StoreError>;
    fn save(&self, text: &str) -> Result<(), StoreError>;
}
