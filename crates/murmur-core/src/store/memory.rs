//! In-process stores for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{Change, EntryFilter, EntryStore, MemoryStore, PendingChanges, StoreError};
use crate::types::Entry;

#[derive(Debug, Default)]
pub struct InMemoryEntryStore {
    committed: HashMap<Uuid, Entry>,
    pending: PendingChanges,
    saves: usize,
    fail_saves: bool,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with committed entries
    pub fn with_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        Self {
            committed: entries.into_iter().map(|e| (e.id, e)).collect(),
            ..Self::default()
        }
    }

    /// Make every subsequent `save` fail
    pub fn set_fail_saves(&mut self, fail: bool) {
        self.fail_saves = fail;
    }

    /// Number of successful `save` calls
    pub fn save_count(&self) -> usize {
        self.saves
    }

    pub fn get(&self, id: &Uuid) -> Option<&Entry> {
        self.committed.get(id)
    }
}

impl EntryStore for InMemoryEntryStore {
    fn fetch(&self, filter: &EntryFilter) -> Result<Vec<Entry>, StoreError> {
        let mut entries: Vec<Entry> = self
            .committed
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    fn insert(&mut self, entry: Entry) {
        self.pending.push(Change::Upsert(entry));
    }

    fn update(&mut self, entry: Entry) {
        self.pending.push(Change::Upsert(entry));
    }

    fn delete(&mut self, id: Uuid) {
        self.pending.push(Change::Delete(id));
    }

    fn save(&mut self) -> Result<usize, StoreError> {
        if self.fail_saves {
            self.pending.clear();
            return Err(StoreError::Backend("save rejected".into()));
        }

        let changes = self.pending.take();
        let applied = changes.len();
        for change in changes {
            match change {
                Change::Upsert(entry) => {
                    self.committed.insert(entry.id, entry);
                }
                Change::Delete(id) => {
                    self.committed.remove(&id);
                }
            }
        }
        self.saves += 1;
        debug!("Committed {} entry changes", applied);
        Ok(applied)
    }

    fn discard(&mut self) {
        self.pending.clear();
    }

    fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    text: Mutex<String>,
}

impl InMemoryMemoryStore {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(text.into()),
        }
    }
}

impl MemoryStore for InMemoryMemoryStore {
    fn load(&self) -> Result<String, StoreError> {
        self.text
            .lock()
            .map(|t| t.clone())
            .map_err(|_| StoreError::Backend("memory lock poisoned".into()))
    }

    fn save(&self, text: &str) -> Result<(), StoreError> {
        let mut guard = self
            .text
            .lock()
            .map_err(|_| StoreError::Backend("memory lock poisoned".into()))?;
        *guard = text.to_string();
        Ok(())
    }
}
