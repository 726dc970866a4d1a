// ============================================================================
// MurmurDb: Embedded Database (redb)
// ============================================================================
// Persistent local storage for entries, the credit ledger and agent memory.
// Default path: ~/.murmur/murmur.redb (override via MURMUR_DB_PATH env var)
// ============================================================================

use anyhow::{anyhow, Result};
use redb::{Database, TableDefinition};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Change, EntryFilter, EntryStore, MemoryStore, PendingChanges, StoreError};
use crate::credits::{LedgerBacking, LedgerSnapshot};
use crate::types::{Entry, EntryStatus};

// Table definitions
const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");
const LEDGER: TableDefinition<&str, &[u8]> = TableDefinition::new("ledger");
const MEMORY: TableDefinition<&str, &[u8]> = TableDefinition::new("memory");

const LEDGER_KEY: &str = "ledger:state";
const MEMORY_KEY: &str = "memory:agent";

/// Counts reported by `murmur stats`
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub total_entries: usize,
    pub status_counts: Vec<(String, usize)>,
    pub balance: Option<i64>,
    pub memory_words: usize,
}

/// Embedded database for Murmur
pub struct MurmurDb {
    db: Database,
    path: PathBuf,
}

impl MurmurDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses MURMUR_DB_PATH env var or ~/.murmur/murmur.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("MURMUR_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let murmur_dir = home.join(".murmur");
            std::fs::create_dir_all(&murmur_dir)
                .map_err(|e| anyhow!("Failed to create .murmur directory: {}", e))?;
            murmur_dir.join("murmur.redb")
        };

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn.open_table(ENTRIES).map_err(|e| anyhow!("Failed to create entries table: {}", e))?;
            let _ = write_txn.open_table(LEDGER).map_err(|e| anyhow!("Failed to create ledger table: {}", e))?;
            let _ = write_txn.open_table(MEMORY).map_err(|e| anyhow!("Failed to create memory table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Entry Operations
    // ========================================================================

    pub fn get_entry(&self, id: &Uuid) -> Result<Option<Entry>> {
        let key = id.to_string();

        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(ENTRIES)
            .map_err(|e| anyhow!("Failed to open entries table: {}", e))?;

        match table.get(key.as_str()).map_err(|e| anyhow!("Failed to get entry: {}", e))? {
            Some(value) => {
                let entry: Entry = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize entry: {}", e))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Entries matching `filter`, oldest first
    pub fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(ENTRIES)
            .map_err(|e| anyhow!("Failed to open entries table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate entries: {}", e))?;
        for row in iter {
            let (_key, value) = row.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let entry: Entry = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize entry: {}", e))?;
            if filter.matches(&entry) {
                results.push(entry);
            }
        }
        results.sort_by_key(|e| e.created_at);
        Ok(results)
    }

    /// Apply a batch of staged changes in one write transaction
    pub fn apply_changes(&self, changes: &[Change]) -> Result<usize> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(ENTRIES)
                .map_err(|e| anyhow!("Failed to open entries table: {}", e))?;
            for change in changes {
                match change {
                    Change::Upsert(entry) => {
                        let key = entry.id.to_string();
                        let value = bincode::serialize(entry)
                            .map_err(|e| anyhow!("Failed to serialize entry: {}", e))?;
                        table.insert(key.as_str(), value.as_slice())
                            .map_err(|e| anyhow!("Failed to insert entry: {}", e))?;
                    }
                    Change::Delete(id) => {
                        let key = id.to_string();
                        table.remove(key.as_str())
                            .map_err(|e| anyhow!("Failed to remove entry: {}", e))?;
                    }
                }
            }
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Committed {} entry changes", changes.len());
        Ok(changes.len())
    }

    // ========================================================================
    // Ledger & Memory
    // ========================================================================

    pub fn get_ledger(&self) -> Result<Option<LedgerSnapshot>> {
        match self.get_blob(LEDGER, LEDGER_KEY)? {
            Some(bytes) => {
                let snapshot = bincode::deserialize(&bytes)
                    .map_err(|e| anyhow!("Failed to deserialize ledger: {}", e))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    pub fn store_ledger(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let value = bincode::serialize(snapshot)
            .map_err(|e| anyhow!("Failed to serialize ledger: {}", e))?;
        self.put_blob(LEDGER, LEDGER_KEY, &value)?;
        debug!("Stored ledger, balance {}", snapshot.balance);
        Ok(())
    }

    pub fn get_memory(&self) -> Result<String> {
        match self.get_blob(MEMORY, MEMORY_KEY)? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|e| anyhow!("Agent memory is not valid UTF-8: {}", e)),
            None => Ok(String::new()),
        }
    }

    pub fn store_memory(&self, text: &str) -> Result<()> {
        self.put_blob(MEMORY, MEMORY_KEY, text.as_bytes())?;
        debug!("Stored agent memory ({} bytes)", text.len());
        Ok(())
    }

    fn get_blob(&self, table_def: TableDefinition<'static, &'static str, &'static [u8]>, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(table_def)
            .map_err(|e| anyhow!("Failed to open table: {}", e))?;
        let value = table.get(key).map_err(|e| anyhow!("Failed to get {}: {}", key, e))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn put_blob(&self, table_def: TableDefinition<'static, &'static str, &'static [u8]>, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(table_def)
                .map_err(|e| anyhow!("Failed to open table: {}", e))?;
            table.insert(key, value)
                .map_err(|e| anyhow!("Failed to insert {}: {}", key, e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;
        Ok(())
    }

    // ========================================================================
    // Statistics & Export
    // ========================================================================

    pub fn stats(&self) -> Result<DbStats> {
        let entries = self.list_entries(&EntryFilter::all())?;

        let status_counts = [
            EntryStatus::Active,
            EntryStatus::Snoozed,
            EntryStatus::Completed,
            EntryStatus::Archived,
        ]
        .iter()
        .map(|status| {
            let count = entries.iter().filter(|e| e.status == *status).count();
            (status.to_string(), count)
        })
        .collect();

        Ok(DbStats {
            total_entries: entries.len(),
            status_counts,
            balance: self.get_ledger()?.map(|l| l.balance),
            memory_words: self.get_memory()?.split_whitespace().count(),
        })
    }

    /// Full database contents as JSON
    pub fn export_json(&self) -> Result<serde_json::Value> {
        let entries = self.list_entries(&EntryFilter::all())?;
        Ok(serde_json::json!({
            "entries": entries,
            "ledger": self.get_ledger()?,
            "memory": self.get_memory()?,
        }))
    }
}

impl LedgerBacking for MurmurDb {
    fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError> {
        Ok(self.get_ledger()?)
    }

    fn persist(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        Ok(self.store_ledger(snapshot)?)
    }
}

impl MemoryStore for MurmurDb {
    fn load(&self) -> Result<String, StoreError> {
        Ok(self.get_memory()?)
    }

    fn save(&self, text: &str) -> Result<(), StoreError> {
        Ok(self.store_memory(text)?)
    }
}

/// Entry mutation context over a shared `MurmurDb`
pub struct DbEntryStore {
    db: Arc<MurmurDb>,
    pending: PendingChanges,
}

impl DbEntryStore {
    pub fn new(db: Arc<MurmurDb>) -> Self {
        Self {
            db,
            pending: PendingChanges::default(),
        }
    }
}

impl EntryStore for DbEntryStore {
    fn fetch(&self, filter: &EntryFilter) -> Result<Vec<Entry>, StoreError> {
        Ok(self.db.list_entries(filter)?)
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
        let changes = self.pending.take();
        if changes.is_empty() {
            return Ok(0);
        }
        Ok(self.db.apply_changes(&changes)?)
    }

    fn discard(&mut self) {
        self.pending.clear();
    }

    fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::CreditReceipt;
    use crate::types::{EntryCategory, EntrySource};
    use chrono::Utc;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, MurmurDb) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.redb");
        let db = MurmurDb::open(path.to_str()).unwrap();
        (dir, db)
    }

    #[test]
    fn test_entry_store_batches_changes() {
        let (_dir, db) = open_temp();
        let db = Arc::new(db);
        let mut store = DbEntryStore::new(db.clone());

        let mut entry = Entry::new("water plants", EntryCategory::Habit, EntrySource::Voice, Utc::now());
        entry.priority = Some(2);
        store.insert(entry.clone());
        assert!(store.fetch(&EntryFilter::all()).unwrap().is_empty());

        assert_eq!(store.save().unwrap(), 1);
        assert_eq!(db.get_entry(&entry.id).unwrap(), Some(entry.clone()));

        entry.complete(Utc::now());
        store.update(entry.clone());
        store.save().unwrap();
        let completed = db
            .list_entries(&EntryFilter::with_status(EntryStatus::Completed))
            .unwrap();
        assert_eq!(completed, vec![entry.clone()]);

        store.delete(entry.id);
        store.save().unwrap();
        assert!(db.get_entry(&entry.id).unwrap().is_none());
    }

    #[test]
    fn test_ledger_and_memory_round_trip() {
        let (_dir, db) = open_temp();
        assert!(LedgerBacking::load(&db).unwrap().is_none());
        assert_eq!(MemoryStore::load(&db).unwrap(), "");

        let snapshot = LedgerSnapshot {
            balance: 42,
            receipts: vec![CreditReceipt {
                authorization: Default::default(),
                usage: Default::default(),
                credits_charged: 3,
                new_balance: 42,
            }],
        };
        db.persist(&snapshot).unwrap();
        MemoryStore::save(&db, "lives in Lisbon").unwrap();

        assert_eq!(LedgerBacking::load(&db).unwrap(), Some(snapshot));
        assert_eq!(MemoryStore::load(&db).unwrap(), "lives in Lisbon");

        let stats = db.stats().unwrap();
        assert_eq!(stats.balance, Some(42));
        assert_eq!(stats.memory_words, 3);
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn test_export_contains_entries() {
        let (_dir, db) = open_temp();
        let entry = Entry::new("idea", EntryCategory::Idea, EntrySource::Text, Utc::now());
        db.apply_changes(&[Change::Upsert(entry.clone())]).unwrap();

        let export = db.export_json().unwrap();
        assert_eq!(export["entries"].as_array().unwrap().len(), 1);
        assert_eq!(export["entries"][0]["category"], "idea");
    }
}
