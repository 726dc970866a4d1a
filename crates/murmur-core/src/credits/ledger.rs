//! Durable backing for the credit ledger.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::CreditReceipt;
use crate::store::StoreError;

/// Everything the gate needs to survive a restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub balance: i64,
    /// Recent receipts, oldest first
    pub receipts: Vec<CreditReceipt>,
}

/// Persistence for `LocalCreditGate`. Calls are made while the gate holds
/// its lock, so implementations never see interleaved writes.
pub trait LedgerBacking: Send + Sync {
    fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError>;
    fn persist(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError>;
}

/// Process-local ledger, used by tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    snapshot: Mutex<Option<LedgerSnapshot>>,
    fail_writes: bool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that loads `snapshot` but rejects every persist call
    pub fn failing(snapshot: Option<LedgerSnapshot>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            fail_writes: true,
        }
    }

    pub fn with_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            fail_writes: false,
        }
    }
}

impl LedgerBacking for InMemoryLedger {
    fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError> {
        let guard = self
            .snapshot
            .lock()
            .map_err(|_| StoreError::Backend("ledger lock poisoned".into()))?;
        Ok(guard.clone())
    }

    fn persist(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Backend("ledger is read-only".into()));
        }
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|_| StoreError::Backend("ledger lock poisoned".into()))?;
        *guard = Some(snapshot.clone());
        Ok(())
    }
}

impl<T: LedgerBacking + ?Sized> LedgerBacking for Arc<T> {
    fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError> {
        (**self).load()
    }

    fn persist(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        (**self).persist(snapshot)
    }
}
