//! ============================================================================
//! Credit Gate - Authorize and charge agent turns
//! ============================================================================
//! `authorize` is advisory: any positive balance lets a turn start.
//! `charge` is authoritative: it fails if the turn's cost would take the
//! balance below zero. Every mutation runs under one async mutex so the
//! balance check and the decrement can never interleave across turns.
//! ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ledger::{LedgerBacking, LedgerSnapshot};
use super::{CreditAuthorization, CreditError, CreditReceipt, ServicePricing, TokenUsage};

/// Receipts kept for idempotent re-charges
const MAX_RECEIPTS: usize = 256;

/// Authorizations that may be outstanding at once
const MAX_OUTSTANDING: usize = 64;

#[async_trait]
pub trait CreditGate: Send + Sync {
    async fn authorize(&self) -> Result<CreditAuthorization, CreditError>;

    async fn charge(
        &self,
        authorization: &CreditAuthorization,
        usage: TokenUsage,
        pricing: &ServicePricing,
    ) -> Result<CreditReceipt, CreditError>;

    /// Forget an authorization whose turn failed before it could be charged
    async fn release(&self, authorization: &CreditAuthorization);

    /// Add credits, returning the new balance
    async fn top_up(&self, credits: i64) -> Result<i64, CreditError>;

    async fn balance(&self) -> i64;
}

struct LedgerState {
    balance: i64,
    receipts: HashMap<Uuid, CreditReceipt>,
    outstanding: HashMap<Uuid, DateTime<Utc>>,
    backing: Box<dyn LedgerBacking>,
}

impl LedgerState {
    fn snapshot(&self) -> LedgerSnapshot {
        let mut receipts: Vec<CreditReceipt> = self.receipts.values().cloned().collect();
        receipts.sort_by_key(|r| r.authorization.timestamp);
        LedgerSnapshot {
            balance: self.balance,
            receipts,
        }
    }

    fn persist(&self) -> Result<(), CreditError> {
        self.backing
            .persist(&self.snapshot())
            .map_err(CreditError::Persistence)
    }

    fn evict_old_receipts(&mut self) {
        while self.receipts.len() > MAX_RECEIPTS {
            let oldest = self
                .receipts
                .iter()
                .min_by_key(|(_, r)| r.authorization.timestamp)
                .map(|(k, _)| *k);
            match oldest {
                Some(key) => {
                    self.receipts.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// Ledger-backed gate for a single device
pub struct LocalCreditGate {
    state: Mutex<LedgerState>,
}

impl LocalCreditGate {
    /// Restore the persisted ledger, or start one with `starter_credits`
    pub fn open(
        backing: Box<dyn LedgerBacking>,
        starter_credits: i64,
    ) -> Result<Self, CreditError> {
        let restored = backing.load().map_err(CreditError::Persistence)?;

        let fresh = restored.is_none();
        let (balance, receipts) = match restored {
            Some(snapshot) => {
                info!("Restored credit ledger: balance {}", snapshot.balance);
                let receipts = snapshot
                    .receipts
                    .into_iter()
                    .map(|r| (r.authorization.id, r))
                    .collect();
                (snapshot.balance.max(0), receipts)
            }
            None => {
                info!("Initialising credit ledger with {} starter credits", starter_credits);
                (starter_credits.max(0), HashMap::new())
            }
        };

        let state = LedgerState {
            balance,
            receipts,
            outstanding: HashMap::new(),
            backing,
        };
        if fresh {
            state.persist()?;
        }

        Ok(Self {
            state: Mutex::new(state),
        })
    }
}

#[async_trait]
impl CreditGate for LocalCreditGate {
    async fn authorize(&self) -> Result<CreditAuthorization, CreditError> {
        let mut state = self.state.lock().await;
        if state.balance <= 0 {
            return Err(CreditError::InsufficientBalance {
                current: state.balance,
            });
        }

        if state.outstanding.len() >= MAX_OUTSTANDING {
            if let Some(oldest) = state
                .outstanding
                .iter()
                .min_by_key(|(_, ts)| **ts)
                .map(|(k, _)| *k)
            {
                warn!("Dropping stale credit authorization {}", oldest);
                state.outstanding.remove(&oldest);
            }
        }

        let authorization = CreditAuthorization::new();
        state
            .outstanding
            .insert(authorization.id, authorization.timestamp);
        debug!("Authorized turn {}", authorization.id);
        Ok(authorization)
    }

    async fn charge(
        &self,
        authorization: &CreditAuthorization,
        usage: TokenUsage,
        pricing: &ServicePricing,
    ) -> Result<CreditReceipt, CreditError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.receipts.get(&authorization.id) {
            debug!("Charge for {} already recorded", authorization.id);
            return Ok(existing.clone());
        }
        if !state.outstanding.contains_key(&authorization.id) {
            return Err(CreditError::UnknownAuthorization(authorization.id));
        }

        let cost = pricing.credits(&usage);
        if cost > state.balance {
            state.outstanding.remove(&authorization.id);
            return Err(CreditError::InsufficientBalance {
                current: state.balance,
            });
        }

        let previous_balance = state.balance;
        state.balance -= cost;
        let receipt = CreditReceipt {
            authorization: authorization.clone(),
            usage,
            credits_charged: cost,
            new_balance: state.balance,
        };
        state.receipts.insert(authorization.id, receipt.clone());

        if let Err(e) = state.persist() {
            state.balance = previous_balance;
            state.receipts.remove(&authorization.id);
            state.outstanding.remove(&authorization.id);
            return Err(e);
        }

        state.outstanding.remove(&authorization.id);
        state.evict_old_receipts();
        info!(
            "Charged {} credits ({} in / {} out tokens), balance {}",
            cost, usage.input_tokens, usage.output_tokens, state.balance
        );
        Ok(receipt)
    }

    async fn release(&self, authorization: &CreditAuthorization) {
        let mut state = self.state.lock().await;
        if state.outstanding.remove(&authorization.id).is_some() {
            debug!("Released authorization {}", authorization.id);
        }
    }

    async fn top_up(&self, credits: i64) -> Result<i64, CreditError> {
        if credits <= 0 {
            return Err(CreditError::InvalidTopUpAmount);
        }

        let mut state = self.state.lock().await;
        let previous_balance = state.balance;
        state.balance = state.balance.saturating_add(credits);
        if let Err(e) = state.persist() {
            state.balance = previous_balance;
            return Err(e);
        }

        info!("Topped up {} credits, balance {}", credits, state.balance);
        Ok(state.balance)
    }

    async fn balance(&self) -> i64 {
        self.state.lock().await.balance
    }
}
