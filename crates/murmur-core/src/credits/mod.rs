//! ============================================================================
//! Credits - Metering agent token usage against a prepaid balance
//! ============================================================================
//! 1 credit = $0.001. Costs are computed in USD micros per 1M tokens so the
//! arithmetic stays integral, then rounded up to whole credits.
//! ============================================================================

mod gate;
mod ledger;

pub use gate::{CreditGate, LocalCreditGate};
pub use ledger::{InMemoryLedger, LedgerBacking, LedgerSnapshot};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// USD micros in one credit
const MICROS_PER_CREDIT: u128 = 1_000;

/// Token accounting reported by the agent provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Provider pricing in USD micros per 1M tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePricing {
    pub input_micros_per_1m: u64,
    pub output_micros_per_1m: u64,
    pub minimum_charge_credits: i64,
}

impl Default for ServicePricing {
    fn default() -> Self {
        Self {
            input_micros_per_1m: 3_000_000,
            output_micros_per_1m: 15_000_000,
            minimum_charge_credits: 1,
        }
    }
}

impl ServicePricing {
    pub const FREE: ServicePricing = ServicePricing {
        input_micros_per_1m: 0,
        output_micros_per_1m: 0,
        minimum_charge_credits: 0,
    };

    /// Credits owed for `usage`. Zero usage is free; anything else costs at
    /// least `minimum_charge_credits` and partial credits round up.
    pub fn credits(&self, usage: &TokenUsage) -> i64 {
        if usage.total_tokens() == 0 {
            return 0;
        }

        let scaled = usage.input_tokens as u128 * self.input_micros_per_1m as u128
            + usage.output_tokens as u128 * self.output_micros_per_1m as u128;
        let denominator = 1_000_000 * MICROS_PER_CREDIT;
        let computed = scaled.div_ceil(denominator);
        let computed = i64::try_from(computed).unwrap_or(i64::MAX);

        computed.max(self.minimum_charge_credits)
    }
}

/// Advisory permission to run one billable turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAuthorization {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl CreditAuthorization {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for CreditAuthorization {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditReceipt {
    pub authorization: CreditAuthorization,
    pub usage: TokenUsage,
    pub credits_charged: i64,
    pub new_balance: i64,
}

#[derive(Debug, Error)]
pub enum CreditError {
    #[error("Insufficient credits (balance: {current}). Top up to continue.")]
    InsufficientBalance { current: i64 },

    #[error("Top-up amount must be greater than zero.")]
    InvalidTopUpAmount,

    #[error("Unknown credit authorization: {0}")]
    UnknownAuthorization(Uuid),

    #[error("Failed to persist credit ledger: {0}")]
    Persistence(#[source] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_usage_is_free() {
        let pricing = ServicePricing::default();
        assert_eq!(pricing.credits(&TokenUsage::default()), 0);
    }

    #[test]
    fn test_small_usage_hits_minimum() {
        let pricing = ServicePricing {
            input_micros_per_1m: 500_000,
            output_micros_per_1m: 0,
            minimum_charge_credits: 2,
        };
        assert_eq!(pricing.credits(&TokenUsage::new(1, 0)), 2);
    }

    #[test]
    fn test_partial_credit_rounds_up() {
        let pricing = ServicePricing {
            input_micros_per_1m: 3_000_000,
            output_micros_per_1m: 15_000_000,
            minimum_charge_credits: 0,
        };
        // 10 input tokens at $3/M = 30 micros, still one whole credit
        assert_eq!(pricing.credits(&TokenUsage::new(10, 0)), 1);
        // 1000 in + 500 out = 3000 + 7500 = 10_500 micros -> 11 credits
        assert_eq!(pricing.credits(&TokenUsage::new(1_000, 500)), 11);
        // 9_990 micros -> 10 credits
        assert_eq!(pricing.credits(&TokenUsage::new(0, 666)), 10);
    }

    #[test]
    fn test_credits_monotonic_in_tokens() {
        let pricing = ServicePricing::default();
        let mut previous = 0;
        for input in (0..5_000u64).step_by(97) {
            for output in [0u64, 1, 50, 999] {
                let c = pricing.credits(&TokenUsage::new(input, output));
                if input + output > 0 {
                    assert!(c >= pricing.minimum_charge_credits);
                }
                let grown = pricing.credits(&TokenUsage::new(input + 1, output + 1));
                assert!(grown >= c);
            }
            let c = pricing.credits(&TokenUsage::new(input, 0));
            assert!(c >= previous);
            previous = c;
        }
    }

    #[test]
    fn test_huge_usage_does_not_overflow() {
        let pricing = ServicePricing::default();
        let c = pricing.credits(&TokenUsage::new(u64::MAX, u64::MAX));
        assert!(c > 0);
    }
}
