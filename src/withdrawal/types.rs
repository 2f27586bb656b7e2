//! Withdrawal request/response types and error definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::custody::CustodyError;
use crate::derivation::DerivationError;
use crate::ledger::LedgerError;

/// A typed withdrawal request as it crosses the boundary into the
/// engine. Validated before any mutation; the fee is set by service
/// configuration, not by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWithdrawal {
    /// External user identifier.
    pub user_id: String,
    /// Amount to transfer, in base units.
    pub amount: i64,
    /// Destination address.
    pub to_address: String,
    /// Network label; must match the service's configured network.
    pub network: String,
}

/// Errors surfaced by the withdrawal engine.
#[derive(Debug, Error)]
pub enum WithdrawalError {
    /// Bad input; rejected before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Available balance does not cover amount + fee; no mutation.
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    /// Today's cumulative withdrawals would exceed the daily limit.
    #[error("daily withdrawal limit exceeded: {attempted} over limit {limit}")]
    DailyLimitExceeded { limit: i64, attempted: i64 },

    /// The execution queue is at capacity; the reservation was rolled
    /// back before this was returned.
    #[error("withdrawal execution queue is full")]
    QueueFull,

    /// The treasury key could not be resolved. Never falls back to a
    /// default key.
    #[error(transparent)]
    Custody(#[from] CustodyError),

    /// The treasury key material is unusable.
    #[error(transparent)]
    Key(#[from] DerivationError),

    /// Underlying ledger failure.
    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for WithdrawalError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds {
                available,
                requested,
            } => WithdrawalError::InsufficientFunds {
                available,
                requested,
            },
            LedgerError::DailyLimitExceeded { limit, attempted } => {
                WithdrawalError::DailyLimitExceeded { limit, attempted }
            }
            other => WithdrawalError::Ledger(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_error_mapping() {
        let err: WithdrawalError = LedgerError::InsufficientFunds {
            available: 45,
            requested: 55,
        }
        .into();
        assert!(matches!(
            err,
            WithdrawalError::InsufficientFunds {
                available: 45,
                requested: 55
            }
        ));

        let err: WithdrawalError = LedgerError::Conflict.into();
        assert!(matches!(err, WithdrawalError::Ledger(LedgerError::Conflict)));
    }

    #[test]
    fn test_request_serde() {
        let req = NewWithdrawal {
            user_id: "42".to_string(),
            amount: 50,
            to_address: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string(),
            network: "mainnet".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let decoded: NewWithdrawal = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.amount, 50);
    }
}
