//! Chain-specific types and error definitions.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during blockchain operations. Any failure from
/// the RPC provider surfaces as one of these; a broadcast that errors is
/// never treated as a success.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Transaction could not be built, signed, or broadcast.
    #[error("broadcast failed: {0}")]
    Broadcast(String),

    /// Gas price exceeded maximum allowed.
    #[error("gas price {current_gwei} gwei exceeds maximum {max_gwei} gwei")]
    GasPriceTooHigh { current_gwei: u64, max_gwei: u64 },

    /// Address could not be parsed for this chain.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Address-subscription registration failed.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// The requested capability is not configured.
    #[error("chain client not available: {0}")]
    NotAvailable(String),
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Transaction confirmation status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Transaction is pending in the mempool (no receipt yet).
    Pending,
    /// Transaction has been mined but not enough confirmations.
    Confirming { current: u32, required: u32 },
    /// Transaction is confirmed with required block depth.
    Confirmed { block_number: u64 },
    /// Transaction failed or was reverted on-chain.
    Failed(String),
}

/// Inbound notification of a transfer into a watched deposit address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositNotification {
    /// The deposit address that received funds.
    pub address: String,
    /// Amount received, in base units.
    pub amount: i64,
    /// The transaction hash (idempotency key).
    pub tx_hash: String,
    /// Block the transfer was included in.
    pub block_number: u64,
}

/// Widen a ledger amount to the chain's integer type.
pub fn amount_to_u256(amount: i64) -> U256 {
    U256::from(amount.max(0) as u64)
}

/// Narrow an on-chain balance to a ledger amount, clamping anything that
/// will not fit.
pub fn u256_to_amount(value: U256) -> i64 {
    if value > U256::from(i64::MAX as u64) {
        tracing::warn!(value = %value, "on-chain balance exceeds ledger range, clamping");
        i64::MAX
    } else {
        value.to::<u64>() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChainError::Timeout(10);
        assert_eq!(err.to_string(), "RPC timeout after 10 seconds");

        let err = ChainError::GasPriceTooHigh {
            current_gwei: 600,
            max_gwei: 500,
        };
        assert!(err.to_string().contains("600"));
    }

    #[test]
    fn test_notification_serde() {
        let event = DepositNotification {
            address: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string(),
            amount: 1000,
            tx_hash: "0xabc".to_string(),
            block_number: 100,
        };
        let json = serde_json::to_string(&event).unwrap();
        let decoded: DepositNotification = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.amount, 1000);
        assert_eq!(decoded.tx_hash, "0xabc");
    }

    #[test]
    fn test_amount_conversions() {
        assert_eq!(amount_to_u256(1000), U256::from(1000u64));
        assert_eq!(u256_to_amount(U256::from(1000u64)), 1000);
        assert_eq!(u256_to_amount(U256::MAX), i64::MAX);
    }
}
