//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! ChainConfig (RPC URLs, gas policy)
//!     → client.rs (EvmChainClient: failover, timeouts, broadcast)
//!     → deposits.rs (inbound notifications → idempotent ledger credit)
//! ```
//!
//! The core depends only on the [`ChainClient`] trait; the EVM
//! implementation is one adapter behind it, and tests substitute a
//! programmable mock.
//!
//! # Security Constraints
//! - Signers are passed in per call and never stored or logged
//! - All RPC calls have configurable timeouts
//! - A broadcast error is always surfaced, never treated as success

pub mod client;
pub mod deposits;
pub mod types;

use alloy::primitives::{Address, TxHash, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;

pub use client::EvmChainClient;
pub use deposits::DepositProcessor;
pub use types::{ChainError, ChainResult, DepositNotification, TxStatus};

/// RPC provider contract the core consumes. All calls may fail
/// transiently; every error is routed to failure handling, never
/// swallowed.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current on-chain balance of an address.
    async fn get_balance(&self, address: Address) -> ChainResult<U256>;

    /// Sign and broadcast a transfer, returning the transaction hash.
    async fn send_asset(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        amount: U256,
    ) -> ChainResult<TxHash>;

    /// Confirmation status of a previously broadcast transaction.
    async fn get_transaction_status(&self, tx_hash: TxHash) -> ChainResult<TxStatus>;

    /// Register an address-activity subscription, returning the
    /// provider's subscription id.
    async fn subscribe(&self, address: Address, callback_url: &str) -> ChainResult<String>;
}
