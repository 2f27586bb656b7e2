//! Inbound deposit-credit processing.
//!
//! The provider's address-activity subscription delivers notifications
//! `{address, amount, txHash, blockNumber}`; transport is a caller
//! concern. Processing is idempotent on the transaction hash: a
//! duplicate notification credits nothing.

use alloy::primitives::Address;

use crate::chain::types::DepositNotification;
use crate::ledger::{DepositOutcome, LedgerResult, LedgerStore};

/// Applies deposit notifications to the ledger.
#[derive(Clone)]
pub struct DepositProcessor {
    ledger: LedgerStore,
}

impl DepositProcessor {
    pub fn new(ledger: LedgerStore) -> Self {
        Self { ledger }
    }

    /// Credit one notification. Safe to call any number of times with
    /// the same transaction hash.
    pub async fn process(&self, notification: DepositNotification) -> LedgerResult<DepositOutcome> {
        if notification.amount <= 0 {
            tracing::warn!(
                tx_hash = %notification.tx_hash,
                amount = notification.amount,
                "rejecting deposit notification with non-positive amount"
            );
            return Ok(DepositOutcome::Rejected {
                reason: "non-positive amount".to_string(),
            });
        }
        if notification.tx_hash.is_empty() {
            return Ok(DepositOutcome::Rejected {
                reason: "missing transaction hash".to_string(),
            });
        }

        // Normalize to the checksummed form addresses are stored in.
        let address = match notification.address.parse::<Address>() {
            Ok(a) => a.to_string(),
            Err(e) => {
                tracing::warn!(
                    address = %notification.address,
                    error = %e,
                    "rejecting deposit notification with unparseable address"
                );
                return Ok(DepositOutcome::Rejected {
                    reason: format!("invalid address: {}", e),
                });
            }
        };

        let outcome = self
            .ledger
            .credit_deposit(
                &address,
                notification.amount,
                &notification.tx_hash,
                notification.block_number,
            )
            .await?;

        match &outcome {
            DepositOutcome::Credited { account_id, amount } => {
                tracing::info!(
                    account_id,
                    amount,
                    tx_hash = %notification.tx_hash,
                    block_number = notification.block_number,
                    "deposit credited"
                );
            }
            DepositOutcome::Duplicate => {
                tracing::debug!(
                    tx_hash = %notification.tx_hash,
                    "duplicate deposit notification ignored"
                );
            }
            DepositOutcome::UnknownAddress => {
                tracing::warn!(
                    address = %address,
                    tx_hash = %notification.tx_hash,
                    "deposit notification for unknown address"
                );
            }
            DepositOutcome::Rejected { .. } => {}
        }

        Ok(outcome)
    }
}
