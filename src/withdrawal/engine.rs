//! Withdrawal engine: validate → reserve → execute → settle.
//!
//! # State machine
//! ```text
//! submit: validate (pure) → reserve (one locked transaction:
//!         available check, daily-limit check, freeze + pending row)
//!         → enqueue → caller sees `pending`
//! worker: treasury signer ← custody → send_asset → mark_broadcast
//!         → settle_success, or settle_failure on any chain error
//! ```
//!
//! Between reserve and settle the reserved total is excluded from the
//! spendable amount but still counted in `balance`. A crash anywhere in
//! execute leaves a `pending` row the reconciler resolves.

use std::sync::Arc;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use uuid::Uuid;

use crate::chain::types::amount_to_u256;
use crate::chain::ChainClient;
use crate::config::WithdrawalConfig;
use crate::custody::{SecretKind, SecretStore, UnlockedHandle};
use crate::derivation::signer_from_hex;
use crate::ledger::{LedgerError, LedgerStore, WithdrawalRequest};
use crate::resilience::RetryPolicy;
use crate::withdrawal::queue::ExecutionQueue;
use crate::withdrawal::types::{NewWithdrawal, WithdrawalError};
use crate::withdrawal::validation::validate;

/// Orchestrates the withdrawal lifecycle against ledger, custody, and
/// chain. One instance is shared by the submit path and the worker.
pub struct WithdrawalEngine {
    ledger: LedgerStore,
    chain: Arc<dyn ChainClient>,
    custody: Arc<SecretStore>,
    handle: Arc<UnlockedHandle>,
    config: WithdrawalConfig,
    queue: ExecutionQueue,
    retry: RetryPolicy,
}

impl WithdrawalEngine {
    pub fn new(
        ledger: LedgerStore,
        chain: Arc<dyn ChainClient>,
        custody: Arc<SecretStore>,
        handle: Arc<UnlockedHandle>,
        config: WithdrawalConfig,
        queue: ExecutionQueue,
    ) -> Self {
        let retry = RetryPolicy::new(
            config.lock_retry_attempts,
            config.lock_retry_base_ms,
            config.lock_retry_max_ms,
        );
        Self {
            ledger,
            chain,
            custody,
            handle,
            config,
            queue,
            retry,
        }
    }

    /// Validate and reserve a withdrawal, then hand it to the worker.
    ///
    /// Returns the `pending` request immediately; the terminal state is
    /// discoverable later via [`LedgerStore::withdrawal_by_id`].
    pub async fn submit(
        &self,
        request: NewWithdrawal,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        let to_address = validate(&request, &self.config)?;

        let account = self
            .ledger
            .account_by_user(&request.user_id)
            .await?
            .ok_or_else(|| {
                WithdrawalError::Validation(format!("no account for user {}", request.user_id))
            })?;

        let fee = self.config.fee;
        let destination = to_address.to_string();
        let reserved = self
            .retry
            .run(
                |e: &LedgerError| matches!(e, LedgerError::Conflict),
                || {
                    self.ledger.reserve_withdrawal(
                        account.id,
                        request.amount,
                        fee,
                        &destination,
                        &request.network,
                        self.config.daily_limit,
                    )
                },
            )
            .await?;

        tracing::info!(
            withdrawal_id = %reserved.id,
            account_id = account.id,
            amount = reserved.amount,
            fee = reserved.fee,
            to = %reserved.to_address,
            "withdrawal reserved"
        );

        if let Err(e) = self.queue.enqueue(reserved.id) {
            // Undo the reservation before reporting backpressure.
            match self
                .ledger
                .settle_failure(reserved.id, "execution queue full")
                .await
            {
                Ok(_) => tracing::warn!(
                    withdrawal_id = %reserved.id,
                    "queue full, reservation rolled back"
                ),
                Err(rollback_err) => tracing::error!(
                    withdrawal_id = %reserved.id,
                    error = %rollback_err,
                    "queue full and rollback failed; reconciler will resolve"
                ),
            }
            return Err(e);
        }

        Ok(reserved)
    }

    /// Worker entry point: execute one queued withdrawal. Errors are
    /// logged, never propagated; the ledger row carries the outcome.
    pub async fn execute(&self, withdrawal_id: Uuid) {
        if let Err(e) = self.try_execute(withdrawal_id).await {
            tracing::error!(
                withdrawal_id = %withdrawal_id,
                error = %e,
                "withdrawal execution failed"
            );
        }
    }

    async fn try_execute(&self, withdrawal_id: Uuid) -> Result<(), WithdrawalError> {
        let request = self.ledger.withdrawal_by_id(withdrawal_id).await?;
        if !request.is_pending() {
            tracing::debug!(withdrawal_id = %withdrawal_id, status = %request.status, "skipping settled withdrawal");
            return Ok(());
        }

        let to: Address = match request.to_address.parse() {
            Ok(a) => a,
            Err(e) => {
                // Cannot happen for rows created through submit; resolve
                // rather than leave the reservation dangling.
                self.fail(&request, &format!("unparseable destination: {}", e))
                    .await;
                return Ok(());
            }
        };

        let signer = match self.treasury_signer() {
            Ok(s) => s,
            Err(e) => {
                self.fail(&request, &format!("key custody error: {}", e))
                    .await;
                return Err(e);
            }
        };

        match self
            .chain
            .send_asset(&signer, to, amount_to_u256(request.amount))
            .await
        {
            Ok(tx_hash) => {
                let hash = tx_hash.to_string();
                if let Err(e) = self.ledger.mark_broadcast(withdrawal_id, &hash).await {
                    tracing::error!(
                        withdrawal_id = %withdrawal_id,
                        tx_hash = %hash,
                        error = %e,
                        "failed to record broadcast hash"
                    );
                }
                match self.ledger.settle_success(withdrawal_id, &hash).await {
                    Ok(settled) => {
                        tracing::info!(
                            withdrawal_id = %withdrawal_id,
                            tx_hash = %hash,
                            amount = settled.amount,
                            "withdrawal completed"
                        );
                    }
                    Err(LedgerError::AlreadySettled(_)) => {
                        tracing::debug!(withdrawal_id = %withdrawal_id, "already settled");
                    }
                    Err(e) => {
                        // Hash is recorded; the reconciler finishes this
                        // from chain status.
                        tracing::error!(
                            withdrawal_id = %withdrawal_id,
                            error = %e,
                            "settlement failed after broadcast"
                        );
                    }
                }
            }
            Err(chain_err) => {
                tracing::warn!(
                    withdrawal_id = %withdrawal_id,
                    error = %chain_err,
                    "broadcast failed, releasing reservation"
                );
                self.fail(&request, &chain_err.to_string()).await;
            }
        }

        Ok(())
    }

    /// Resolve a pending request to `failed`, unfreezing its reservation.
    async fn fail(&self, request: &WithdrawalRequest, reason: &str) {
        match self.ledger.settle_failure(request.id, reason).await {
            Ok(_) => {}
            Err(LedgerError::AlreadySettled(_)) => {
                tracing::debug!(withdrawal_id = %request.id, "already settled");
            }
            Err(e) => {
                tracing::error!(
                    withdrawal_id = %request.id,
                    error = %e,
                    "failed to release reservation; reconciler will resolve"
                );
            }
        }
    }

    fn treasury_signer(&self) -> Result<PrivateKeySigner, WithdrawalError> {
        let key_hex = self
            .custody
            .get_secret_string(SecretKind::TreasuryKey, &self.handle)?;
        Ok(signer_from_hex(&key_hex)?)
    }
}
