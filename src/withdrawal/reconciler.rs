//! Reconciliation sweep for stuck pending withdrawals.
//!
//! A `pending` row with no terminal transition is the recoverable state:
//! the worker crashed, the process restarted, or settlement failed after
//! broadcast. On a timer this pass finds pending rows past the timeout
//! and resolves them:
//! - no recorded tx hash → the transfer never left this process; the
//!   reservation is released and the row fails
//! - recorded tx hash → the chain decides: confirmed settles success,
//!   reverted settles failure, still in flight stays pending for the
//!   next pass

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::TxHash;
use tokio::task::JoinHandle;

use crate::chain::{ChainClient, TxStatus};
use crate::config::WithdrawalConfig;
use crate::ledger::{LedgerError, LedgerStore, WithdrawalRequest};
use crate::lifecycle::Shutdown;

/// Outcome counts for one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Rolled back: expired before any broadcast.
    pub expired: usize,
    /// Settled as completed from chain state.
    pub completed: usize,
    /// Settled as failed from chain state.
    pub failed: usize,
    /// Left pending (transfer still in flight).
    pub in_flight: usize,
    /// Could not be resolved this pass (RPC or DB error).
    pub errors: usize,
}

/// Periodic resolver for stale pending withdrawals.
pub struct Reconciler {
    ledger: LedgerStore,
    chain: Arc<dyn ChainClient>,
    config: WithdrawalConfig,
}

impl Reconciler {
    pub fn new(ledger: LedgerStore, chain: Arc<dyn ChainClient>, config: WithdrawalConfig) -> Self {
        Self {
            ledger,
            chain,
            config,
        }
    }

    /// Run one pass over every stale pending request.
    pub async fn run_once(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let timeout = Duration::from_secs(self.config.pending_timeout_secs);
        let stale = match self.ledger.stale_pending(timeout).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "reconciler could not list stale withdrawals");
                summary.errors += 1;
                return summary;
            }
        };

        if stale.is_empty() {
            return summary;
        }
        tracing::info!(count = stale.len(), "reconciling stale pending withdrawals");

        for request in stale {
            self.resolve(&request, &mut summary).await;
        }

        tracing::info!(
            expired = summary.expired,
            completed = summary.completed,
            failed = summary.failed,
            in_flight = summary.in_flight,
            errors = summary.errors,
            "reconciliation pass finished"
        );
        summary
    }

    async fn resolve(&self, request: &WithdrawalRequest, summary: &mut ReconcileSummary) {
        let hash_str = match &request.tx_hash {
            None => {
                // Never broadcast; safe to roll back.
                match self
                    .ledger
                    .settle_failure(request.id, "expired before broadcast")
                    .await
                {
                    Ok(_) => {
                        tracing::warn!(
                            withdrawal_id = %request.id,
                            age_secs = (chrono::Utc::now() - request.created_at).num_seconds(),
                            "expired stale withdrawal, funds unfrozen"
                        );
                        summary.expired += 1;
                    }
                    Err(LedgerError::AlreadySettled(_)) => {}
                    Err(e) => {
                        tracing::error!(withdrawal_id = %request.id, error = %e, "failed to expire withdrawal");
                        summary.errors += 1;
                    }
                }
                return;
            }
            Some(h) => h,
        };

        let tx_hash: TxHash = match hash_str.parse() {
            Ok(h) => h,
            Err(e) => {
                tracing::error!(
                    withdrawal_id = %request.id,
                    tx_hash = %hash_str,
                    error = %e,
                    "recorded broadcast hash does not parse"
                );
                summary.errors += 1;
                return;
            }
        };

        match self.chain.get_transaction_status(tx_hash).await {
            Ok(TxStatus::Confirmed { block_number }) => {
                match self.ledger.settle_success(request.id, hash_str).await {
                    Ok(_) => {
                        tracing::info!(
                            withdrawal_id = %request.id,
                            tx_hash = %hash_str,
                            block_number,
                            "settled broadcast withdrawal from chain state"
                        );
                        summary.completed += 1;
                    }
                    Err(LedgerError::AlreadySettled(_)) => {}
                    Err(e) => {
                        tracing::error!(withdrawal_id = %request.id, error = %e, "settlement failed");
                        summary.errors += 1;
                    }
                }
            }
            Ok(TxStatus::Failed(reason)) => {
                match self.ledger.settle_failure(request.id, &reason).await {
                    Ok(_) => {
                        tracing::warn!(
                            withdrawal_id = %request.id,
                            reason = %reason,
                            "broadcast transaction failed on-chain, funds unfrozen"
                        );
                        summary.failed += 1;
                    }
                    Err(LedgerError::AlreadySettled(_)) => {}
                    Err(e) => {
                        tracing::error!(withdrawal_id = %request.id, error = %e, "failure settlement failed");
                        summary.errors += 1;
                    }
                }
            }
            Ok(TxStatus::Pending) | Ok(TxStatus::Confirming { .. }) => {
                // Irreversible once broadcast; wait for the chain.
                summary.in_flight += 1;
            }
            Err(e) => {
                tracing::warn!(
                    withdrawal_id = %request.id,
                    tx_hash = %hash_str,
                    error = %e,
                    "could not query broadcast status"
                );
                summary.errors += 1;
            }
        }
    }

    /// Spawn the interval loop.
    pub fn spawn(self: Arc<Self>, shutdown: &Shutdown) -> JoinHandle<()> {
        let mut shutdown_rx = shutdown.subscribe();
        let interval = Duration::from_secs(self.config.reconcile_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick resolves anything left over from a
            // previous run.
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("reconciler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        })
    }
}
