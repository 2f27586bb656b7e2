//! Deposit-address consolidation sweeps.
//!
//! The withdrawal engine pays out of the treasury's on-chain balance, so
//! funds sitting in per-user deposit addresses are periodically swept
//! into the treasury. Each address is handled independently; one
//! failure never aborts the batch. Overlapping runs are prevented by an
//! in-process guard only; sweeps are idempotent per address, since an
//! already-swept address simply reads below the threshold next time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::chain::types::{amount_to_u256, u256_to_amount};
use crate::chain::{ChainClient, ChainError};
use crate::config::ConsolidationConfig;
use crate::custody::{CustodyError, SecretKind, SecretStore, UnlockedHandle};
use crate::derivation::{self, DerivationError};
use crate::ledger::{LedgerError, LedgerStore, NewConsolidation};
use crate::lifecycle::Shutdown;

/// Outcome counts for one sweep run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    /// Addresses swept into the treasury.
    pub swept: usize,
    /// Addresses below the sweep threshold.
    pub skipped: usize,
    /// Addresses whose sweep failed; recorded and skipped over.
    pub failed: usize,
}

/// Errors that abort a whole run (as opposed to one address).
#[derive(Debug, Error)]
pub enum ConsolidationError {
    /// Another run is in progress; this one did nothing.
    #[error("a consolidation run is already in progress")]
    AlreadyRunning,

    /// Configured treasury address does not parse.
    #[error("invalid treasury address: {0}")]
    InvalidTreasury(String),

    /// The master seed could not be resolved.
    #[error(transparent)]
    Custody(#[from] CustodyError),

    /// Candidate addresses could not be listed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Per-address sweep failures; logged and counted, never fatal.
#[derive(Debug, Error)]
enum SweepError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Derivation(#[from] DerivationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("stored deposit address {stored} does not match derived {derived}")]
    AddressMismatch { stored: String, derived: String },
}

enum SweepOutcome {
    Swept,
    BelowThreshold,
}

/// Periodic and on-demand consolidation of deposit addresses.
pub struct Consolidator {
    ledger: LedgerStore,
    chain: Arc<dyn ChainClient>,
    custody: Arc<SecretStore>,
    handle: Arc<UnlockedHandle>,
    config: ConsolidationConfig,
    running: AtomicBool,
}

impl Consolidator {
    pub fn new(
        ledger: LedgerStore,
        chain: Arc<dyn ChainClient>,
        custody: Arc<SecretStore>,
        handle: Arc<UnlockedHandle>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            ledger,
            chain,
            custody,
            handle,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Run one sweep over every candidate address. Serialized against
    /// itself by the in-process running guard.
    pub async fn run_once(&self) -> Result<SweepSummary, ConsolidationError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ConsolidationError::AlreadyRunning);
        }

        let result = self.sweep_all().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn sweep_all(&self) -> Result<SweepSummary, ConsolidationError> {
        let treasury: Address = self
            .config
            .treasury_address
            .parse()
            .map_err(|_| ConsolidationError::InvalidTreasury(self.config.treasury_address.clone()))?;

        let seed = self
            .custody
            .get_secret_string(SecretKind::MasterSeed, &self.handle)?;

        let accounts = self.ledger.sweepable_accounts().await?;
        tracing::info!(candidates = accounts.len(), "consolidation run started");

        let mut summary = SweepSummary::default();
        for account in accounts {
            let (address, index) = match (&account.deposit_address, account.derivation_index) {
                (Some(a), Some(i)) => (a.clone(), i as u32),
                _ => continue,
            };

            match self.sweep_address(&seed, &address, index, treasury).await {
                Ok(SweepOutcome::Swept) => summary.swept += 1,
                Ok(SweepOutcome::BelowThreshold) => {
                    summary.skipped += 1;
                    continue; // nothing was broadcast, no need to pace
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        address = %address,
                        account_id = account.id,
                        error = %e,
                        "sweep failed, continuing with remaining addresses"
                    );
                }
            }

            // Pace consecutive broadcasts for the provider's rate limits.
            tokio::time::sleep(Duration::from_millis(self.config.broadcast_delay_ms)).await;
        }

        tracing::info!(
            swept = summary.swept,
            skipped = summary.skipped,
            failed = summary.failed,
            "consolidation run finished"
        );
        Ok(summary)
    }

    async fn sweep_address(
        &self,
        seed: &str,
        address_str: &str,
        index: u32,
        treasury: Address,
    ) -> Result<SweepOutcome, SweepError> {
        let address: Address = address_str
            .parse()
            .map_err(|e| ChainError::InvalidAddress(format!("{}: {}", address_str, e)))?;

        let balance = u256_to_amount(self.chain.get_balance(address).await?);
        if balance < self.config.min_sweep {
            return Ok(SweepOutcome::BelowThreshold);
        }

        let amount = balance - self.config.fee_reserve;
        if amount <= 0 {
            return Ok(SweepOutcome::BelowThreshold);
        }

        let derived = derivation::derive(seed, index)?;
        if derived.address != address {
            return Err(SweepError::AddressMismatch {
                stored: address_str.to_string(),
                derived: derived.address.to_string(),
            });
        }

        let tx_hash = self
            .chain
            .send_asset(&derived.signer, treasury, amount_to_u256(amount))
            .await?;

        let record = self
            .ledger
            .record_consolidation(NewConsolidation {
                from_address: address_str.to_string(),
                to_address: treasury.to_string(),
                amount,
                transaction_id: tx_hash.to_string(),
            })
            .await?;

        tracing::info!(
            record_id = record.id,
            from = %address_str,
            amount,
            tx_hash = %tx_hash,
            "address swept to treasury"
        );
        Ok(SweepOutcome::Swept)
    }

    /// Spawn the scheduled sweep loop; does nothing when disabled.
    pub fn spawn(self: Arc<Self>, shutdown: &Shutdown) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("consolidation scheduler disabled");
            return None;
        }

        let mut shutdown_rx = shutdown.subscribe();
        let interval = Duration::from_secs(self.config.interval_secs.max(1));

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // don't sweep at startup
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("consolidation scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.run_once().await {
                            Ok(_) => {}
                            Err(ConsolidationError::AlreadyRunning) => {
                                tracing::debug!("scheduled sweep skipped, manual run in progress");
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "consolidation run failed");
                            }
                        }
                    }
                }
            }
        }))
    }
}
