//! Application context: every shared handle, built once at startup.
//!
//! There is no global mutable state in this crate. The database pool,
//! chain client, custody store, and unlocked handle are constructed here
//! and injected by reference into each component; lifecycle is created
//! at startup, torn down at shutdown.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::chain::{ChainClient, ChainError, DepositProcessor, EvmChainClient};
use crate::config::schema::{DATABASE_URL_ENV_VAR, MASTER_PASSWORD_ENV_VAR};
use crate::config::WalletConfig;
use crate::consolidation::Consolidator;
use crate::custody::{CustodyError, SecretKind, SecretStore, UnlockedHandle};
use crate::derivation::{self, DerivationError};
use crate::ledger::{LedgerError, LedgerStore};
use crate::lifecycle::Shutdown;
use crate::withdrawal::{spawn_worker, ExecutionQueue, Reconciler, WithdrawalEngine};

/// How many consecutive indices to probe when a hashed user id collides
/// with an already-claimed derivation index.
const MAX_INDEX_PROBES: u32 = 8;

/// Top-level initialization and address-issuance errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("environment variable {0} not set")]
    MissingEnv(&'static str),

    #[error(transparent)]
    Custody(#[from] CustodyError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("could not allocate a derivation index for user {0}")]
    IndexExhausted(String),
}

/// Shared service context. Cheap to clone pieces out of; owned by main.
pub struct AppContext {
    pub config: Arc<WalletConfig>,
    pub ledger: LedgerStore,
    pub chain: Arc<dyn ChainClient>,
    pub custody: Arc<SecretStore>,
    pub handle: Arc<UnlockedHandle>,
    pub engine: Arc<WithdrawalEngine>,
    pub deposits: DepositProcessor,
    pub consolidator: Arc<Consolidator>,
    pub reconciler: Arc<Reconciler>,
    pub shutdown: Shutdown,
}

impl AppContext {
    /// Build every component from configuration and environment.
    ///
    /// Fails fast on a missing environment variable, an unreachable
    /// database, or a wrong master password; the service never starts
    /// half-wired.
    pub async fn initialize(
        config: WalletConfig,
    ) -> Result<(Self, mpsc::Receiver<Uuid>), AppError> {
        let database_url = std::env::var(DATABASE_URL_ENV_VAR)
            .map_err(|_| AppError::MissingEnv(DATABASE_URL_ENV_VAR))?;
        let master_password = std::env::var(MASTER_PASSWORD_ENV_VAR)
            .map_err(|_| AppError::MissingEnv(MASTER_PASSWORD_ENV_VAR))?;

        let custody = Arc::new(SecretStore::from_config(&config.custody)?);
        let handle = Arc::new(custody.unlock(&master_password)?);

        let ledger = LedgerStore::connect(&database_url, &config.database).await?;
        let chain: Arc<dyn ChainClient> =
            Arc::new(EvmChainClient::new(config.chain.clone()).await?);

        let (queue, queue_rx) = ExecutionQueue::new(config.withdrawal.queue_depth);
        let engine = Arc::new(WithdrawalEngine::new(
            ledger.clone(),
            chain.clone(),
            custody.clone(),
            handle.clone(),
            config.withdrawal.clone(),
            queue,
        ));
        let deposits = DepositProcessor::new(ledger.clone());
        let consolidator = Arc::new(Consolidator::new(
            ledger.clone(),
            chain.clone(),
            custody.clone(),
            handle.clone(),
            config.consolidation.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            chain.clone(),
            config.withdrawal.clone(),
        ));

        let context = Self {
            config: Arc::new(config),
            ledger,
            chain,
            custody,
            handle,
            engine,
            deposits,
            consolidator,
            reconciler,
            shutdown: Shutdown::new(),
        };
        Ok((context, queue_rx))
    }

    /// Spawn the long-running tasks: withdrawal worker, reconciler, and
    /// (when enabled) the consolidation scheduler.
    pub fn spawn_workers(&self, queue_rx: mpsc::Receiver<Uuid>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            spawn_worker(self.engine.clone(), queue_rx, &self.shutdown),
            self.reconciler.clone().spawn(&self.shutdown),
        ];
        if let Some(handle) = self.consolidator.clone().spawn(&self.shutdown) {
            handles.push(handle);
        }
        handles
    }

    /// Issue (or return the existing) deposit address for a user.
    ///
    /// The account is created on first request; the address and its
    /// derivation index are persisted exactly once. Subscription
    /// registration with the provider is best-effort and retried on the
    /// next call if it failed.
    pub async fn deposit_address(&self, user_id: &str) -> Result<String, AppError> {
        let account = self.ledger.get_or_create_account(user_id).await?;

        if let Some(address) = account.deposit_address.clone() {
            if account.subscription_id.is_none() {
                self.register_subscription(account.id, &address).await;
            }
            return Ok(address);
        }

        let seed = self
            .custody
            .get_secret_string(SecretKind::MasterSeed, &self.handle)?;

        let mut index = derivation::derivation_index(user_id);
        for _ in 0..MAX_INDEX_PROBES {
            let derived = derivation::derive(&seed, index)?;
            let address = derived.address.to_string();

            match self
                .ledger
                .set_deposit_address(account.id, &address, index)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        user_id,
                        account_id = account.id,
                        address = %address,
                        index,
                        "deposit address issued"
                    );
                    self.register_subscription(account.id, &address).await;
                    return Ok(address);
                }
                Err(LedgerError::IndexTaken) => {
                    tracing::warn!(user_id, index, "derivation index collision, probing next");
                    index = index.wrapping_add(1) & 0x7fff_ffff;
                }
                Err(LedgerError::AccountNotFound(_)) => {
                    // Lost the race against a concurrent issuance; the
                    // address is set now.
                    let account = self.ledger.account_by_id(account.id).await?;
                    if let Some(address) = account.deposit_address {
                        return Ok(address);
                    }
                    return Err(AppError::Ledger(LedgerError::AccountNotFound(
                        user_id.to_string(),
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::IndexExhausted(user_id.to_string()))
    }

    /// Register the provider subscription for an address; failures are
    /// logged, not propagated.
    async fn register_subscription(&self, account_id: i64, address: &str) {
        let callback = &self.config.chain.deposit_callback_url;
        if self.config.chain.subscription_url.is_empty() || callback.is_empty() {
            return;
        }

        let parsed = match address.parse() {
            Ok(a) => a,
            Err(_) => return,
        };

        match self.chain.subscribe(parsed, callback).await {
            Ok(subscription_id) => {
                if let Err(e) = self
                    .ledger
                    .set_subscription(account_id, &subscription_id)
                    .await
                {
                    tracing::error!(account_id, error = %e, "failed to persist subscription id");
                } else {
                    tracing::info!(account_id, subscription_id = %subscription_id, "address subscription registered");
                }
            }
            Err(e) => {
                tracing::warn!(
                    account_id,
                    address = %address,
                    error = %e,
                    "subscription registration failed, will retry on next issuance call"
                );
            }
        }
    }

    /// Trigger shutdown, wait for workers, and flush the audit log.
    pub async fn teardown(&self, handles: Vec<JoinHandle<()>>) {
        self.shutdown.trigger();
        for handle in handles {
            let _ = handle.await;
        }
        if let Err(e) = self.custody.flush_audit() {
            tracing::error!(error = %e, "failed to flush audit log on shutdown");
        }
    }
}
