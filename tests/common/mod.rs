//! Shared collaborators for integration tests: a programmable mock chain
//! client and helpers for building ledger/custody fixtures.
//!
//! Tests that need Postgres read `DATABASE_URL` and are `#[ignore]`d so
//! the default test run stays hermetic.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{keccak256, Address, TxHash, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use uuid::Uuid;

use hotwallet::chain::{ChainClient, ChainError, ChainResult, TxStatus};
use hotwallet::config::schema::DatabaseConfig;
use hotwallet::custody::{AccessLog, SecretKind, SecretStore, UnlockedHandle};
use hotwallet::ledger::LedgerStore;

/// Anvil/Hardhat's well-known test mnemonic.
pub const TEST_MNEMONIC: &str =
    "test test test test test test test test test test test junk";

/// Anvil's first account private key (the tests' treasury).
pub const TEST_TREASURY_KEY: &str =
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub const TEST_PASSWORD: &str = "integration-test-password";

/// A recorded broadcast: (from, to, amount).
pub type SentTransfer = (Address, Address, U256);

/// Programmable in-memory chain client.
#[derive(Default)]
pub struct MockChainClient {
    balances: Mutex<HashMap<Address, U256>>,
    statuses: Mutex<HashMap<TxHash, TxStatus>>,
    fail_sends_from: Mutex<HashSet<Address>>,
    fail_all_sends: AtomicBool,
    sent: Mutex<Vec<SentTransfer>>,
    send_count: AtomicU64,
    balance_delay: Mutex<Option<Duration>>,
}

impl MockChainClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_balance(&self, address: Address, amount: u64) {
        self.balances
            .lock()
            .unwrap()
            .insert(address, U256::from(amount));
    }

    /// Make every broadcast fail with a `ChainError`.
    pub fn fail_all_sends(&self, fail: bool) {
        self.fail_all_sends.store(fail, Ordering::SeqCst);
    }

    /// Make broadcasts signed by this address fail.
    pub fn fail_sends_from(&self, address: Address) {
        self.fail_sends_from.lock().unwrap().insert(address);
    }

    /// Override the reported status of a transaction.
    pub fn set_status(&self, tx_hash: TxHash, status: TxStatus) {
        self.statuses.lock().unwrap().insert(tx_hash, status);
    }

    /// Add latency to balance queries (overlap-guard tests).
    pub fn set_balance_delay(&self, delay: Duration) {
        *self.balance_delay.lock().unwrap() = Some(delay);
    }

    pub fn sent(&self) -> Vec<SentTransfer> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_balance(&self, address: Address) -> ChainResult<U256> {
        let delay = *self.balance_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn send_asset(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        amount: U256,
    ) -> ChainResult<TxHash> {
        let from = signer.address();
        if self.fail_all_sends.load(Ordering::SeqCst)
            || self.fail_sends_from.lock().unwrap().contains(&from)
        {
            return Err(ChainError::Broadcast("simulated broadcast failure".to_string()));
        }

        self.sent.lock().unwrap().push((from, to, amount));
        let n = self.send_count.fetch_add(1, Ordering::SeqCst);
        Ok(keccak256(n.to_be_bytes()))
    }

    async fn get_transaction_status(&self, tx_hash: TxHash) -> ChainResult<TxStatus> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&tx_hash)
            .cloned()
            .unwrap_or(TxStatus::Confirmed { block_number: 1 }))
    }

    async fn subscribe(&self, address: Address, _callback_url: &str) -> ChainResult<String> {
        Ok(format!("sub-{}", address))
    }
}

/// Connect to the test database and apply migrations.
pub async fn test_ledger() -> LedgerStore {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a test Postgres instance");
    let store = LedgerStore::connect(&url, &DatabaseConfig::default())
        .await
        .expect("connect test database");
    store.migrate().await.expect("apply migrations");
    store
}

/// A custody store provisioned with the test seed and treasury key.
pub fn test_custody(dir: &tempfile::TempDir) -> (Arc<SecretStore>, Arc<UnlockedHandle>) {
    let audit = AccessLog::new(dir.path().join("access.log"), 100);
    let store = SecretStore::open(
        dir.path().join("secrets.json"),
        Duration::from_secs(300),
        8,
        audit,
    )
    .expect("open custody store");

    store
        .store_secret(SecretKind::MasterSeed, TEST_MNEMONIC.as_bytes(), TEST_PASSWORD)
        .expect("store master seed");
    store
        .store_secret(
            SecretKind::TreasuryKey,
            TEST_TREASURY_KEY.as_bytes(),
            TEST_PASSWORD,
        )
        .expect("store treasury key");

    let handle = store.unlock(TEST_PASSWORD).expect("unlock");
    (Arc::new(store), Arc::new(handle))
}

/// A user id no other test run will collide with.
pub fn unique_user(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// A (probably) unclaimed derivation index for fixture accounts.
pub fn unique_index() -> u32 {
    (Uuid::new_v4().as_u128() % (1 << 31)) as u32
}

/// Create an account with a deposit address and a settled balance.
pub async fn fund_account(
    ledger: &LedgerStore,
    user_id: &str,
    amount: i64,
) -> hotwallet::ledger::Account {
    let account = ledger
        .get_or_create_account(user_id)
        .await
        .expect("create account");

    let index = unique_index();
    let derived = hotwallet::derivation::derive(TEST_MNEMONIC, index).expect("derive");
    ledger
        .set_deposit_address(account.id, &derived.address.to_string(), index)
        .await
        .expect("set deposit address");

    if amount > 0 {
        ledger
            .credit_deposit(
                &derived.address.to_string(),
                amount,
                &format!("0xfund-{}", Uuid::new_v4()),
                1,
            )
            .await
            .expect("fund account");
    }

    ledger
        .account_by_id(account.id)
        .await
        .expect("reload account")
}
