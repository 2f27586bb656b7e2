//! Consolidation sweep integration tests, against Postgres plus the mock
//! chain client. `#[ignore]`d; see `withdrawal_flow.rs` for how to run.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};

use hotwallet::config::schema::ConsolidationConfig;
use hotwallet::consolidation::{ConsolidationError, Consolidator};
use hotwallet::derivation;
use hotwallet::ledger::LedgerStore;

mod common;
use common::MockChainClient;

const TREASURY: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

fn sweep_config() -> ConsolidationConfig {
    ConsolidationConfig {
        enabled: true,
        interval_secs: 3600,
        min_sweep: 1000,
        fee_reserve: 100,
        broadcast_delay_ms: 1,
        treasury_address: TREASURY.to_string(),
    }
}

fn test_consolidator(
    ledger: LedgerStore,
    chain: Arc<MockChainClient>,
    config: ConsolidationConfig,
) -> (Arc<Consolidator>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let (custody, handle) = common::test_custody(&dir);
    let consolidator = Arc::new(Consolidator::new(ledger, chain, custody, handle, config));
    (consolidator, dir)
}

/// Create a funded deposit address and return it with its index.
async fn seeded_address(ledger: &LedgerStore, prefix: &str) -> (Address, u32) {
    let user = common::unique_user(prefix);
    let account = ledger.get_or_create_account(&user).await.unwrap();
    let index = common::unique_index();
    let derived = derivation::derive(common::TEST_MNEMONIC, index).unwrap();
    ledger
        .set_deposit_address(account.id, &derived.address.to_string(), index)
        .await
        .unwrap();
    (derived.address, index)
}

#[tokio::test]
#[ignore = "requires Postgres (DATABASE_URL)"]
async fn test_failed_address_does_not_abort_batch() {
    let ledger = common::test_ledger().await;
    let chain = MockChainClient::new();

    let (a1, _) = seeded_address(&ledger, "c-1").await;
    let (a2, _) = seeded_address(&ledger, "c-2").await;
    let (a3, _) = seeded_address(&ledger, "c-3").await;

    chain.set_balance(a1, 5000);
    chain.set_balance(a2, 5000);
    chain.set_balance(a3, 5000);
    // The middle address's broadcast blows up.
    chain.fail_sends_from(a2);

    let (consolidator, _dir) = test_consolidator(ledger.clone(), chain.clone(), sweep_config());
    let summary = consolidator.run_once().await.unwrap();

    // Other tests may have seeded sweepable addresses in the shared
    // database, so assert at-least on the counters and exactly on ours.
    assert!(summary.swept >= 2);
    assert!(summary.failed >= 1);

    let sent = chain.sent();
    let treasury: Address = TREASURY.parse().unwrap();
    for from in [a1, a3] {
        let transfer = sent
            .iter()
            .find(|(f, _, _)| *f == from)
            .unwrap_or_else(|| panic!("address {} was not swept", from));
        assert_eq!(transfer.1, treasury);
        assert_eq!(transfer.2, U256::from(4900u64)); // balance minus fee reserve
    }
    assert!(sent.iter().all(|(f, _, _)| *f != a2));

    // Sweep records exist for the two successes only.
    for (address, expect) in [(a1, true), (a2, false), (a3, true)] {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::BIGINT FROM consolidation_records WHERE from_address = $1",
        )
        .bind(address.to_string())
        .fetch_one(ledger.pool())
        .await
        .unwrap();
        assert_eq!(count > 0, expect, "record mismatch for {}", address);
    }
}

#[tokio::test]
#[ignore = "requires Postgres (DATABASE_URL)"]
async fn test_below_threshold_addresses_are_skipped() {
    let ledger = common::test_ledger().await;
    let chain = MockChainClient::new();

    let (addr, _) = seeded_address(&ledger, "c-small").await;
    chain.set_balance(addr, 999); // below min_sweep

    let (consolidator, _dir) = test_consolidator(ledger.clone(), chain.clone(), sweep_config());
    consolidator.run_once().await.unwrap();

    assert!(chain.sent().iter().all(|(f, _, _)| *f != addr));
}

#[tokio::test]
#[ignore = "requires Postgres (DATABASE_URL)"]
async fn test_overlapping_runs_are_rejected() {
    let ledger = common::test_ledger().await;
    let chain = MockChainClient::new();

    let (addr, _) = seeded_address(&ledger, "c-overlap").await;
    chain.set_balance(addr, 5000);
    // Slow the first run down so the second observes the guard.
    chain.set_balance_delay(Duration::from_millis(200));

    let (consolidator, _dir) = test_consolidator(ledger.clone(), chain.clone(), sweep_config());

    let (first, second) = tokio::join!(consolidator.run_once(), consolidator.run_once());

    let already_running = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(ConsolidationError::AlreadyRunning)))
        .count();
    assert_eq!(already_running, 1, "exactly one run must hit the guard");
    assert_eq!(
        [&first, &second].iter().filter(|r| r.is_ok()).count(),
        1,
        "exactly one run must proceed"
    );
}

#[tokio::test]
#[ignore = "requires Postgres (DATABASE_URL)"]
async fn test_invalid_treasury_aborts_before_touching_chain() {
    let ledger = common::test_ledger().await;
    let chain = MockChainClient::new();

    let mut config = sweep_config();
    config.treasury_address = "not-an-address".to_string();

    let (consolidator, _dir) = test_consolidator(ledger, chain.clone(), config);
    let result = consolidator.run_once().await;

    assert!(matches!(result, Err(ConsolidationError::InvalidTreasury(_))));
    assert!(chain.sent().is_empty());
}
