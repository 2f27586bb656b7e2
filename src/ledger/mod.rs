//! Balance ledger subsystem.
//!
//! # Data Flow
//! ```text
//! deposit notification ──▶ credit_deposit (idempotent on tx_hash)
//! withdrawal submit ─────▶ reserve_withdrawal (freeze + pending row)
//! broadcast outcome ─────▶ settle_success / settle_failure
//! reconciler ────────────▶ stale_pending → settle
//! sweep ─────────────────▶ record_consolidation
//! ```
//!
//! Invariant maintained across every operation: `balance ≥ 0`,
//! `frozen_balance ≥ 0`, and the reserved total is excluded from the
//! spendable amount while still counted in `balance` until settlement.
//! Concurrent operations on one account serialize on its row lock; that
//! lock is the system's only cross-request synchronization point.

pub mod store;
pub mod types;

pub use store::{LedgerStore, NewConsolidation};
pub use types::{
    status, Account, ConsolidationRecord, DepositOutcome, DepositRecord, LedgerError,
    LedgerResult, WithdrawalRequest,
};
