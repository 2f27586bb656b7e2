//! Ledger row models and error definitions.
//!
//! Amounts are `i64` base units everywhere; the chain adapter widens to
//! `U256` at the boundary. Status columns are plain text matching the
//! constants below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// Withdrawal request lifecycle states. `pending` transitions exactly
/// once to `completed` or `failed`; terminal rows are immutable.
pub mod status {
    pub const PENDING: &str = "pending";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

/// Account statuses. Accounts are never hard-deleted.
pub mod account_status {
    pub const ACTIVE: &str = "active";
    pub const SUSPENDED: &str = "suspended";
}

/// Database model for an account row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    /// External user identifier.
    pub user_id: String,
    /// Settled, spendable balance.
    pub balance: i64,
    /// Reserved, in-flight balance. Carved out of `balance` only at
    /// settlement, not at reservation.
    pub frozen_balance: i64,
    /// The user's deposit address, set once on first issuance.
    pub deposit_address: Option<String>,
    /// HD derivation index the address was derived at.
    pub derivation_index: Option<i64>,
    /// External address-monitor subscription handle.
    pub subscription_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Spendable amount: settled balance minus in-flight reservations.
    pub fn available(&self) -> i64 {
        self.balance - self.frozen_balance
    }
}

/// Database model for a withdrawal request.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub account_id: i64,
    pub amount: i64,
    pub fee: i64,
    pub status: String,
    pub to_address: String,
    pub network: String,
    /// Set when the transfer is broadcast; present on completed rows and
    /// on pending rows whose broadcast succeeded but settlement has not
    /// yet run.
    pub tx_hash: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WithdrawalRequest {
    /// The amount reserved for this request.
    pub fn total(&self) -> i64 {
        self.amount + self.fee
    }

    pub fn is_pending(&self) -> bool {
        self.status == status::PENDING
    }
}

/// Database model for a credited deposit. `tx_hash` is the primary key;
/// duplicate notifications for the same hash insert nothing.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DepositRecord {
    pub tx_hash: String,
    pub account_id: i64,
    pub amount: i64,
    pub block_number: Option<i64>,
    pub credited_at: DateTime<Utc>,
}

/// Database model for one successful sweep, append-only.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ConsolidationRecord {
    pub id: i64,
    pub from_address: String,
    pub to_address: String,
    pub amount: i64,
    pub transaction_id: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of processing one deposit notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositOutcome {
    /// Balance credited.
    Credited { account_id: i64, amount: i64 },
    /// The transaction hash was already processed; nothing changed.
    Duplicate,
    /// No account owns this deposit address.
    UnknownAddress,
    /// The notification itself was malformed; nothing changed.
    Rejected { reason: String },
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No account matches the given identifier.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// No withdrawal request matches the given id.
    #[error("withdrawal not found: {0}")]
    WithdrawalNotFound(Uuid),

    /// Available balance does not cover amount + fee. No mutation occurred.
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    /// Today's cumulative withdrawals would exceed the daily limit.
    #[error("daily withdrawal limit exceeded: {attempted} over limit {limit}")]
    DailyLimitExceeded { limit: i64, attempted: i64 },

    /// The withdrawal already reached a terminal state.
    #[error("withdrawal {0} already settled")]
    AlreadySettled(Uuid),

    /// The derivation index is already claimed by another account.
    #[error("derivation index already in use")]
    IndexTaken,

    /// Row-lock wait or serialization conflict; retried a bounded number
    /// of times before surfacing.
    #[error("row lock conflict on account")]
    Conflict,

    /// Schema migration failure.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Any other database failure. Ledger mutations are single
    /// transactions, so nothing is partially committed.
    #[error("database error: {0}")]
    Db(sqlx::Error),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if let Some(code) = db.code() {
                match code.as_ref() {
                    // lock_not_available, serialization_failure, deadlock_detected
                    "55P03" | "40001" | "40P01" => return LedgerError::Conflict,
                    "23505"
                        if db
                            .constraint()
                            .map_or(false, |c| c.contains("derivation_index")) =>
                    {
                        return LedgerError::IndexTaken
                    }
                    _ => {}
                }
            }
        }
        LedgerError::Db(e)
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
