//! Transactional ledger operations over Postgres.
//!
//! # Responsibilities
//! - Account creation and deposit-address registration
//! - Idempotent deposit credits
//! - Withdrawal reserve / settle state transitions
//! - Consolidation audit records
//!
//! # Design Decisions
//! - Every mutation is one transaction; the account row is locked with
//!   `SELECT ... FOR UPDATE` before any balance math
//! - The daily-limit check runs inside the reservation transaction,
//!   after the lock, so concurrent reservations cannot race past it
//! - Locks are never held across a chain RPC call

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::schema::DatabaseConfig;
use crate::ledger::types::{
    Account, ConsolidationRecord, DepositOutcome, LedgerError, LedgerResult, WithdrawalRequest,
};

/// A new sweep record awaiting insertion.
#[derive(Debug, Clone)]
pub struct NewConsolidation {
    pub from_address: String,
    pub to_address: String,
    pub amount: i64,
    pub transaction_id: String,
}

/// Handle to the ledger database.
#[derive(Clone)]
pub struct LedgerStore {
    pool: PgPool,
}

impl LedgerStore {
    /// Connect a pool using the given URL and pool settings.
    pub async fn connect(database_url: &str, config: &DatabaseConfig) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for callers that need raw queries.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply embedded schema migrations.
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Fetch an account by external user id, creating it if absent.
    pub async fn get_or_create_account(&self, user_id: &str) -> LedgerResult<Account> {
        sqlx::query("INSERT INTO accounts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        self.account_by_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))
    }

    pub async fn account_by_user(&self, user_id: &str) -> LedgerResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    pub async fn account_by_id(&self, account_id: i64) -> LedgerResult<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// Record a freshly derived deposit address. Only succeeds on an
    /// account that has none yet; the unique index on `derivation_index`
    /// rejects collisions.
    pub async fn set_deposit_address(
        &self,
        account_id: i64,
        address: &str,
        derivation_index: u32,
    ) -> LedgerResult<()> {
        let updated = sqlx::query(
            "UPDATE accounts
             SET deposit_address = $2, derivation_index = $3, updated_at = now()
             WHERE id = $1 AND deposit_address IS NULL",
        )
        .bind(account_id)
        .bind(address)
        .bind(derivation_index as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(LedgerError::AccountNotFound(account_id.to_string()));
        }
        Ok(())
    }

    /// Attach the provider's subscription handle to an account.
    pub async fn set_subscription(
        &self,
        account_id: i64,
        subscription_id: &str,
    ) -> LedgerResult<()> {
        sqlx::query("UPDATE accounts SET subscription_id = $2, updated_at = now() WHERE id = $1")
            .bind(account_id)
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Credit a deposit exactly once per transaction hash.
    ///
    /// The insert into `deposits` and the balance update commit together;
    /// a duplicate hash inserts nothing and leaves the balance untouched.
    pub async fn credit_deposit(
        &self,
        address: &str,
        amount: i64,
        tx_hash: &str,
        block_number: u64,
    ) -> LedgerResult<DepositOutcome> {
        let mut tx = self.pool.begin().await?;

        let account = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts WHERE deposit_address = $1 FOR UPDATE",
        )
        .bind(address)
        .fetch_optional(&mut *tx)
        .await?;

        let account = match account {
            Some(a) => a,
            None => return Ok(DepositOutcome::UnknownAddress),
        };

        let inserted = sqlx::query(
            "INSERT INTO deposits (tx_hash, account_id, amount, block_number)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (tx_hash) DO NOTHING",
        )
        .bind(tx_hash)
        .bind(account.id)
        .bind(amount)
        .bind(block_number as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Ok(DepositOutcome::Duplicate);
        }

        sqlx::query("UPDATE accounts SET balance = balance + $2, updated_at = now() WHERE id = $1")
            .bind(account.id)
            .bind(amount)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(DepositOutcome::Credited {
            account_id: account.id,
            amount,
        })
    }

    /// Reserve funds for a withdrawal and insert the `pending` request,
    /// atomically.
    ///
    /// The account row is locked first; the available-funds and
    /// daily-limit checks both read under that lock, then the freeze and
    /// the insert commit together or not at all.
    pub async fn reserve_withdrawal(
        &self,
        account_id: i64,
        amount: i64,
        fee: i64,
        to_address: &str,
        network: &str,
        daily_limit: i64,
    ) -> LedgerResult<WithdrawalRequest> {
        let total = amount + fee;
        let mut tx = self.pool.begin().await?;

        let account =
            sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(account_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

        let available = account.available();
        if total > available {
            return Err(LedgerError::InsufficientFunds {
                available,
                requested: total,
            });
        }

        let today_total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT
             FROM withdrawal_requests
             WHERE account_id = $1
               AND status IN ('pending', 'completed')
               AND created_at >= date_trunc('day', now())",
        )
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await?;

        if today_total + amount > daily_limit {
            return Err(LedgerError::DailyLimitExceeded {
                limit: daily_limit,
                attempted: today_total + amount,
            });
        }

        sqlx::query(
            "UPDATE accounts SET frozen_balance = frozen_balance + $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(total)
        .execute(&mut *tx)
        .await?;

        let request = sqlx::query_as::<_, WithdrawalRequest>(
            "INSERT INTO withdrawal_requests (id, account_id, amount, fee, status, to_address, network)
             VALUES ($1, $2, $3, $4, 'pending', $5, $6)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(amount)
        .bind(fee)
        .bind(to_address)
        .bind(network)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(request)
    }

    /// Record the broadcast hash on a still-pending request. Non-terminal;
    /// lets reconciliation tell pre-broadcast rows from post-broadcast.
    pub async fn mark_broadcast(&self, withdrawal_id: Uuid, tx_hash: &str) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE withdrawal_requests SET tx_hash = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(withdrawal_id)
        .bind(tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Settle a successful withdrawal: deduct the reserved total from
    /// both balances and complete the request, atomically.
    pub async fn settle_success(
        &self,
        withdrawal_id: Uuid,
        tx_hash: &str,
    ) -> LedgerResult<WithdrawalRequest> {
        let mut tx = self.pool.begin().await?;
        let request = lock_pending(&mut tx, withdrawal_id).await?;

        sqlx::query(
            "UPDATE accounts
             SET balance = balance - $2, frozen_balance = frozen_balance - $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(request.account_id)
        .bind(request.total())
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query_as::<_, WithdrawalRequest>(
            "UPDATE withdrawal_requests
             SET status = 'completed', tx_hash = $2, processed_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(withdrawal_id)
        .bind(tx_hash)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// Settle a failed withdrawal: release the reservation without
    /// touching the settled balance, atomically.
    pub async fn settle_failure(
        &self,
        withdrawal_id: Uuid,
        error_message: &str,
    ) -> LedgerResult<WithdrawalRequest> {
        let mut tx = self.pool.begin().await?;
        let request = lock_pending(&mut tx, withdrawal_id).await?;

        sqlx::query(
            "UPDATE accounts
             SET frozen_balance = frozen_balance - $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(request.account_id)
        .bind(request.total())
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query_as::<_, WithdrawalRequest>(
            "UPDATE withdrawal_requests
             SET status = 'failed', error_message = $2, processed_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(withdrawal_id)
        .bind(error_message)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    pub async fn withdrawal_by_id(&self, withdrawal_id: Uuid) -> LedgerResult<WithdrawalRequest> {
        sqlx::query_as::<_, WithdrawalRequest>("SELECT * FROM withdrawal_requests WHERE id = $1")
            .bind(withdrawal_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::WithdrawalNotFound(withdrawal_id))
    }

    /// Pending requests older than `older_than`, oldest first. Input to
    /// the reconciliation sweep.
    pub async fn stale_pending(
        &self,
        older_than: Duration,
    ) -> LedgerResult<Vec<WithdrawalRequest>> {
        let rows = sqlx::query_as::<_, WithdrawalRequest>(
            "SELECT * FROM withdrawal_requests
             WHERE status = 'pending'
               AND created_at < now() - make_interval(secs => $1)
             ORDER BY created_at",
        )
        .bind(older_than.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Accounts holding a derived deposit address, candidates for a sweep.
    pub async fn sweepable_accounts(&self) -> LedgerResult<Vec<Account>> {
        let rows = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts
             WHERE deposit_address IS NOT NULL AND derivation_index IS NOT NULL
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Append one successful sweep to the audit log.
    pub async fn record_consolidation(
        &self,
        record: NewConsolidation,
    ) -> LedgerResult<ConsolidationRecord> {
        let row = sqlx::query_as::<_, ConsolidationRecord>(
            "INSERT INTO consolidation_records (from_address, to_address, amount, transaction_id)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(&record.from_address)
        .bind(&record.to_address)
        .bind(record.amount)
        .bind(&record.transaction_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}

/// Lock a withdrawal row and require it to still be pending.
async fn lock_pending(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    withdrawal_id: Uuid,
) -> LedgerResult<WithdrawalRequest> {
    let request = sqlx::query_as::<_, WithdrawalRequest>(
        "SELECT * FROM withdrawal_requests WHERE id = $1 FOR UPDATE",
    )
    .bind(withdrawal_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(LedgerError::WithdrawalNotFound(withdrawal_id))?;

    if !request.is_pending() {
        return Err(LedgerError::AlreadySettled(withdrawal_id));
    }

    // Take the account lock after the withdrawal lock, consistently
    // across both settle paths.
    sqlx::query("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
        .bind(request.account_id)
        .execute(&mut **tx)
        .await?;

    Ok(request)
}
