//! Postgres-backed ledger.
//!
//! Schema (see `migrations/`): `users(id, login, password_hash)` owned by the
//! auth collaborator, and `orders(id PRIMARY KEY, user_id, kind, status,
//! value, created_at, updated_at)` with `value` in minor units. The primary
//! key on the externally supplied order number enforces global id
//! uniqueness; unique-violation errors (code 23505) are translated back into
//! the duplicate-id errors of the ledger contract.
//!
//! Withdrawals run inside a transaction that locks the owner's `users` row
//! (`SELECT ... FOR UPDATE`), making the sufficiency check and the insert a
//! single-writer-per-owner critical section. Verdict application locks the
//! order row instead, which is enough for per-id monotonicity: a verdict only
//! ever raises the spendable balance, so it cannot invalidate a sufficiency
//! check committed concurrently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use loyalty_core::{
    Balance, EntryKind, EntryStatus, LedgerEntry, LedgerError, LedgerResult, order_number,
};
use loyalty_ledger::LedgerStore;

#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_uri: &str) -> LedgerResult<Self> {
        let pool = PgPool::connect(database_uri)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    async fn user_id(&self, login: &str) -> LedgerResult<i64> {
        let row = sqlx::query("SELECT id FROM users WHERE login = $1")
            .bind(login)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("user_id", e))?;

        match row {
            Some(row) => row
                .try_get("id")
                .map_err(|e| map_sqlx_error("user_id", e)),
            None => Err(LedgerError::unknown_owner(login)),
        }
    }

    /// Who currently holds the order number, if anyone.
    async fn existing_owner(&self, id: &str) -> LedgerResult<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT u.login
            FROM orders o
            JOIN users u ON u.id = o.user_id
            WHERE o.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("existing_owner", e))?;

        match row {
            Some(row) => Ok(Some(
                row.try_get("login")
                    .map_err(|e| map_sqlx_error("existing_owner", e))?,
            )),
            None => Ok(None),
        }
    }

    async fn duplicate_error(&self, id: &str, owner: &str) -> LedgerError {
        match self.existing_owner(id).await {
            Ok(Some(existing)) if existing == owner => LedgerError::AlreadyExistsSameOwner,
            Ok(Some(_)) => LedgerError::AlreadyExistsOtherOwner,
            // The conflicting row disappeared or the lookup failed; the
            // insert still did not happen, so report the conservative error.
            Ok(None) => LedgerError::AlreadyExistsOtherOwner,
            Err(err) => err,
        }
    }

    async fn entries_of(&self, owner: &str, kind: EntryKind) -> LedgerResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, u.login, o.kind, o.status, o.value, o.created_at, o.updated_at
            FROM orders o
            JOIN users u ON u.id = o.user_id
            WHERE u.login = $1 AND o.kind = $2
            ORDER BY o.created_at DESC, o.id DESC
            "#,
        )
        .bind(owner)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("entries_of", e))?;

        rows.iter().map(entry_from_row).collect()
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn submit_charge(&self, owner: &str, id: &str) -> LedgerResult<()> {
        if !order_number::is_valid(id) {
            return Err(LedgerError::InvalidIdentifier);
        }

        let user_id = self.user_id(owner).await?;

        // Pre-check for a friendly error; the primary key still backstops
        // the race between check and insert.
        if self.existing_owner(id).await?.is_some() {
            return Err(self.duplicate_error(id, owner).await);
        }

        let entry = LedgerEntry::new_charge(owner, id);
        let result = sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, kind, status, value, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(entry.kind.as_str())
        .bind(entry.status.as_str())
        .bind(0i64)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(self.duplicate_error(id, owner).await),
            Err(err) => Err(map_sqlx_error("submit_charge", err)),
        }
    }

    async fn submit_withdrawal(&self, owner: &str, id: &str, amount: u64) -> LedgerResult<()> {
        if !order_number::is_valid(id) {
            return Err(LedgerError::InvalidIdentifier);
        }
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let stored_amount = to_stored_amount(amount)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        // Lock the owner row: concurrent withdrawals for the same owner
        // serialize here, closing the check-then-act race.
        let user_row = sqlx::query("SELECT id FROM users WHERE login = $1 FOR UPDATE")
            .bind(owner)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_owner", e))?;
        let user_id: i64 = match user_row {
            Some(row) => row
                .try_get("id")
                .map_err(|e| map_sqlx_error("lock_owner", e))?,
            None => return Err(LedgerError::unknown_owner(owner)),
        };

        let spendable = spendable_in_tx(&mut tx, user_id).await?;
        if spendable < amount {
            return Err(LedgerError::InsufficientFunds);
        }

        let entry = LedgerEntry::new_withdrawal(owner, id, amount);
        let result = sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, kind, status, value, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(entry.kind.as_str())
        .bind(entry.status.as_str())
        .bind(stored_amount)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => tx
                .commit()
                .await
                .map_err(|e| map_sqlx_error("commit", e)),
            Err(err) if is_unique_violation(&err) => {
                drop(tx);
                Err(self.duplicate_error(id, owner).await)
            }
            Err(err) => Err(map_sqlx_error("submit_withdrawal", err)),
        }
    }

    async fn list_charges(&self, owner: &str) -> LedgerResult<Vec<LedgerEntry>> {
        self.entries_of(owner, EntryKind::Charge).await
    }

    async fn list_withdrawals(&self, owner: &str) -> LedgerResult<Vec<LedgerEntry>> {
        self.entries_of(owner, EntryKind::Withdrawal).await
    }

    async fn get_balance(&self, owner: &str) -> LedgerResult<Balance> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(o.value) FILTER (WHERE o.kind = 'CHARGE' AND o.status = 'PROCESSED'), 0) AS accrued,
                COALESCE(SUM(o.value) FILTER (WHERE o.kind = 'WITHDRAWAL'), 0) AS withdrawn
            FROM orders o
            JOIN users u ON u.id = o.user_id
            WHERE u.login = $1
            "#,
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_balance", e))?;

        let accrued: i64 = row
            .try_get("accrued")
            .map_err(|e| map_sqlx_error("get_balance", e))?;
        let withdrawn: i64 = row
            .try_get("withdrawn")
            .map_err(|e| map_sqlx_error("get_balance", e))?;

        let accrued = from_stored_amount(accrued)?;
        let withdrawn = from_stored_amount(withdrawn)?;
        Ok(Balance {
            current: accrued.saturating_sub(withdrawn),
            withdrawn,
        })
    }

    async fn list_pending(&self, statuses: &[EntryStatus]) -> LedgerResult<Vec<LedgerEntry>> {
        let wanted: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let rows = sqlx::query(
            r#"
            SELECT o.id, u.login, o.kind, o.status, o.value, o.created_at, o.updated_at
            FROM orders o
            JOIN users u ON u.id = o.user_id
            WHERE o.kind = 'CHARGE' AND o.status = ANY($1)
            ORDER BY o.created_at ASC, o.id ASC
            "#,
        )
        .bind(&wanted)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_pending", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn apply_verdict(&self, id: &str, status: EntryStatus, amount: u64) -> LedgerResult<()> {
        let stored_amount = to_stored_amount(amount)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        // Lock the order row so racing verdict applications for the same id
        // observe each other's terminal transitions.
        let row = sqlx::query("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("apply_verdict", e))?;

        let current: String = match row {
            Some(row) => row
                .try_get("status")
                .map_err(|e| map_sqlx_error("apply_verdict", e))?,
            None => return Err(LedgerError::NotFound),
        };
        let current = EntryStatus::parse(&current)
            .ok_or_else(|| LedgerError::storage(format!("corrupt status column: {current}")))?;
        if current.is_terminal() {
            return Err(LedgerError::AlreadyTerminal);
        }

        sqlx::query(
            "UPDATE orders SET status = $2, value = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(stored_amount)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("apply_verdict", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }
}

/// PROCESSED charge total minus withdrawal total, inside the caller's
/// transaction.
async fn spendable_in_tx(tx: &mut Transaction<'_, Postgres>, user_id: i64) -> LedgerResult<u64> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(SUM(value) FILTER (WHERE kind = 'CHARGE' AND status = 'PROCESSED'), 0) AS accrued,
            COALESCE(SUM(value) FILTER (WHERE kind = 'WITHDRAWAL'), 0) AS withdrawn
        FROM orders
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("spendable", e))?;

    let accrued: i64 = row
        .try_get("accrued")
        .map_err(|e| map_sqlx_error("spendable", e))?;
    let withdrawn: i64 = row
        .try_get("withdrawn")
        .map_err(|e| map_sqlx_error("spendable", e))?;

    Ok(from_stored_amount(accrued)?.saturating_sub(from_stored_amount(withdrawn)?))
}

fn entry_from_row(row: &PgRow) -> LedgerResult<LedgerEntry> {
    let id: String = row
        .try_get("id")
        .map_err(|e| map_sqlx_error("entry_row", e))?;
    let owner: String = row
        .try_get("login")
        .map_err(|e| map_sqlx_error("entry_row", e))?;
    let kind: String = row
        .try_get("kind")
        .map_err(|e| map_sqlx_error("entry_row", e))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| map_sqlx_error("entry_row", e))?;
    let value: i64 = row
        .try_get("value")
        .map_err(|e| map_sqlx_error("entry_row", e))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| map_sqlx_error("entry_row", e))?;
    let updated_at: DateTime<Utc> = row
        .try_get("updated_at")
        .map_err(|e| map_sqlx_error("entry_row", e))?;

    Ok(LedgerEntry {
        id,
        owner,
        kind: EntryKind::parse(&kind)
            .ok_or_else(|| LedgerError::storage(format!("corrupt kind column: {kind}")))?,
        status: EntryStatus::parse(&status)
            .ok_or_else(|| LedgerError::storage(format!("corrupt status column: {status}")))?,
        amount: from_stored_amount(value)?,
        created_at,
        updated_at,
    })
}

/// Minor units travel as BIGINT; amounts outside its range cannot be stored.
fn to_stored_amount(amount: u64) -> LedgerResult<i64> {
    i64::try_from(amount)
        .map_err(|_| LedgerError::storage(format!("amount {amount} exceeds storage range")))
}

fn from_stored_amount(value: i64) -> LedgerResult<u64> {
    u64::try_from(value)
        .map_err(|_| LedgerError::storage(format!("negative amount {value} in storage")))
}

/// Map sqlx failures to the ledger's storage error.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            LedgerError::storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            LedgerError::storage(format!("connection pool closed in {operation}"))
        }
        other => LedgerError::storage(format!("sqlx error in {operation}: {other}")),
    }
}

/// Unique constraint violation (Postgres error code 23505).
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
