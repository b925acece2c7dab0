//! Credit ledger operations.
//!
//! Appends run under `BEGIN IMMEDIATE` so the chain-head check, the entry
//! insert, and the cached balance update are serialized against other writers.

use super::{decimal_col, Repository};
use crate::domain::{
    CreditBalance, CreditClass, CreditEntry, CreditSource, EntityId, TimeMs, GENESIS_HASH,
};
use crate::store::{AppendOutcome, StoreError};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::warn;

impl Repository {
    pub(super) async fn append_credit_entry(
        &self,
        entry: &CreditEntry,
    ) -> Result<AppendOutcome, StoreError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match append_locked(&mut conn, entry).await {
            Ok(AppendOutcome::Appended) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(AppendOutcome::Appended)
            }
            Ok(outcome) => {
                sqlx::query("ROLLBACK").execute(&mut *conn).await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(user = %entry.user_id, error = %rollback_err, "rollback after failed credit append failed");
                }
                Err(e)
            }
        }
    }

    /// Entries in append order plus the cached balance, read in one transaction.
    pub(super) async fn query_credit_ledger(
        &self,
        user: &EntityId,
    ) -> Result<(Vec<CreditEntry>, CreditBalance), StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT entry_id, user_id, class, amount, source_key, time_ms, prev_hash, entry_hash
            FROM credit_entries
            WHERE user_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&mut *tx)
        .await?;
        let balance = load_balance(&mut tx, user).await?;
        tx.commit().await?;

        let entries = rows
            .iter()
            .map(decode_entry)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((entries, balance))
    }
}

async fn append_locked(
    conn: &mut SqliteConnection,
    entry: &CreditEntry,
) -> Result<AppendOutcome, StoreError> {
    let source_key = entry.source.key();

    let existing = sqlx::query("SELECT 1 FROM credit_entries WHERE user_id = ? AND source_key = ?")
        .bind(entry.user_id.as_str())
        .bind(source_key.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    if existing.is_some() {
        return Ok(AppendOutcome::DuplicateSource);
    }

    let head_row = sqlx::query(
        "SELECT entry_hash FROM credit_entries WHERE user_id = ? ORDER BY seq DESC LIMIT 1",
    )
    .bind(entry.user_id.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    let head: String = match head_row {
        Some(row) => row.try_get("entry_hash")?,
        None => GENESIS_HASH.to_string(),
    };
    if head != entry.prev_hash {
        return Ok(AppendOutcome::StaleChain);
    }

    sqlx::query(
        r#"
        INSERT INTO credit_entries (
            entry_id, user_id, class, amount, source_key, time_ms, prev_hash, entry_hash
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.entry_id.as_str())
    .bind(entry.user_id.as_str())
    .bind(entry.class.as_str())
    .bind(entry.amount.to_canonical_string())
    .bind(source_key.as_str())
    .bind(entry.at.as_ms())
    .bind(entry.prev_hash.as_str())
    .bind(entry.entry_hash.as_str())
    .execute(&mut *conn)
    .await?;

    let mut balance = load_balance(conn, &entry.user_id).await?;
    balance.apply(entry.class, entry.amount);

    sqlx::query(
        r#"
        INSERT INTO credit_balances (user_id, trade_revenue, incentive_credit)
        VALUES (?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            trade_revenue = excluded.trade_revenue,
            incentive_credit = excluded.incentive_credit
        "#,
    )
    .bind(entry.user_id.as_str())
    .bind(balance.trade_revenue.to_canonical_string())
    .bind(balance.incentive_credit.to_canonical_string())
    .execute(&mut *conn)
    .await?;

    Ok(AppendOutcome::Appended)
}

async fn load_balance(
    conn: &mut SqliteConnection,
    user: &EntityId,
) -> Result<CreditBalance, StoreError> {
    let row = sqlx::query(
        "SELECT trade_revenue, incentive_credit FROM credit_balances WHERE user_id = ?",
    )
    .bind(user.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(CreditBalance {
            trade_revenue: decimal_col(&row, "credit_balances", "trade_revenue")?,
            incentive_credit: decimal_col(&row, "credit_balances", "incentive_credit")?,
        }),
        None => Ok(CreditBalance::default()),
    }
}

fn decode_entry(row: &SqliteRow) -> Result<CreditEntry, StoreError> {
    let class_raw: String = row.try_get("class")?;
    let class = CreditClass::parse(&class_raw)
        .ok_or_else(|| StoreError::decode("credit_entries", format!("class={:?}", class_raw)))?;
    let source_raw: String = row.try_get("source_key")?;
    let source = CreditSource::parse_key(&source_raw).ok_or_else(|| {
        StoreError::decode("credit_entries", format!("source_key={:?}", source_raw))
    })?;

    Ok(CreditEntry {
        entry_id: row.try_get("entry_id")?,
        user_id: EntityId::new(row.try_get::<String, _>("user_id")?),
        class,
        amount: decimal_col(row, "credit_entries", "amount")?,
        source,
        at: TimeMs::new(row.try_get("time_ms")?),
        prev_hash: row.try_get("prev_hash")?,
        entry_hash: row.try_get("entry_hash")?,
    })
}
