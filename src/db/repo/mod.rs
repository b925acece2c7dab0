//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `orders.rs` - Orders, line items, and settlement status writes
//! - `terms.rs` - Versioned commercial terms
//! - `incentives.rs` - Incentive configs, grants, and spend samples
//! - `credits.rs` - Hash-chained credit entries and cached balances
//!
//! Money is stored as canonical decimal strings and parsed back losslessly.
//! A value that fails to parse is reported as `StoreError::Decode` rather than
//! silently defaulted, so the service layer can quarantine the entity.

mod credits;
mod incentives;
mod orders;
mod terms;

use crate::domain::{
    CommercialTerms, CreditBalance, CreditEntry, Decimal, EntityId, IncentiveConfig,
    IncentiveGrant, Order, OrderId, Receipted, Role, SpendSample, TermsVersion, TimeMs,
};
use crate::store::{
    AppendOutcome, IncentiveSnapshot, LedgerStore, SettlementSnapshot, StoreError,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::HashSet;
use tracing::debug;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Quarantine operations
    // =========================================================================

    /// Mark an entity as quarantined. The first recorded reason is kept.
    pub async fn insert_quarantine(
        &self,
        entity_key: &str,
        reason: &str,
        at: TimeMs,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO quarantine (entity_key, reason, quarantined_at_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(entity_key) DO NOTHING
            "#,
        )
        .bind(entity_key)
        .bind(reason)
        .bind(at.as_ms())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(entity = %entity_key, "entity already quarantined");
        }
        Ok(())
    }

    pub async fn get_quarantine_reason(
        &self,
        entity_key: &str,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT reason FROM quarantine WHERE entity_key = ?")
            .bind(entity_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("reason")))
    }

    pub async fn delete_quarantine(&self, entity_key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM quarantine WHERE entity_key = ?")
            .bind(entity_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Every quarantined entity key, read on the caller's connection.
async fn load_quarantine_keys(conn: &mut SqliteConnection) -> Result<HashSet<String>, StoreError> {
    let rows = sqlx::query("SELECT entity_key FROM quarantine")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter()
        .map(|row| -> Result<String, StoreError> { Ok(row.try_get("entity_key")?) })
        .collect()
}

/// Read a canonical decimal string column.
fn decimal_col(row: &SqliteRow, table: &'static str, column: &str) -> Result<Decimal, StoreError> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str_canonical(&raw)
        .map_err(|e| StoreError::decode(table, format!("{}={:?}: {}", column, raw, e)))
}

/// Read a non-negative day/week count stored as INTEGER.
fn u32_col(row: &SqliteRow, table: &'static str, column: &str) -> Result<u32, StoreError> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw).map_err(|_| StoreError::decode(table, format!("{}={} out of range", column, raw)))
}

#[async_trait]
impl LedgerStore for Repository {
    async fn insert_order(&self, order: &Order) -> Result<bool, StoreError> {
        self.insert_order_row(order).await
    }

    async fn get_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        self.fetch_order(id).await
    }

    async fn latest_order_time(&self, buyer: &EntityId) -> Result<Option<TimeMs>, StoreError> {
        self.query_latest_order_time(buyer).await
    }

    async fn record_buyer_payment(
        &self,
        id: &OrderId,
        receipt: &Receipted,
    ) -> Result<bool, StoreError> {
        self.mark_buyer_paid(id, receipt).await
    }

    async fn record_supplier_remittance(
        &self,
        id: &OrderId,
        receipt: &Receipted,
    ) -> Result<bool, StoreError> {
        self.mark_supplier_remitted(id, receipt).await
    }

    async fn append_terms(
        &self,
        buyer: &EntityId,
        terms: &CommercialTerms,
        effective_from: TimeMs,
    ) -> Result<TermsVersion, StoreError> {
        self.insert_terms_version(buyer, terms, effective_from).await
    }

    async fn terms_history(&self, buyer: &EntityId) -> Result<Vec<TermsVersion>, StoreError> {
        self.query_terms_history(buyer).await
    }

    async fn terms_at(
        &self,
        buyer: &EntityId,
        at: TimeMs,
    ) -> Result<Option<CommercialTerms>, StoreError> {
        self.query_terms_at(buyer, at).await
    }

    async fn settlement_snapshot(&self) -> Result<SettlementSnapshot, StoreError> {
        let mut tx = self.pool.begin().await?;
        let orders = orders::load_all_orders(&mut tx).await?;
        let terms = terms::load_terms_book(&mut tx).await?;
        let quarantined = load_quarantine_keys(&mut tx).await?;
        tx.commit().await?;
        Ok(SettlementSnapshot {
            orders,
            terms,
            quarantined,
        })
    }

    async fn put_incentive_config(
        &self,
        role: Role,
        config: &IncentiveConfig,
    ) -> Result<(), StoreError> {
        self.upsert_incentive_config(role, config).await
    }

    async fn get_incentive_config(
        &self,
        role: Role,
    ) -> Result<Option<IncentiveConfig>, StoreError> {
        self.query_incentive_config(role).await
    }

    async fn insert_grant(&self, grant: &IncentiveGrant) -> Result<bool, StoreError> {
        self.insert_grant_row(grant).await
    }

    async fn list_grants(&self) -> Result<Vec<IncentiveGrant>, StoreError> {
        self.query_grants().await
    }

    async fn insert_spend_sample(&self, sample: &SpendSample) -> Result<(), StoreError> {
        self.insert_spend_row(sample).await
    }

    async fn incentive_snapshot(
        &self,
        user: &EntityId,
    ) -> Result<Option<IncentiveSnapshot>, StoreError> {
        self.query_incentive_snapshot(user).await
    }

    async fn append_credit(&self, entry: &CreditEntry) -> Result<AppendOutcome, StoreError> {
        self.append_credit_entry(entry).await
    }

    async fn credit_ledger(
        &self,
        user: &EntityId,
    ) -> Result<(Vec<CreditEntry>, CreditBalance), StoreError> {
        self.query_credit_ledger(user).await
    }

    async fn quarantine(
        &self,
        entity_key: &str,
        reason: &str,
        at: TimeMs,
    ) -> Result<(), StoreError> {
        self.insert_quarantine(entity_key, reason, at).await
    }

    async fn quarantine_reason(&self, entity_key: &str) -> Result<Option<String>, StoreError> {
        self.get_quarantine_reason(entity_key).await
    }

    async fn release_quarantine(&self, entity_key: &str) -> Result<bool, StoreError> {
        self.delete_quarantine(entity_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Repository) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (temp_dir, Repository::new(pool))
    }

    #[tokio::test]
    async fn test_quarantine_keeps_first_reason() {
        let (_dir, repo) = setup().await;
        repo.insert_quarantine("order:o1", "total mismatch", TimeMs::new(1))
            .await
            .unwrap();
        repo.insert_quarantine("order:o1", "second", TimeMs::new(2))
            .await
            .unwrap();
        assert_eq!(
            repo.get_quarantine_reason("order:o1").await.unwrap().as_deref(),
            Some("total mismatch")
        );
        assert!(repo.delete_quarantine("order:o1").await.unwrap());
        assert_eq!(repo.get_quarantine_reason("order:o1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_carries_quarantined_keys() {
        let (_dir, repo) = setup().await;
        repo.insert_quarantine("order:o7", "total mismatch", TimeMs::new(1))
            .await
            .unwrap();
        repo.insert_quarantine("user:farm-2", "bad chain", TimeMs::new(2))
            .await
            .unwrap();

        let snapshot = repo.settlement_snapshot().await.unwrap();
        assert!(snapshot.quarantined.contains("order:o7"));
        assert!(snapshot.quarantined.contains("user:farm-2"));
        assert_eq!(snapshot.quarantined.len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_decimal_is_decode_error() {
        let (_dir, repo) = setup().await;
        sqlx::query(
            "INSERT INTO orders (order_id, buyer_id, seller_id, total_amount, order_time_ms) VALUES ('o1', 'b', 's', 'lots', 0)",
        )
        .execute(repo.pool())
        .await
        .unwrap();

        let err = repo.get_order(&OrderId::new("o1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Decode { table: "orders", .. }));
    }
}
