//! Incentive config, grant, and spend sample operations.

use super::{decimal_col, orders, Repository};
use crate::domain::{
    EntityId, GrantId, IncentiveConfig, IncentiveGrant, Role, SpendSample, TimeMs,
};
use crate::store::{IncentiveSnapshot, StoreError};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const GRANT_COLUMNS: &str = "grant_id, user_id, role, signup_at_ms, config_json, referred_by";

impl Repository {
    pub(super) async fn upsert_incentive_config(
        &self,
        role: Role,
        config: &IncentiveConfig,
    ) -> Result<(), StoreError> {
        let config_json = serde_json::to_string(config)?;
        sqlx::query(
            r#"
            INSERT INTO incentive_configs (role, config_json)
            VALUES (?, ?)
            ON CONFLICT(role) DO UPDATE SET config_json = excluded.config_json
            "#,
        )
        .bind(role.as_str())
        .bind(config_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn query_incentive_config(
        &self,
        role: Role,
    ) -> Result<Option<IncentiveConfig>, StoreError> {
        let row = sqlx::query("SELECT config_json FROM incentive_configs WHERE role = ?")
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            let raw: String = r.try_get("config_json")?;
            serde_json::from_str(&raw)
                .map_err(|e| StoreError::decode("incentive_configs", e.to_string()))
        })
        .transpose()
    }

    /// Insert a grant. Returns false if the user (or grant id) already exists.
    pub(super) async fn insert_grant_row(&self, grant: &IncentiveGrant) -> Result<bool, StoreError> {
        let config_json = serde_json::to_string(&grant.config)?;
        let result = sqlx::query(
            r#"
            INSERT INTO incentive_grants (grant_id, user_id, role, signup_at_ms, config_json, referred_by)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(grant.grant_id.as_str())
        .bind(grant.user_id.as_str())
        .bind(grant.role.as_str())
        .bind(grant.signup_at.as_ms())
        .bind(config_json)
        .bind(grant.referred_by.as_ref().map(|r| r.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub(super) async fn query_grants(&self) -> Result<Vec<IncentiveGrant>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM incentive_grants ORDER BY user_id ASC",
            GRANT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_grant).collect()
    }

    pub(super) async fn insert_spend_row(&self, sample: &SpendSample) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO spend_samples (user_id, time_ms, amount) VALUES (?, ?, ?)")
            .bind(sample.user_id.as_str())
            .bind(sample.at.as_ms())
            .bind(sample.amount.to_canonical_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Grant, buyer order times, and spend for `user`, read in one transaction.
    pub(super) async fn query_incentive_snapshot(
        &self,
        user: &EntityId,
    ) -> Result<Option<IncentiveSnapshot>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM incentive_grants WHERE user_id = ?",
            GRANT_COLUMNS
        ))
        .bind(user.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let grant = decode_grant(&row)?;

        let order_times = orders::load_buyer_order_times(&mut tx, user).await?;

        let spend_rows = sqlx::query(
            r#"
            SELECT user_id, time_ms, amount
            FROM spend_samples
            WHERE user_id = ?
            ORDER BY time_ms ASC, id ASC
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let spend = spend_rows
            .iter()
            .map(|row| -> Result<SpendSample, StoreError> {
                Ok(SpendSample {
                    user_id: EntityId::new(row.try_get::<String, _>("user_id")?),
                    at: TimeMs::new(row.try_get("time_ms")?),
                    amount: decimal_col(row, "spend_samples", "amount")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(IncentiveSnapshot {
            grant,
            order_times,
            spend,
        }))
    }
}

fn decode_grant(row: &SqliteRow) -> Result<IncentiveGrant, StoreError> {
    let role_raw: String = row.try_get("role")?;
    let role = role_raw
        .parse::<Role>()
        .map_err(|e| StoreError::decode("incentive_grants", e))?;
    let config_raw: String = row.try_get("config_json")?;
    let config = serde_json::from_str(&config_raw)
        .map_err(|e| StoreError::decode("incentive_grants", e.to_string()))?;
    let referred_by: Option<String> = row.try_get("referred_by")?;

    Ok(IncentiveGrant {
        grant_id: GrantId::new(row.try_get::<String, _>("grant_id")?),
        user_id: EntityId::new(row.try_get::<String, _>("user_id")?),
        role,
        signup_at: TimeMs::new(row.try_get("signup_at_ms")?),
        config,
        referred_by: referred_by.map(EntityId::new),
    })
}
