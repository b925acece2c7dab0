//! Incentive configuration, signups, spend, and schedule evaluation.

use super::LedgerService;
use crate::domain::{
    Decimal, EntityId, GrantId, IncentiveConfig, IncentiveGrant, Installment, Role, SpendSample,
    TimeMs,
};
use crate::engine::vesting::{activation_time, evaluate, is_activated, vested_total};
use crate::error::LedgerError;
use crate::store::user_key;
use serde::{Deserialize, Serialize};
use tracing::info;

/// A user's grant evaluated as of a read instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncentiveSchedule {
    pub grant_id: GrantId,
    pub user_id: EntityId,
    pub role: Role,
    pub signup_at: TimeMs,
    pub activation_deadline: TimeMs,
    pub activated_at: Option<TimeMs>,
    pub activated: bool,
    pub total_amount: Decimal,
    pub vested_total: Decimal,
    pub referred_by: Option<EntityId>,
    pub installments: Vec<Installment>,
}

impl LedgerService {
    /// Replace the config new signups for `role` will receive.
    ///
    /// Existing grants keep the config frozen at their signup.
    pub async fn set_incentive_config(
        &self,
        role: Role,
        config: IncentiveConfig,
    ) -> Result<IncentiveConfig, LedgerError> {
        if let Some(reason) = config.validation_error() {
            return Err(LedgerError::InvalidInput(reason));
        }
        self.store.put_incentive_config(role, &config).await?;
        info!(
            role = %role,
            total_amount = %config.total_amount,
            vesting_weeks = config.vesting_weeks,
            "incentive config updated"
        );
        Ok(config)
    }

    pub async fn incentive_config(&self, role: Role) -> Result<IncentiveConfig, LedgerError> {
        self.store
            .get_incentive_config(role)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("incentive config for role {}", role)))
    }

    /// Create a grant for a new user, freezing the role's current config.
    ///
    /// # Errors
    /// `NotFound` when the role has no config, `InvalidInput` for a
    /// self-referral or a user that already holds a grant.
    pub async fn register_signup(
        &self,
        user: &EntityId,
        role: Role,
        signup_at: TimeMs,
        referred_by: Option<EntityId>,
    ) -> Result<IncentiveGrant, LedgerError> {
        if user.as_str().trim().is_empty() {
            return Err(LedgerError::InvalidInput("user id is required".to_string()));
        }
        if referred_by.as_ref() == Some(user) {
            return Err(LedgerError::InvalidInput(format!(
                "user {} cannot refer themselves",
                user
            )));
        }

        let config = self.incentive_config(role).await?;
        let grant = IncentiveGrant {
            grant_id: GrantId::generate(),
            user_id: user.clone(),
            role,
            signup_at,
            config,
            referred_by,
        };
        if !self.store.insert_grant(&grant).await? {
            return Err(LedgerError::InvalidInput(format!(
                "user {} already has an incentive grant",
                user
            )));
        }

        info!(
            user_id = %user,
            role = %role,
            grant_id = %grant.grant_id,
            referred_by = ?grant.referred_by,
            "incentive grant created"
        );
        Ok(grant)
    }

    /// Record platform spend counted toward weekly vesting thresholds.
    pub async fn record_spend(&self, sample: SpendSample) -> Result<(), LedgerError> {
        if sample.user_id.as_str().trim().is_empty() {
            return Err(LedgerError::InvalidInput("user id is required".to_string()));
        }
        if !sample.amount.is_positive() {
            return Err(LedgerError::InvalidInput(format!(
                "spend amount must be positive, got {}",
                sample.amount
            )));
        }
        self.store.insert_spend_sample(&sample).await?;
        Ok(())
    }

    /// Evaluate `user`'s grant as of `now`. Read-only.
    pub async fn incentive_schedule(
        &self,
        user: &EntityId,
        now: TimeMs,
    ) -> Result<IncentiveSchedule, LedgerError> {
        self.ensure_not_quarantined(&user_key(user)).await?;
        let snapshot = self
            .store
            .incentive_snapshot(user)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("incentive grant for {}", user)))?;

        let grant = snapshot.grant;
        let activated_at = activation_time(&grant, &snapshot.order_times);
        let installments = evaluate(&grant, activated_at, &snapshot.spend, now);

        Ok(IncentiveSchedule {
            activation_deadline: grant.activation_deadline(),
            activated: is_activated(&grant, activated_at),
            activated_at,
            total_amount: grant.config.total_amount,
            vested_total: vested_total(&installments),
            grant_id: grant.grant_id,
            user_id: grant.user_id,
            role: grant.role,
            signup_at: grant.signup_at,
            referred_by: grant.referred_by,
            installments,
        })
    }
}
