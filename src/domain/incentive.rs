//! Signup incentive configuration, grants, and installment states.

use crate::domain::{Decimal, EntityId, GrantId, Role, TimeMs};
use serde::{Deserialize, Serialize};

/// Administrator-edited incentive program for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncentiveConfig {
    pub total_amount: Decimal,
    pub vesting_weeks: u32,
    pub min_spend_per_week: Decimal,
    pub activation_days: u32,
    pub referrer_bonus_enabled: bool,
    pub referrer_bonus_amount: Decimal,
}

impl IncentiveConfig {
    /// Returns the reason the config is unusable, if any.
    pub fn validation_error(&self) -> Option<String> {
        if self.vesting_weeks == 0 {
            return Some("vestingWeeks must be >= 1".to_string());
        }
        if self.total_amount.is_negative() {
            return Some("totalAmount must be >= 0".to_string());
        }
        if self.min_spend_per_week.is_negative() {
            return Some("minSpendPerWeek must be >= 0".to_string());
        }
        if self.referrer_bonus_amount.is_negative() {
            return Some("referrerBonusAmount must be >= 0".to_string());
        }
        if self.total_amount.round_currency() != self.total_amount {
            return Some("totalAmount must have at most two decimal places".to_string());
        }
        if self.referrer_bonus_amount.round_currency() != self.referrer_bonus_amount {
            return Some("referrerBonusAmount must have at most two decimal places".to_string());
        }
        None
    }
}

/// A user's incentive grant, carrying the config frozen at signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncentiveGrant {
    pub grant_id: GrantId,
    pub user_id: EntityId,
    pub role: Role,
    pub signup_at: TimeMs,
    pub config: IncentiveConfig,
    pub referred_by: Option<EntityId>,
}

impl IncentiveGrant {
    pub fn activation_deadline(&self) -> TimeMs {
        self.signup_at.plus_days(self.config.activation_days)
    }
}

/// A recorded spend by a user at an instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendSample {
    pub user_id: EntityId,
    pub at: TimeMs,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstallmentState {
    NotYetDue,
    Vested,
    Forfeited,
}

/// One weekly installment of a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installment {
    /// 1-indexed week.
    pub week: u32,
    pub amount: Decimal,
    pub state: InstallmentState,
    /// Window bounds; absent until the grant activates.
    pub window_start: Option<TimeMs>,
    pub window_end: Option<TimeMs>,
    pub spend: Decimal,
}
