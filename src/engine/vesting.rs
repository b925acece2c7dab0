//! Incentive vesting: weekly installments gated on activation and spend.
//!
//! A grant activates when the user places a first qualifying order within
//! `activation_days` of signup. Activation is all-or-nothing: missing the
//! window forfeits every installment. After activation, week k covers
//! `[activation + 7(k-1) days, activation + 7k days)` and vests once the
//! spend recorded inside that window reaches `min_spend_per_week`.

use crate::domain::{
    Decimal, EntityId, IncentiveConfig, IncentiveGrant, Installment, InstallmentState,
    SpendSample, TimeMs,
};

/// Installment amounts for `config`, summing exactly to `total_amount`.
///
/// Each installment is `total / weeks` rounded half-up to cents; the final
/// installment absorbs the rounding remainder. When rounding up would leave
/// the final installment negative, the share is truncated instead, so no
/// installment is ever below zero.
pub fn installment_amounts(config: &IncentiveConfig) -> Vec<Decimal> {
    let weeks = config.vesting_weeks.max(1);
    let share = config.total_amount / Decimal::from_i64(i64::from(weeks));
    let leading = Decimal::from_i64(i64::from(weeks - 1));

    let mut per_installment = share.round_currency();
    if per_installment * leading > config.total_amount {
        per_installment = share.truncate_currency();
    }

    let mut amounts = vec![per_installment; weeks as usize];
    let allocated = per_installment * leading;
    if let Some(last) = amounts.last_mut() {
        *last = config.total_amount - allocated;
    }
    amounts
}

/// First qualifying order at or after signup, given the user's order times.
pub fn activation_time(grant: &IncentiveGrant, order_times: &[TimeMs]) -> Option<TimeMs> {
    order_times
        .iter()
        .copied()
        .filter(|t| *t >= grant.signup_at)
        .min()
}

/// Whether the grant activated inside its window.
pub fn is_activated(grant: &IncentiveGrant, activation: Option<TimeMs>) -> bool {
    matches!(activation, Some(at) if at <= grant.activation_deadline())
}

/// Referrer and bonus amount owed once the referred grant has activated.
pub fn referral_bonus_due(
    grant: &IncentiveGrant,
    activation: Option<TimeMs>,
) -> Option<(EntityId, Decimal)> {
    let referrer = grant.referred_by.as_ref()?;
    if !grant.config.referrer_bonus_enabled
        || !grant.config.referrer_bonus_amount.is_positive()
        || !is_activated(grant, activation)
    {
        return None;
    }
    Some((referrer.clone(), grant.config.referrer_bonus_amount))
}

/// Evaluate every installment of `grant` as of `now`.
///
/// Pure: derives state from timestamps only, so repeated evaluation is safe.
pub fn evaluate(
    grant: &IncentiveGrant,
    activation: Option<TimeMs>,
    spend: &[SpendSample],
    now: TimeMs,
) -> Vec<Installment> {
    let amounts = installment_amounts(&grant.config);
    let deadline = grant.activation_deadline();

    let activated_at = match activation {
        Some(at) if at <= deadline => at,
        Some(_) => return unactivated(&amounts, InstallmentState::Forfeited),
        None if now > deadline => return unactivated(&amounts, InstallmentState::Forfeited),
        None => return unactivated(&amounts, InstallmentState::NotYetDue),
    };

    amounts
        .into_iter()
        .enumerate()
        .map(|(idx, amount)| {
            let week = idx as u32 + 1;
            let window_start = activated_at.plus_weeks(week - 1);
            let window_end = activated_at.plus_weeks(week);
            let week_spend: Decimal = spend
                .iter()
                .filter(|s| s.user_id == grant.user_id)
                .filter(|s| s.at >= window_start && s.at < window_end)
                .map(|s| s.amount)
                .sum();

            let state = if week_spend >= grant.config.min_spend_per_week {
                InstallmentState::Vested
            } else if now >= window_end {
                InstallmentState::Forfeited
            } else {
                InstallmentState::NotYetDue
            };

            Installment {
                week,
                amount,
                state,
                window_start: Some(window_start),
                window_end: Some(window_end),
                spend: week_spend,
            }
        })
        .collect()
}

fn unactivated(amounts: &[Decimal], state: InstallmentState) -> Vec<Installment> {
    amounts
        .iter()
        .enumerate()
        .map(|(idx, amount)| Installment {
            week: idx as u32 + 1,
            amount: *amount,
            state,
            window_start: None,
            window_end: None,
            spend: Decimal::zero(),
        })
        .collect()
}

/// Sum of the Vested installments.
pub fn vested_total(installments: &[Installment]) -> Decimal {
    installments
        .iter()
        .filter(|i| i.state == InstallmentState::Vested)
        .map(|i| i.amount)
        .sum()
}
