//! Periodic reconciliation pass.
//!
//! Safe to re-run at any time: every credit it applies is keyed by its source,
//! so a second run over the same state applies nothing new.

use super::LedgerService;
use crate::domain::{
    BuyerPaymentStatus, BuyerStatus, CreditSource, EntityId, IncentiveGrant, InstallmentState,
    Order, OrderId, TimeMs,
};
use crate::engine::buyer_status;
use crate::engine::vesting::referral_bonus_due;
use crate::error::LedgerError;
use crate::store::{order_key, user_key};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub at: TimeMs,
    /// Unpaid orders past their buyer due date.
    pub overdue_orders: Vec<OrderId>,
    /// Installments credited by this run.
    pub installments_vested: u64,
    /// Installments observed Forfeited in this run.
    pub installments_forfeited: u64,
    /// Every credit entry appended by this run, of any kind.
    pub credits_applied: u64,
    pub referral_bonuses: u64,
    /// Entity keys left alone: quarantined, or a grant that could not be
    /// processed.
    pub skipped_entities: Vec<String>,
}

/// What happened to one attempted credit.
enum CreditOutcome {
    Applied,
    AlreadyApplied,
    Skipped,
}

impl LedgerService {
    /// Derive overdue orders, reconcile seller credits for paid orders, and
    /// credit newly vested installments and referral bonuses.
    pub async fn sweep(&self, now: TimeMs) -> Result<SweepReport, LedgerError> {
        let mut report = SweepReport {
            at: now,
            ..SweepReport::default()
        };
        let mut skipped = BTreeSet::new();

        let snapshot = self.store.settlement_snapshot().await?;
        let mut paid_by_seller: BTreeMap<EntityId, Vec<Order>> = BTreeMap::new();

        for order in snapshot.orders {
            let key = order_key(&order.id);
            if snapshot.quarantined.contains(&key) {
                skipped.insert(key);
                continue;
            }
            if let Some(detail) = order.integrity_violation() {
                self.quarantine(&key, &detail, now).await?;
                skipped.insert(key);
                continue;
            }

            let terms = snapshot
                .terms
                .terms_at(&order.buyer_id, order.order_timestamp);
            let entry = self.settlement_entry(&order, terms);
            if buyer_status(&order, entry.buyer_due, now) == BuyerStatus::Overdue {
                report.overdue_orders.push(order.id.clone());
            }
            if order.buyer_payment_status == BuyerPaymentStatus::Paid {
                paid_by_seller
                    .entry(order.seller_id.clone())
                    .or_default()
                    .push(order);
            }
        }
        report.overdue_orders.sort();

        for (seller, orders) in paid_by_seller {
            let key = user_key(&seller);
            if snapshot.quarantined.contains(&key) {
                skipped.insert(key);
                continue;
            }
            self.reconcile_seller(&seller, &orders, &mut report, &mut skipped)
                .await?;
        }

        for grant in self.store.list_grants().await? {
            match self.sweep_grant(&grant, now, &mut report, &mut skipped).await {
                Ok(()) => {}
                // Store failures affect every grant alike.
                Err(e @ LedgerError::Store(_)) => return Err(e),
                Err(e) => {
                    error!(
                        user_id = %grant.user_id,
                        grant_id = %grant.grant_id,
                        error = %e,
                        "incentive grant skipped by sweep"
                    );
                    skipped.insert(user_key(&grant.user_id));
                }
            }
        }

        report.skipped_entities = skipped.into_iter().collect();
        info!(
            overdue = report.overdue_orders.len(),
            installments_vested = report.installments_vested,
            installments_forfeited = report.installments_forfeited,
            credits_applied = report.credits_applied,
            referral_bonuses = report.referral_bonuses,
            skipped = report.skipped_entities.len(),
            "sweep completed"
        );
        Ok(report)
    }

    /// Credit one grant's newly vested installments and its referral bonus.
    ///
    /// Installments that round to nothing are not credited.
    async fn sweep_grant(
        &self,
        grant: &IncentiveGrant,
        now: TimeMs,
        report: &mut SweepReport,
        skipped: &mut BTreeSet<String>,
    ) -> Result<(), LedgerError> {
        let user = &grant.user_id;
        let schedule = match self.incentive_schedule(user, now).await {
            Ok(schedule) => schedule,
            Err(LedgerError::Quarantined { entity, .. }) => {
                skipped.insert(entity);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for installment in &schedule.installments {
            match installment.state {
                InstallmentState::Forfeited => report.installments_forfeited += 1,
                InstallmentState::Vested if !installment.amount.is_positive() => {}
                InstallmentState::Vested => {
                    let outcome = classify(
                        self.credit_incentive(
                            user,
                            installment.amount,
                            &grant.grant_id,
                            installment.week,
                            now,
                        )
                        .await,
                        skipped,
                    )?;
                    match outcome {
                        CreditOutcome::Applied => {
                            report.installments_vested += 1;
                            report.credits_applied += 1;
                        }
                        CreditOutcome::AlreadyApplied => {}
                        CreditOutcome::Skipped => break,
                    }
                }
                InstallmentState::NotYetDue => {}
            }
        }

        if let Some((referrer, amount)) = referral_bonus_due(grant, schedule.activated_at) {
            let outcome = classify(
                self.credit_referral(&referrer, amount, &grant.grant_id, now)
                    .await,
                skipped,
            )?;
            if let CreditOutcome::Applied = outcome {
                report.referral_bonuses += 1;
                report.credits_applied += 1;
            }
        }
        Ok(())
    }

    /// Credit the seller for paid orders that have no trade revenue entry yet.
    async fn reconcile_seller(
        &self,
        seller: &EntityId,
        orders: &[Order],
        report: &mut SweepReport,
        skipped: &mut BTreeSet<String>,
    ) -> Result<(), LedgerError> {
        let credited: HashSet<OrderId> = match self.load_verified_ledger(seller).await {
            Ok((entries, _)) => entries
                .into_iter()
                .filter_map(|e| match e.source {
                    CreditSource::Order { order_id } => Some(order_id),
                    _ => None,
                })
                .collect(),
            Err(LedgerError::DataCorruption { entity, .. }) => {
                skipped.insert(entity);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for order in orders.iter().filter(|o| !credited.contains(&o.id)) {
            let at = order
                .buyer_receipt
                .as_ref()
                .map(|r| r.at)
                .unwrap_or(order.order_timestamp);
            let result = {
                let _guard = self.locks.acquire(&order_key(&order.id)).await;
                self.credit_seller_for(order, at).await
            };
            match result {
                Ok(Some(_)) => {
                    warn!(order_id = %order.id, seller_id = %seller, "reconciled missing seller credit");
                    report.credits_applied += 1;
                }
                Ok(None) | Err(LedgerError::DuplicateCredit { .. }) => {}
                Err(LedgerError::Quarantined { entity, .. })
                | Err(LedgerError::DataCorruption { entity, .. }) => {
                    skipped.insert(entity);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Fold expected credit failures into an outcome; propagate the rest.
fn classify<T>(
    result: Result<T, LedgerError>,
    skipped: &mut BTreeSet<String>,
) -> Result<CreditOutcome, LedgerError> {
    match result {
        Ok(_) => Ok(CreditOutcome::Applied),
        Err(LedgerError::DuplicateCredit { .. }) => Ok(CreditOutcome::AlreadyApplied),
        Err(LedgerError::Quarantined { entity, .. })
        | Err(LedgerError::DataCorruption { entity, .. }) => {
            skipped.insert(entity);
            Ok(CreditOutcome::Skipped)
        }
        Err(e) => Err(e),
    }
}
