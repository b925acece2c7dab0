//! Credit ledger operations: trade revenue, incentive credit, withdrawals.

use super::LedgerService;
use crate::domain::{
    CreditBalance, CreditClass, CreditEntry, CreditSource, Decimal, EntityId, GrantId, Order,
    OrderId, Receipt, TimeMs,
};
use crate::engine::credit_ledger::{
    chain_head, check_withdrawal, validate_credit_amount, verify_ledger,
};
use crate::error::LedgerError;
use crate::store::{user_key, AppendOutcome, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A stale chain head means another process appended in between; re-read and retry.
const MAX_APPEND_ATTEMPTS: usize = 3;

/// Verified balances and the full audit trail for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditStatement {
    pub user_id: EntityId,
    pub trade_revenue: Decimal,
    /// Restricted: spendable on the platform, never withdrawable.
    pub incentive_credit: Decimal,
    pub withdrawable: Decimal,
    pub entries: Vec<CreditEntry>,
}

impl LedgerService {
    /// Verified balance and entries for `user`.
    ///
    /// # Errors
    /// `Quarantined`, or `DataCorruption` if the ledger and cached balance
    /// disagree (the user is quarantined as a side effect).
    pub async fn credit_statement(&self, user: &EntityId) -> Result<CreditStatement, LedgerError> {
        self.ensure_not_quarantined(&user_key(user)).await?;
        let (entries, balance) = self.load_verified_ledger(user).await?;
        Ok(CreditStatement {
            user_id: user.clone(),
            trade_revenue: balance.trade_revenue,
            incentive_credit: balance.incentive_credit,
            withdrawable: balance.trade_revenue,
            entries,
        })
    }

    /// Credit withdrawable trade revenue earned on `order_id`.
    pub async fn credit_trade_revenue(
        &self,
        user: &EntityId,
        amount: Decimal,
        order_id: &OrderId,
        at: TimeMs,
    ) -> Result<CreditEntry, LedgerError> {
        self.append_credit(
            user,
            CreditClass::TradeRevenue,
            amount,
            CreditSource::Order {
                order_id: order_id.clone(),
            },
            at,
        )
        .await
    }

    /// Credit a vested installment as restricted incentive credit.
    pub async fn credit_incentive(
        &self,
        user: &EntityId,
        amount: Decimal,
        grant_id: &GrantId,
        week: u32,
        at: TimeMs,
    ) -> Result<CreditEntry, LedgerError> {
        self.append_credit(
            user,
            CreditClass::Incentive,
            amount,
            CreditSource::Installment {
                grant_id: grant_id.clone(),
                week,
            },
            at,
        )
        .await
    }

    /// Credit a referrer's bonus for the referred user's grant.
    pub async fn credit_referral(
        &self,
        referrer: &EntityId,
        amount: Decimal,
        referred_grant: &GrantId,
        at: TimeMs,
    ) -> Result<CreditEntry, LedgerError> {
        self.append_credit(
            referrer,
            CreditClass::Incentive,
            amount,
            CreditSource::Referral {
                grant_id: referred_grant.clone(),
            },
            at,
        )
        .await
    }

    /// Withdraw from trade revenue only.
    ///
    /// # Errors
    /// `InsufficientWithdrawableFunds` when trade revenue does not cover
    /// `amount`, however large the incentive credit is.
    pub async fn withdraw(
        &self,
        user: &EntityId,
        amount: Decimal,
        now: TimeMs,
    ) -> Result<Receipt, LedgerError> {
        let key = user_key(user);
        let _guard = self.locks.acquire(&key).await;
        self.ensure_not_quarantined(&key).await?;

        let receipt_id = uuid::Uuid::new_v4().to_string();
        for _ in 0..MAX_APPEND_ATTEMPTS {
            let (entries, balance) = self.load_verified_ledger(user).await?;
            check_withdrawal(user, &balance, amount)?;

            let entry = CreditEntry::chained(
                user.clone(),
                CreditClass::TradeRevenue,
                -amount,
                CreditSource::Withdrawal {
                    receipt_id: receipt_id.clone(),
                },
                now,
                chain_head(&entries),
            );
            match self.store.append_credit(&entry).await? {
                AppendOutcome::Appended => {
                    let remaining = balance.trade_revenue - amount;
                    info!(
                        user_id = %user,
                        amount = %amount,
                        receipt_id = %receipt_id,
                        remaining_trade_revenue = %remaining,
                        "withdrawal recorded"
                    );
                    return Ok(Receipt {
                        receipt_id,
                        user_id: user.clone(),
                        amount,
                        at: now,
                        remaining_trade_revenue: remaining,
                    });
                }
                AppendOutcome::StaleChain => continue,
                AppendOutcome::DuplicateSource => {
                    return Err(LedgerError::DuplicateCredit {
                        user_id: user.clone(),
                        source_key: entry.source.key(),
                    })
                }
            }
        }
        Err(stale_chain(user))
    }

    /// Credit the seller of a paid order with its wholesale cost.
    pub(super) async fn credit_seller_for(
        &self,
        order: &Order,
        at: TimeMs,
    ) -> Result<Option<CreditEntry>, LedgerError> {
        let terms = self
            .store
            .terms_at(&order.buyer_id, order.order_timestamp)
            .await?;
        let entry = self.settlement_entry(order, terms.as_ref());
        if !entry.wholesale_cost.is_positive() {
            return Ok(None);
        }
        self.credit_trade_revenue(&order.seller_id, entry.wholesale_cost, &order.id, at)
            .await
            .map(Some)
    }

    async fn append_credit(
        &self,
        user: &EntityId,
        class: CreditClass,
        amount: Decimal,
        source: CreditSource,
        at: TimeMs,
    ) -> Result<CreditEntry, LedgerError> {
        validate_credit_amount(amount)?;

        let key = user_key(user);
        let _guard = self.locks.acquire(&key).await;
        self.ensure_not_quarantined(&key).await?;

        for _ in 0..MAX_APPEND_ATTEMPTS {
            let (entries, _) = self.load_verified_ledger(user).await?;
            let entry = CreditEntry::chained(
                user.clone(),
                class,
                amount,
                source.clone(),
                at,
                chain_head(&entries),
            );
            match self.store.append_credit(&entry).await? {
                AppendOutcome::Appended => {
                    info!(
                        user_id = %user,
                        class = %class.as_str(),
                        amount = %amount,
                        source = %entry.source.key(),
                        "credit applied"
                    );
                    return Ok(entry);
                }
                AppendOutcome::DuplicateSource => {
                    return Err(LedgerError::DuplicateCredit {
                        user_id: user.clone(),
                        source_key: source.key(),
                    })
                }
                AppendOutcome::StaleChain => {
                    warn!(user_id = %user, "credit chain head moved, retrying append");
                }
            }
        }
        Err(stale_chain(user))
    }

    /// Load the user's ledger and verify it against the cached balance,
    /// quarantining the user on any disagreement.
    pub(super) async fn load_verified_ledger(
        &self,
        user: &EntityId,
    ) -> Result<(Vec<CreditEntry>, CreditBalance), LedgerError> {
        let key = user_key(user);
        let (entries, cached) = match self.store.credit_ledger(user).await {
            Ok(ledger) => ledger,
            Err(StoreError::Decode { table, detail }) => {
                let detail = format!("{}: {}", table, detail);
                self.quarantine(&key, &detail, TimeMs::now()).await?;
                return Err(LedgerError::DataCorruption { entity: key, detail });
            }
            Err(e) => return Err(e.into()),
        };

        match verify_ledger(user, &entries, &cached) {
            Ok(balance) => Ok((entries, balance)),
            Err(LedgerError::DataCorruption { entity, detail }) => {
                self.quarantine(&entity, &detail, TimeMs::now()).await?;
                Err(LedgerError::DataCorruption { entity, detail })
            }
            Err(e) => Err(e),
        }
    }
}

fn stale_chain(user: &EntityId) -> LedgerError {
    LedgerError::Store(StoreError::Contention(format!(
        "credit chain head for {} kept moving during append",
        user
    )))
}
