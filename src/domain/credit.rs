//! Append-only credit ledger entries.
//!
//! Credits fall into two disjoint classes: trade revenue (withdrawable) and
//! incentive credit (restricted). Each entry is hash-chained to the previous
//! entry of the same user.

use crate::domain::{Decimal, EntityId, GrantId, OrderId, TimeMs};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Genesis value for the first entry of a user's chain.
pub const GENESIS_HASH: &str = "genesis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CreditClass {
    TradeRevenue,
    Incentive,
}

impl CreditClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditClass::TradeRevenue => "trade_revenue",
            CreditClass::Incentive => "incentive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trade_revenue" => Some(CreditClass::TradeRevenue),
            "incentive" => Some(CreditClass::Incentive),
            _ => None,
        }
    }
}

/// What produced a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CreditSource {
    /// Seller proceeds of a paid order.
    #[serde(rename_all = "camelCase")]
    Order { order_id: OrderId },
    /// A vested weekly incentive installment.
    #[serde(rename_all = "camelCase")]
    Installment { grant_id: GrantId, week: u32 },
    /// Referral bonus earned when the referred grant activated.
    #[serde(rename_all = "camelCase")]
    Referral { grant_id: GrantId },
    /// Debit of trade revenue paid out to the user.
    #[serde(rename_all = "camelCase")]
    Withdrawal { receipt_id: String },
}

impl CreditSource {
    /// Idempotency key, unique per user.
    pub fn key(&self) -> String {
        match self {
            CreditSource::Order { order_id } => format!("order:{}", order_id),
            CreditSource::Installment { grant_id, week } => {
                format!("installment:{}:{}", grant_id, week)
            }
            CreditSource::Referral { grant_id } => format!("referral:{}", grant_id),
            CreditSource::Withdrawal { receipt_id } => format!("withdrawal:{}", receipt_id),
        }
    }

    /// Inverse of [`CreditSource::key`].
    pub fn parse_key(key: &str) -> Option<Self> {
        let (kind, rest) = key.split_once(':')?;
        match kind {
            "order" => Some(CreditSource::Order {
                order_id: OrderId::new(rest),
            }),
            "installment" => {
                let (grant, week) = rest.rsplit_once(':')?;
                Some(CreditSource::Installment {
                    grant_id: GrantId::new(grant),
                    week: week.parse().ok()?,
                })
            }
            "referral" => Some(CreditSource::Referral {
                grant_id: GrantId::new(rest),
            }),
            "withdrawal" => Some(CreditSource::Withdrawal {
                receipt_id: rest.to_string(),
            }),
            _ => None,
        }
    }
}

/// One immutable ledger line. Positive amounts credit, negative amounts debit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditEntry {
    pub entry_id: String,
    pub user_id: EntityId,
    pub class: CreditClass,
    pub amount: Decimal,
    pub source: CreditSource,
    pub at: TimeMs,
    pub prev_hash: String,
    pub entry_hash: String,
}

impl CreditEntry {
    /// Build the next entry in `user`'s chain.
    pub fn chained(
        user_id: EntityId,
        class: CreditClass,
        amount: Decimal,
        source: CreditSource,
        at: TimeMs,
        prev_hash: &str,
    ) -> Self {
        let entry_id = uuid::Uuid::new_v4().to_string();
        let entry_hash =
            Self::compute_hash(&entry_id, &user_id, class, &amount, &source, at, prev_hash);
        Self {
            entry_id,
            user_id,
            class,
            amount,
            source,
            at,
            prev_hash: prev_hash.to_string(),
            entry_hash,
        }
    }

    /// SHA-256 over the length-prefixed canonical fields.
    pub fn compute_hash(
        entry_id: &str,
        user_id: &EntityId,
        class: CreditClass,
        amount: &Decimal,
        source: &CreditSource,
        at: TimeMs,
        prev_hash: &str,
    ) -> String {
        fn hash_var(hasher: &mut Sha256, data: &str) {
            hasher.update((data.len() as u32).to_le_bytes());
            hasher.update(data.as_bytes());
        }

        let mut hasher = Sha256::new();
        hash_var(&mut hasher, prev_hash);
        hash_var(&mut hasher, entry_id);
        hash_var(&mut hasher, user_id.as_str());
        hash_var(&mut hasher, class.as_str());
        hash_var(&mut hasher, &amount.to_canonical_string());
        hash_var(&mut hasher, &source.key());
        hasher.update(at.as_ms().to_le_bytes());
        hex::encode(hasher.finalize())
    }

    /// True when the stored hash matches the entry contents.
    pub fn hash_is_valid(&self) -> bool {
        self.entry_hash
            == Self::compute_hash(
                &self.entry_id,
                &self.user_id,
                self.class,
                &self.amount,
                &self.source,
                self.at,
                &self.prev_hash,
            )
    }
}

/// Per-user balances by class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditBalance {
    /// Withdrawable.
    pub trade_revenue: Decimal,
    /// Restricted; never withdrawable.
    pub incentive_credit: Decimal,
}

impl CreditBalance {
    pub fn apply(&mut self, class: CreditClass, amount: Decimal) {
        match class {
            CreditClass::TradeRevenue => self.trade_revenue += amount,
            CreditClass::Incentive => self.incentive_credit += amount,
        }
    }
}

/// Proof of a completed withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub receipt_id: String,
    pub user_id: EntityId,
    pub amount: Decimal,
    pub at: TimeMs,
    pub remaining_trade_revenue: Decimal,
}
