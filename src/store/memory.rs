//! In-memory store for tests and the `memory` backend.

use super::{
    AppendOutcome, IncentiveSnapshot, LedgerStore, SettlementSnapshot, StoreError,
};
use crate::domain::{
    BuyerPaymentStatus, CommercialTerms, CreditBalance, CreditEntry, EntityId, IncentiveConfig,
    IncentiveGrant, Order, OrderId, Receipted, Role, SpendSample, SupplierPayoutStatus,
    TermsBook, TermsVersion, TimeMs, GENESIS_HASH,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    orders: BTreeMap<OrderId, Order>,
    terms: TermsBook,
    configs: HashMap<Role, IncentiveConfig>,
    grants: BTreeMap<EntityId, IncentiveGrant>,
    spend: Vec<SpendSample>,
    credits: HashMap<EntityId, Vec<CreditEntry>>,
    credit_keys: HashSet<(EntityId, String)>,
    balances: HashMap<EntityId, CreditBalance>,
    quarantine: HashMap<String, String>,
}

/// Store backed by a single lock, so every read sees one consistent state.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a user's cached balance without touching the ledger.
    ///
    /// Only useful for exercising corruption detection.
    pub async fn overwrite_cached_balance(&self, user: &EntityId, balance: CreditBalance) {
        self.state.write().await.balances.insert(user.clone(), balance);
    }

    /// Replace a stored order as-is, bypassing every check.
    pub async fn overwrite_order(&self, order: Order) {
        self.state
            .write()
            .await
            .orders
            .insert(order.id.clone(), order);
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.id) {
            return Ok(false);
        }
        state.orders.insert(order.id.clone(), order.clone());
        Ok(true)
    }

    async fn get_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.state.read().await.orders.get(id).cloned())
    }

    async fn latest_order_time(&self, buyer: &EntityId) -> Result<Option<TimeMs>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.buyer_id == *buyer)
            .map(|o| o.order_timestamp)
            .max())
    }

    async fn record_buyer_payment(
        &self,
        id: &OrderId,
        receipt: &Receipted,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(id) {
            Some(order) if order.buyer_payment_status == BuyerPaymentStatus::Unpaid => {
                order.buyer_payment_status = BuyerPaymentStatus::Paid;
                order.buyer_receipt = Some(receipt.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_supplier_remittance(
        &self,
        id: &OrderId,
        receipt: &Receipted,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(id) {
            Some(order) if order.supplier_payout_status == SupplierPayoutStatus::Pending => {
                order.supplier_payout_status = SupplierPayoutStatus::Remitted;
                order.supplier_receipt = Some(receipt.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_terms(
        &self,
        buyer: &EntityId,
        terms: &CommercialTerms,
        effective_from: TimeMs,
    ) -> Result<TermsVersion, StoreError> {
        let mut state = self.state.write().await;
        let version = TermsVersion {
            version: state.terms.next_version(buyer),
            effective_from,
            terms: terms.clone(),
        };
        state.terms.insert(buyer.clone(), version.clone());
        Ok(version)
    }

    async fn terms_history(&self, buyer: &EntityId) -> Result<Vec<TermsVersion>, StoreError> {
        Ok(self.state.read().await.terms.history(buyer).to_vec())
    }

    async fn terms_at(
        &self,
        buyer: &EntityId,
        at: TimeMs,
    ) -> Result<Option<CommercialTerms>, StoreError> {
        Ok(self.state.read().await.terms.terms_at(buyer, at).cloned())
    }

    async fn settlement_snapshot(&self) -> Result<SettlementSnapshot, StoreError> {
        let state = self.state.read().await;
        Ok(SettlementSnapshot {
            orders: state.orders.values().cloned().collect(),
            terms: state.terms.clone(),
            quarantined: state.quarantine.keys().cloned().collect(),
        })
    }

    async fn put_incentive_config(
        &self,
        role: Role,
        config: &IncentiveConfig,
    ) -> Result<(), StoreError> {
        self.state.write().await.configs.insert(role, config.clone());
        Ok(())
    }

    async fn get_incentive_config(
        &self,
        role: Role,
    ) -> Result<Option<IncentiveConfig>, StoreError> {
        Ok(self.state.read().await.configs.get(&role).cloned())
    }

    async fn insert_grant(&self, grant: &IncentiveGrant) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.grants.contains_key(&grant.user_id) {
            return Ok(false);
        }
        state.grants.insert(grant.user_id.clone(), grant.clone());
        Ok(true)
    }

    async fn list_grants(&self) -> Result<Vec<IncentiveGrant>, StoreError> {
        Ok(self.state.read().await.grants.values().cloned().collect())
    }

    async fn insert_spend_sample(&self, sample: &SpendSample) -> Result<(), StoreError> {
        self.state.write().await.spend.push(sample.clone());
        Ok(())
    }

    async fn incentive_snapshot(
        &self,
        user: &EntityId,
    ) -> Result<Option<IncentiveSnapshot>, StoreError> {
        let state = self.state.read().await;
        let Some(grant) = state.grants.get(user).cloned() else {
            return Ok(None);
        };
        let order_times = state
            .orders
            .values()
            .filter(|o| &o.buyer_id == user)
            .map(|o| o.order_timestamp)
            .collect();
        let spend = state
            .spend
            .iter()
            .filter(|s| &s.user_id == user)
            .cloned()
            .collect();
        Ok(Some(IncentiveSnapshot {
            grant,
            order_times,
            spend,
        }))
    }

    async fn append_credit(&self, entry: &CreditEntry) -> Result<AppendOutcome, StoreError> {
        let mut state = self.state.write().await;
        let key = (entry.user_id.clone(), entry.source.key());
        if state.credit_keys.contains(&key) {
            return Ok(AppendOutcome::DuplicateSource);
        }

        let head = state
            .credits
            .get(&entry.user_id)
            .and_then(|entries| entries.last())
            .map(|e| e.entry_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        if head != entry.prev_hash {
            return Ok(AppendOutcome::StaleChain);
        }

        state.credit_keys.insert(key);
        state
            .credits
            .entry(entry.user_id.clone())
            .or_default()
            .push(entry.clone());
        state
            .balances
            .entry(entry.user_id.clone())
            .or_default()
            .apply(entry.class, entry.amount);
        Ok(AppendOutcome::Appended)
    }

    async fn credit_ledger(
        &self,
        user: &EntityId,
    ) -> Result<(Vec<CreditEntry>, CreditBalance), StoreError> {
        let state = self.state.read().await;
        let entries = state.credits.get(user).cloned().unwrap_or_default();
        let balance = state.balances.get(user).copied().unwrap_or_default();
        Ok((entries, balance))
    }

    async fn quarantine(
        &self,
        entity_key: &str,
        reason: &str,
        _at: TimeMs,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .quarantine
            .entry(entity_key.to_string())
            .or_insert_with(|| reason.to_string());
        Ok(())
    }

    async fn quarantine_reason(&self, entity_key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.state.read().await.quarantine.get(entity_key).cloned())
    }

    async fn release_quarantine(&self, entity_key: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .write()
            .await
            .quarantine
            .remove(entity_key)
            .is_some())
    }
}
