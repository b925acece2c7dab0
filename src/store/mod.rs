//! Persistence abstraction for orders, terms, incentives, and credit ledgers.
//!
//! Two implementations exist: the SQLite [`crate::db::Repository`] and the
//! in-memory [`MemoryStore`]. Multi-step invariants (per-entity locking,
//! status checks) live in the service layer; the store guarantees that each
//! individual write is atomic and that conditional writes are compare-and-set.

use crate::domain::{
    CommercialTerms, CreditBalance, CreditEntry, EntityId, IncentiveConfig, IncentiveGrant,
    Order, OrderId, Receipted, Role, SpendSample, TermsBook, TermsVersion, TimeMs,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryStore;

/// Orders, terms and quarantined entity keys read at one logical instant.
#[derive(Debug, Clone, Default)]
pub struct SettlementSnapshot {
    pub orders: Vec<Order>,
    pub terms: TermsBook,
    pub quarantined: HashSet<String>,
}

/// Everything needed to evaluate one user's grant, read at one logical instant.
#[derive(Debug, Clone)]
pub struct IncentiveSnapshot {
    pub grant: IncentiveGrant,
    /// Timestamps of orders the user placed as buyer.
    pub order_times: Vec<TimeMs>,
    pub spend: Vec<SpendSample>,
}

/// Outcome of appending to a user's credit ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// An entry with the same source key already exists for the user.
    DuplicateSource,
    /// `prev_hash` is not the current head of the user's chain.
    StaleChain,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt stored value in {table}: {detail}")]
    Decode { table: &'static str, detail: String },
    #[error("write contention: {0}")]
    Contention(String),
}

impl StoreError {
    pub fn decode(table: &'static str, detail: impl Into<String>) -> Self {
        StoreError::Decode {
            table,
            detail: detail.into(),
        }
    }
}

/// Repository interface injected into the service layer.
#[async_trait]
pub trait LedgerStore: Send + Sync + fmt::Debug {
    // ----- orders -----

    /// Insert a new order. Returns false if the id already exists.
    async fn insert_order(&self, order: &Order) -> Result<bool, StoreError>;

    async fn get_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;

    /// Timestamp of the latest order placed by `buyer`.
    async fn latest_order_time(&self, buyer: &EntityId) -> Result<Option<TimeMs>, StoreError>;

    /// Compare-and-set Unpaid -> Paid. Returns false if the order was not Unpaid.
    async fn record_buyer_payment(
        &self,
        id: &OrderId,
        receipt: &Receipted,
    ) -> Result<bool, StoreError>;

    /// Compare-and-set Pending -> Remitted. Returns false if the order was not Pending.
    async fn record_supplier_remittance(
        &self,
        id: &OrderId,
        receipt: &Receipted,
    ) -> Result<bool, StoreError>;

    // ----- terms registry -----

    /// Append a terms version for `buyer` effective from `effective_from`.
    async fn append_terms(
        &self,
        buyer: &EntityId,
        terms: &CommercialTerms,
        effective_from: TimeMs,
    ) -> Result<TermsVersion, StoreError>;

    async fn terms_history(&self, buyer: &EntityId) -> Result<Vec<TermsVersion>, StoreError>;

    async fn terms_at(
        &self,
        buyer: &EntityId,
        at: TimeMs,
    ) -> Result<Option<CommercialTerms>, StoreError>;

    async fn settlement_snapshot(&self) -> Result<SettlementSnapshot, StoreError>;

    // ----- incentives -----

    async fn put_incentive_config(
        &self,
        role: Role,
        config: &IncentiveConfig,
    ) -> Result<(), StoreError>;

    async fn get_incentive_config(&self, role: Role)
        -> Result<Option<IncentiveConfig>, StoreError>;

    /// Insert a grant. Returns false if the user already holds one.
    async fn insert_grant(&self, grant: &IncentiveGrant) -> Result<bool, StoreError>;

    async fn list_grants(&self) -> Result<Vec<IncentiveGrant>, StoreError>;

    async fn insert_spend_sample(&self, sample: &SpendSample) -> Result<(), StoreError>;

    async fn incentive_snapshot(
        &self,
        user: &EntityId,
    ) -> Result<Option<IncentiveSnapshot>, StoreError>;

    // ----- credit ledger -----

    /// Append `entry` and update the cached balance in the same write.
    async fn append_credit(&self, entry: &CreditEntry) -> Result<AppendOutcome, StoreError>;

    /// The user's entries in append order together with the cached balance.
    async fn credit_ledger(
        &self,
        user: &EntityId,
    ) -> Result<(Vec<CreditEntry>, CreditBalance), StoreError>;

    // ----- quarantine -----

    async fn quarantine(&self, entity_key: &str, reason: &str, at: TimeMs)
        -> Result<(), StoreError>;

    async fn quarantine_reason(&self, entity_key: &str) -> Result<Option<String>, StoreError>;

    /// Returns false if the entity was not quarantined.
    async fn release_quarantine(&self, entity_key: &str) -> Result<bool, StoreError>;
}

/// Quarantine key for an order.
pub fn order_key(id: &OrderId) -> String {
    format!("order:{}", id)
}

/// Quarantine key for a user's credit ledger.
pub fn user_key(id: &EntityId) -> String {
    format!("user:{}", id)
}

/// Lock key for a buyer's terms registry.
pub fn terms_key(buyer: &EntityId) -> String {
    format!("terms:{}", buyer)
}
