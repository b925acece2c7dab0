//! Folds the order set into per-buyer and per-supplier rollups.
//!
//! The fold is recomputed from scratch on every call; nothing is cached.

use super::ledger_entry::{build_ledger_entry_with_fallback, LedgerEntry};
use super::settlement::buyer_status;
use crate::domain::{
    BuyerPaymentStatus, BuyerStatus, CommercialTerms, Decimal, EntityId, Order, OrderId,
    SupplierPayoutStatus, TermsBook, TimeMs,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Markup used for orders with no commercial terms in force.
pub const PLATFORM_DEFAULT_MARKUP_PERCENT: i64 = 15;

/// Terms applied to orders with nothing in the registry: default markup, due on receipt.
pub fn platform_default_terms() -> CommercialTerms {
    CommercialTerms::new(Decimal::from_i64(PLATFORM_DEFAULT_MARKUP_PERCENT), 0, 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollupRole {
    Buyer,
    Supplier,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRollup {
    pub order_count: u64,
    pub total_transacted: Decimal,
    /// Buyers: unpaid order totals. Suppliers: unremitted wholesale cost.
    pub outstanding: Decimal,
    /// Buyers only: the part of `outstanding` past its due date.
    pub overdue: Decimal,
}

/// Everything the ledger screens need, computed from one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupReport {
    pub buyers: BTreeMap<EntityId, EntityRollup>,
    pub suppliers: BTreeMap<EntityId, EntityRollup>,
    /// Lifetime platform margin across all orders.
    pub platform_profit: Decimal,
    /// Orders whose terms fell back to the platform default.
    pub defaulted_orders: Vec<OrderId>,
}

impl RollupReport {
    pub fn rollup_for(&self, entity: &EntityId, role: RollupRole) -> EntityRollup {
        let map = match role {
            RollupRole::Buyer => &self.buyers,
            RollupRole::Supplier => &self.suppliers,
        };
        map.get(entity).cloned().unwrap_or_default()
    }
}

/// Ledger entry for rollup purposes: registry terms, else platform default.
///
/// Returns the entry and whether the default was used.
pub fn entry_for_rollup(order: &Order, terms: &TermsBook) -> (LedgerEntry, bool) {
    let in_force = terms
        .terms_at(&order.buyer_id, order.order_timestamp)
        .filter(|t| t.validation_error().is_none());
    match in_force {
        Some(t) => match build_ledger_entry_with_fallback(order, Some(t), None) {
            Ok(entry) => (entry, false),
            Err(_) => (platform_default_entry(order), true),
        },
        None => (platform_default_entry(order), true),
    }
}

/// Ledger entry under [`platform_default_terms`], flagged as defaulted.
pub fn platform_default_entry(order: &Order) -> LedgerEntry {
    let default_terms = platform_default_terms();
    let wholesale_cost =
        super::ledger_entry::wholesale_cost(order.total_amount, default_terms.markup_percent);
    LedgerEntry {
        order_id: order.id.clone(),
        total_amount: order.total_amount,
        markup_percent: default_terms.markup_percent,
        wholesale_cost,
        platform_margin: order.total_amount - wholesale_cost,
        buyer_due: order.order_timestamp,
        supplier_due: order.order_timestamp,
        terms_defaulted: true,
    }
}

/// Fold `orders` under `terms` into a full report as of `now`.
pub fn rollup(orders: &[Order], terms: &TermsBook, now: TimeMs) -> RollupReport {
    let mut report = RollupReport::default();

    for order in orders {
        let (entry, defaulted) = entry_for_rollup(order, terms);
        if defaulted {
            report.defaulted_orders.push(order.id.clone());
        }

        let buyer = report.buyers.entry(order.buyer_id.clone()).or_default();
        buyer.order_count += 1;
        buyer.total_transacted += order.total_amount;
        if order.buyer_payment_status != BuyerPaymentStatus::Paid {
            buyer.outstanding += order.total_amount;
        }
        if buyer_status(order, entry.buyer_due, now) == BuyerStatus::Overdue {
            buyer.overdue += order.total_amount;
        }

        let supplier = report.suppliers.entry(order.seller_id.clone()).or_default();
        supplier.order_count += 1;
        supplier.total_transacted += order.total_amount;
        if order.supplier_payout_status != SupplierPayoutStatus::Remitted {
            supplier.outstanding += entry.wholesale_cost;
        }

        report.platform_profit += entry.platform_margin;
    }

    report.defaulted_orders.sort();
    report.defaulted_orders.dedup();

    if !report.defaulted_orders.is_empty() {
        tracing::warn!(
            count = report.defaulted_orders.len(),
            "Rollup used platform default terms for some orders"
        );
    }

    report
}
