//! Derives the per-order ledger entry from an order and the terms in force.

use crate::domain::{CommercialTerms, Decimal, Order, OrderId, TimeMs};
use crate::error::LedgerError;
use serde::{Deserialize, Serialize};

/// Money split and due dates for one order. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub order_id: OrderId,
    pub total_amount: Decimal,
    pub markup_percent: Decimal,
    /// Owed to the supplier.
    pub wholesale_cost: Decimal,
    /// Kept by the platform.
    pub platform_margin: Decimal,
    pub buyer_due: TimeMs,
    pub supplier_due: TimeMs,
    /// True when the terms came from a configured fallback rather than the registry.
    pub terms_defaulted: bool,
}

/// `total / (1 + markup/100)` rounded half-up to cents.
pub fn wholesale_cost(total: Decimal, markup_percent: Decimal) -> Decimal {
    let divisor = Decimal::one() + markup_percent / Decimal::hundred();
    match total.checked_div(divisor) {
        Some(cost) => cost.round_currency(),
        // markup of exactly -100% is rejected before reaching here
        None => total,
    }
}

/// Build the ledger entry for `order` under `terms`.
///
/// Pure and idempotent.
///
/// # Errors
/// `InvalidTerms` when no terms are supplied or the markup is negative.
pub fn build_ledger_entry(
    order: &Order,
    terms: Option<&CommercialTerms>,
) -> Result<LedgerEntry, LedgerError> {
    let terms = terms.ok_or_else(|| LedgerError::InvalidTerms {
        buyer: order.buyer_id.clone(),
        reason: format!(
            "no commercial terms in force at order time {} for order {}",
            order.order_timestamp, order.id
        ),
    })?;
    entry_from_terms(order, terms, false)
}

/// Like [`build_ledger_entry`] but substitutes `fallback` when the registry has
/// no terms. The resulting entry is marked `terms_defaulted`.
pub fn build_ledger_entry_with_fallback(
    order: &Order,
    terms: Option<&CommercialTerms>,
    fallback: Option<&CommercialTerms>,
) -> Result<LedgerEntry, LedgerError> {
    match (terms, fallback) {
        (Some(terms), _) => entry_from_terms(order, terms, false),
        (None, Some(fallback)) => {
            tracing::warn!(
                order_id = %order.id,
                buyer_id = %order.buyer_id,
                markup_percent = %fallback.markup_percent,
                "No commercial terms in force, using configured fallback terms"
            );
            entry_from_terms(order, fallback, true)
        }
        (None, None) => build_ledger_entry(order, None),
    }
}

fn entry_from_terms(
    order: &Order,
    terms: &CommercialTerms,
    terms_defaulted: bool,
) -> Result<LedgerEntry, LedgerError> {
    if let Some(reason) = terms.validation_error() {
        return Err(LedgerError::InvalidTerms {
            buyer: order.buyer_id.clone(),
            reason,
        });
    }

    let wholesale_cost = wholesale_cost(order.total_amount, terms.markup_percent);
    let platform_margin = order.total_amount - wholesale_cost;

    Ok(LedgerEntry {
        order_id: order.id.clone(),
        total_amount: order.total_amount,
        markup_percent: terms.markup_percent,
        wholesale_cost,
        platform_margin,
        buyer_due: order
            .order_timestamp
            .plus_days(terms.buyer_payment_term_days),
        supplier_due: order
            .order_timestamp
            .plus_days(terms.supplier_payment_term_days),
        terms_defaulted,
    })
}
