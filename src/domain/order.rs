//! Checkout order records and their settlement state.

use crate::domain::{Decimal, EntityId, OrderId, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One product line on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn new(product_id: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    /// `quantity * unit_price`, or `None` on overflow.
    pub fn line_total(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.unit_price)
    }
}

/// Persisted buyer payment status. `Overdue` is never stored; see [`BuyerStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuyerPaymentStatus {
    Unpaid,
    Paid,
}

impl BuyerPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuyerPaymentStatus::Unpaid => "unpaid",
            BuyerPaymentStatus::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(BuyerPaymentStatus::Unpaid),
            "paid" => Some(BuyerPaymentStatus::Paid),
            _ => None,
        }
    }
}

/// Buyer payment status as shown to collaborators, including derived `Overdue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuyerStatus {
    Unpaid,
    Paid,
    Overdue,
}

impl fmt::Display for BuyerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuyerStatus::Unpaid => write!(f, "unpaid"),
            BuyerStatus::Paid => write!(f, "paid"),
            BuyerStatus::Overdue => write!(f, "overdue"),
        }
    }
}

/// Supplier payout status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupplierPayoutStatus {
    Pending,
    Remitted,
}

impl SupplierPayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupplierPayoutStatus::Pending => "pending",
            SupplierPayoutStatus::Remitted => "remitted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SupplierPayoutStatus::Pending),
            "remitted" => Some(SupplierPayoutStatus::Remitted),
            _ => None,
        }
    }
}

impl fmt::Display for SupplierPayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Proof attached to a completed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipted {
    pub evidence_ref: String,
    pub at: TimeMs,
}

/// A checkout order.
///
/// Core fields are immutable once created; the two status tracks are owned
/// by the settlement state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub buyer_id: EntityId,
    pub seller_id: EntityId,
    pub items: Vec<LineItem>,
    pub total_amount: Decimal,
    pub order_timestamp: TimeMs,
    pub buyer_payment_status: BuyerPaymentStatus,
    /// Set only when Paid.
    pub buyer_receipt: Option<Receipted>,
    pub supplier_payout_status: SupplierPayoutStatus,
    /// Set only when Remitted.
    pub supplier_receipt: Option<Receipted>,
}

impl Order {
    /// New unpaid, pending order at checkout.
    pub fn new(
        id: OrderId,
        buyer_id: EntityId,
        seller_id: EntityId,
        items: Vec<LineItem>,
        total_amount: Decimal,
        order_timestamp: TimeMs,
    ) -> Self {
        Self {
            id,
            buyer_id,
            seller_id,
            items,
            total_amount,
            order_timestamp,
            buyer_payment_status: BuyerPaymentStatus::Unpaid,
            buyer_receipt: None,
            supplier_payout_status: SupplierPayoutStatus::Pending,
            supplier_receipt: None,
        }
    }

    /// Sum of line totals, or `None` if any step overflows.
    pub fn items_total(&self) -> Option<Decimal> {
        self.items
            .iter()
            .try_fold(Decimal::zero(), |acc, item| acc.checked_add(item.line_total()?))
    }

    /// Verifies the financial invariants of the record.
    ///
    /// Returns a human-readable description of the first violation.
    pub fn integrity_violation(&self) -> Option<String> {
        let Some(items_total) = self.items_total() else {
            return Some(format!("order {} line item totals overflow", self.id));
        };
        if items_total != self.total_amount {
            return Some(format!(
                "order {} totalAmount {} != sum of line items {}",
                self.id, self.total_amount, items_total
            ));
        }
        if self.total_amount.is_negative() {
            return Some(format!("order {} has negative total", self.id));
        }
        match (self.buyer_payment_status, &self.buyer_receipt) {
            (BuyerPaymentStatus::Paid, None) => {
                return Some(format!("order {} is paid without a receipt", self.id))
            }
            (BuyerPaymentStatus::Unpaid, Some(_)) => {
                return Some(format!("order {} is unpaid but carries a receipt", self.id))
            }
            _ => {}
        }
        match (self.supplier_payout_status, &self.supplier_receipt) {
            (SupplierPayoutStatus::Remitted, None) => {
                Some(format!("order {} is remitted without a receipt", self.id))
            }
            (SupplierPayoutStatus::Pending, Some(_)) => Some(format!(
                "order {} is pending payout but carries a receipt",
                self.id
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn order(total: &str) -> Order {
        Order::new(
            OrderId::new("o1"),
            EntityId::new("grocer-1"),
            EntityId::new("farm-1"),
            vec![
                LineItem::new("tomato", d("10"), d("2.50")),
                LineItem::new("kale", d("3"), d("30")),
            ],
            d(total),
            TimeMs::new(0),
        )
    }

    #[test]
    fn test_items_total() {
        assert_eq!(order("115").items_total(), Some(d("115")));
    }

    #[test]
    fn test_items_total_overflow_is_reported() {
        let mut o = order("1");
        o.items = vec![LineItem::new(
            "melons",
            d("79228162514264337593543950335"),
            d("2"),
        )];
        assert_eq!(o.items_total(), None);
        assert!(o.integrity_violation().unwrap().contains("overflow"));
    }

    #[test]
    fn test_integrity_ok() {
        assert_eq!(order("115.00").integrity_violation(), None);
    }

    #[test]
    fn test_integrity_detects_total_mismatch() {
        let violation = order("116").integrity_violation().unwrap();
        assert!(violation.contains("!= sum of line items"));
    }

    #[test]
    fn test_integrity_detects_paid_without_receipt() {
        let mut o = order("115");
        o.buyer_payment_status = BuyerPaymentStatus::Paid;
        assert!(o.integrity_violation().unwrap().contains("without a receipt"));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for s in [BuyerPaymentStatus::Unpaid, BuyerPaymentStatus::Paid] {
            assert_eq!(BuyerPaymentStatus::parse(s.as_str()), Some(s));
        }
        for s in [SupplierPayoutStatus::Pending, SupplierPayoutStatus::Remitted] {
            assert_eq!(SupplierPayoutStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(BuyerPaymentStatus::parse("overdue"), None);
    }
}
