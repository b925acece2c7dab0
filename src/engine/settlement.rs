//! Settlement status machine: buyer payment and supplier payout tracks.
//!
//! Buyer track: Unpaid -> Paid, with Overdue derived from the due date.
//! Supplier track: Pending -> Remitted. Paid and Remitted are terminal.

use crate::domain::{
    BuyerPaymentStatus, BuyerStatus, Decimal, EntityId, Order, OrderId, Receipted,
    SupplierPayoutStatus, TimeMs, Track,
};
use crate::error::LedgerError;
use serde::{Deserialize, Serialize};

/// Proof of payment or remittance signalled by the upload collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceEvent {
    pub order_id: OrderId,
    pub track: Track,
    pub evidence_ref: String,
    pub timestamp: TimeMs,
}

/// Emitted on every transition into a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SettlementEvent {
    #[serde(rename_all = "camelCase")]
    BuyerPaid {
        order_id: OrderId,
        buyer_id: EntityId,
        seller_id: EntityId,
        total_amount: Decimal,
        evidence_ref: String,
        at: TimeMs,
    },
    #[serde(rename_all = "camelCase")]
    SupplierRemitted {
        order_id: OrderId,
        seller_id: EntityId,
        evidence_ref: String,
        at: TimeMs,
    },
}

impl SettlementEvent {
    pub fn order_id(&self) -> &OrderId {
        match self {
            SettlementEvent::BuyerPaid { order_id, .. }
            | SettlementEvent::SupplierRemitted { order_id, .. } => order_id,
        }
    }
}

/// Buyer status as of `now`: Unpaid turns into Overdue once `now > buyer_due`.
pub fn buyer_status(order: &Order, buyer_due: TimeMs, now: TimeMs) -> BuyerStatus {
    match order.buyer_payment_status {
        BuyerPaymentStatus::Paid => BuyerStatus::Paid,
        BuyerPaymentStatus::Unpaid if now > buyer_due => BuyerStatus::Overdue,
        BuyerPaymentStatus::Unpaid => BuyerStatus::Unpaid,
    }
}

/// Check that `event` may be applied to `order` without mutating anything.
///
/// # Errors
/// `MissingEvidence` for a blank evidence reference, `InvalidTransition` when
/// the track is already terminal.
pub fn check_transition(order: &Order, event: &EvidenceEvent) -> Result<(), LedgerError> {
    if event.evidence_ref.trim().is_empty() {
        return Err(LedgerError::MissingEvidence {
            order_id: order.id.clone(),
            track: event.track,
        });
    }

    match event.track {
        Track::Buyer if order.buyer_payment_status == BuyerPaymentStatus::Paid => {
            Err(LedgerError::InvalidTransition {
                order_id: order.id.clone(),
                track: Track::Buyer,
                current: BuyerPaymentStatus::Paid.as_str().to_string(),
            })
        }
        Track::Supplier if order.supplier_payout_status == SupplierPayoutStatus::Remitted => {
            Err(LedgerError::InvalidTransition {
                order_id: order.id.clone(),
                track: Track::Supplier,
                current: SupplierPayoutStatus::Remitted.as_str().to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Apply `event` to `order` in place and return the emitted event.
pub fn apply_transition(
    order: &mut Order,
    event: &EvidenceEvent,
) -> Result<SettlementEvent, LedgerError> {
    check_transition(order, event)?;

    let receipt = Receipted {
        evidence_ref: event.evidence_ref.trim().to_string(),
        at: event.timestamp,
    };

    let emitted = match event.track {
        Track::Buyer => {
            order.buyer_payment_status = BuyerPaymentStatus::Paid;
            order.buyer_receipt = Some(receipt.clone());
            SettlementEvent::BuyerPaid {
                order_id: order.id.clone(),
                buyer_id: order.buyer_id.clone(),
                seller_id: order.seller_id.clone(),
                total_amount: order.total_amount,
                evidence_ref: receipt.evidence_ref,
                at: receipt.at,
            }
        }
        Track::Supplier => {
            order.supplier_payout_status = SupplierPayoutStatus::Remitted;
            order.supplier_receipt = Some(receipt.clone());
            SettlementEvent::SupplierRemitted {
                order_id: order.id.clone(),
                seller_id: order.seller_id.clone(),
                evidence_ref: receipt.evidence_ref,
                at: receipt.at,
            }
        }
    };

    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LineItem;

    fn order() -> Order {
        Order::new(
            OrderId::new("o1"),
            EntityId::new("grocer-1"),
            EntityId::new("farm-1"),
            vec![LineItem::new("beets", Decimal::from_i64(1), Decimal::from_i64(115))],
            Decimal::from_i64(115),
            TimeMs::new(0),
        )
    }

    fn evidence(track: Track, evidence_ref: &str) -> EvidenceEvent {
        EvidenceEvent {
            order_id: OrderId::new("o1"),
            track,
            evidence_ref: evidence_ref.to_string(),
            timestamp: TimeMs::new(5_000),
        }
    }

    #[test]
    fn test_buyer_paid_records_receipt() {
        let mut o = order();
        let emitted = apply_transition(&mut o, &evidence(Track::Buyer, " rcpt-1 ")).unwrap();
        assert_eq!(o.buyer_payment_status, BuyerPaymentStatus::Paid);
        assert_eq!(
            o.buyer_receipt,
            Some(Receipted {
                evidence_ref: "rcpt-1".to_string(),
                at: TimeMs::new(5_000)
            })
        );
        assert!(matches!(emitted, SettlementEvent::BuyerPaid { .. }));
        assert_eq!(o.supplier_payout_status, SupplierPayoutStatus::Pending);
    }

    #[test]
    fn test_missing_evidence_rejected() {
        let mut o = order();
        let err = apply_transition(&mut o, &evidence(Track::Buyer, "   ")).unwrap_err();
        assert!(matches!(err, LedgerError::MissingEvidence { .. }));
        assert_eq!(o.buyer_payment_status, BuyerPaymentStatus::Unpaid);
        assert!(o.buyer_receipt.is_none());
    }

    #[test]
    fn test_no_transition_out_of_paid() {
        let mut o = order();
        apply_transition(&mut o, &evidence(Track::Buyer, "a")).unwrap();
        let err = apply_transition(&mut o, &evidence(Track::Buyer, "b")).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition {
                track: Track::Buyer,
                ..
            }
        ));
        assert_eq!(o.buyer_receipt.as_ref().unwrap().evidence_ref, "a");
    }

    #[test]
    fn test_no_transition_out_of_remitted() {
        let mut o = order();
        apply_transition(&mut o, &evidence(Track::Supplier, "wire-1")).unwrap();
        let err = apply_transition(&mut o, &evidence(Track::Supplier, "wire-2")).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition {
                track: Track::Supplier,
                ..
            }
        ));
    }

    #[test]
    fn test_tracks_are_independent() {
        let mut o = order();
        apply_transition(&mut o, &evidence(Track::Supplier, "wire-1")).unwrap();
        assert_eq!(o.buyer_payment_status, BuyerPaymentStatus::Unpaid);
        apply_transition(&mut o, &evidence(Track::Buyer, "rcpt-1")).unwrap();
        assert_eq!(o.integrity_violation(), None);
    }

    #[test]
    fn test_overdue_is_derived() {
        let o = order();
        let due = TimeMs::new(1_000);
        assert_eq!(buyer_status(&o, due, TimeMs::new(1_000)), BuyerStatus::Unpaid);
        assert_eq!(buyer_status(&o, due, TimeMs::new(1_001)), BuyerStatus::Overdue);
        assert_eq!(o.buyer_payment_status, BuyerPaymentStatus::Unpaid);
    }

    #[test]
    fn test_overdue_can_still_be_paid() {
        let mut o = order();
        let due = TimeMs::new(1_000);
        assert_eq!(buyer_status(&o, due, TimeMs::new(9_000)), BuyerStatus::Overdue);
        apply_transition(&mut o, &evidence(Track::Buyer, "late")).unwrap();
        assert_eq!(buyer_status(&o, due, TimeMs::new(9_000)), BuyerStatus::Paid);
    }
}
