//! Ledger service: wires the store to the pure engines.
//!
//! Every mutation of an order runs under that order's lock, and every credit
//! ledger write under the user's lock. Terms changes and order ingestion for a
//! buyer also serialize on the buyer's terms lock. Locks are always taken in
//! the order terms, order, user. Conditional writes in the store back the
//! locks up when more than one process shares a database.

mod credits;
mod incentives;
pub mod locks;
mod sweep;

pub use credits::CreditStatement;
pub use incentives::IncentiveSchedule;
pub use locks::KeyedLocks;
pub use sweep::SweepReport;

use crate::domain::{
    BuyerStatus, CommercialTerms, Decimal, EntityId, Order, OrderId, Receipted,
    SupplierPayoutStatus, TermsVersion, TimeMs, Track,
};
use crate::engine::{
    apply_transition, build_ledger_entry_with_fallback, buyer_status, platform_default_entry,
    rollup, EntityRollup, EvidenceEvent, LedgerEntry, RollupReport, RollupRole, SettlementEvent,
};
use crate::error::LedgerError;
use crate::store::{order_key, terms_key, LedgerStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Ledger entry plus the settlement state as of a read instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLedgerView {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub buyer_id: EntityId,
    pub seller_id: EntityId,
    pub buyer_status: BuyerStatus,
    pub supplier_status: SupplierPayoutStatus,
    pub buyer_receipt: Option<Receipted>,
    pub supplier_receipt: Option<Receipted>,
}

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    locks: KeyedLocks,
    fallback_terms: Option<CommercialTerms>,
    events: broadcast::Sender<SettlementEvent>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            locks: KeyedLocks::new(),
            fallback_terms: None,
            events,
        }
    }

    /// Use `markup_percent` (due on receipt) for orders with no terms in force.
    pub fn with_fallback_markup(mut self, markup_percent: Decimal) -> Self {
        self.fallback_terms = Some(CommercialTerms::new(markup_percent, 0, 0));
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Receive every settlement event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Record a new order at checkout.
    ///
    /// Re-submitting an identical order is a no-op.
    ///
    /// # Errors
    /// `DataCorruption` when the total disagrees with the line items,
    /// `InvalidInput` for malformed orders or an id reused with other contents.
    pub async fn ingest_order(&self, order: Order) -> Result<Order, LedgerError> {
        if order.id.as_str().trim().is_empty()
            || order.buyer_id.as_str().trim().is_empty()
            || order.seller_id.as_str().trim().is_empty()
        {
            return Err(LedgerError::InvalidInput(
                "order id, buyer id and seller id are required".to_string(),
            ));
        }
        if order.items.is_empty() {
            return Err(LedgerError::InvalidInput(format!(
                "order {} has no line items",
                order.id
            )));
        }
        if order.items_total().is_none() {
            return Err(LedgerError::InvalidInput(format!(
                "order {} line item totals exceed the supported amount range",
                order.id
            )));
        }
        if let Some(detail) = order.integrity_violation() {
            return Err(LedgerError::DataCorruption {
                entity: order_key(&order.id),
                detail,
            });
        }

        // Terms before order: a concurrent set_terms cannot slip a version
        // in front of an order being recorded.
        let _terms_guard = self.locks.acquire(&terms_key(&order.buyer_id)).await;
        let _guard = self.locks.acquire(&order_key(&order.id)).await;
        if self.store.insert_order(&order).await? {
            info!(
                order_id = %order.id,
                buyer_id = %order.buyer_id,
                seller_id = %order.seller_id,
                total = %order.total_amount,
                "order recorded"
            );
            return Ok(order);
        }

        let existing = self.load_order(&order.id).await?;
        let same = existing.buyer_id == order.buyer_id
            && existing.seller_id == order.seller_id
            && existing.items == order.items
            && existing.total_amount == order.total_amount
            && existing.order_timestamp == order.order_timestamp;
        if same {
            Ok(existing)
        } else {
            Err(LedgerError::InvalidInput(format!(
                "order {} already exists with different contents",
                order.id
            )))
        }
    }

    /// Ledger entry and derived statuses for one order as of `now`.
    ///
    /// # Errors
    /// `NotFound`, `Quarantined`, `DataCorruption`, or `InvalidTerms` when no
    /// terms were in force at order time and no fallback is configured.
    pub async fn get_ledger_entry(
        &self,
        order_id: &OrderId,
        now: TimeMs,
    ) -> Result<OrderLedgerView, LedgerError> {
        self.ensure_not_quarantined(&order_key(order_id)).await?;
        let order = self.load_order(order_id).await?;
        let terms = self
            .store
            .terms_at(&order.buyer_id, order.order_timestamp)
            .await?;
        let entry =
            build_ledger_entry_with_fallback(&order, terms.as_ref(), self.fallback_terms.as_ref())?;

        Ok(OrderLedgerView {
            buyer_status: buyer_status(&order, entry.buyer_due, now),
            supplier_status: order.supplier_payout_status,
            buyer_id: order.buyer_id,
            seller_id: order.seller_id,
            buyer_receipt: order.buyer_receipt,
            supplier_receipt: order.supplier_receipt,
            entry,
        })
    }

    // =========================================================================
    // Terms
    // =========================================================================

    /// Append a terms version for `buyer` effective from `effective_from`.
    ///
    /// Terms only ever apply forward: `effective_from` must be later than
    /// every order already recorded for the buyer and no earlier than the
    /// current latest version, so existing ledger entries never change.
    pub async fn set_terms(
        &self,
        buyer: &EntityId,
        terms: CommercialTerms,
        effective_from: TimeMs,
    ) -> Result<TermsVersion, LedgerError> {
        if buyer.as_str().trim().is_empty() {
            return Err(LedgerError::InvalidInput("buyer id is required".to_string()));
        }
        if let Some(reason) = terms.validation_error() {
            return Err(LedgerError::InvalidTerms {
                buyer: buyer.clone(),
                reason,
            });
        }

        let _guard = self.locks.acquire(&terms_key(buyer)).await;
        if let Some(latest_order) = self.store.latest_order_time(buyer).await? {
            if effective_from <= latest_order {
                return Err(LedgerError::InvalidTerms {
                    buyer: buyer.clone(),
                    reason: format!(
                        "effectiveFrom {} must be after the latest recorded order at {}",
                        effective_from, latest_order
                    ),
                });
            }
        }
        if let Some(current) = self.store.terms_history(buyer).await?.last() {
            if effective_from < current.effective_from {
                return Err(LedgerError::InvalidTerms {
                    buyer: buyer.clone(),
                    reason: format!(
                        "effectiveFrom {} precedes version {} effective from {}",
                        effective_from, current.version, current.effective_from
                    ),
                });
            }
        }

        let version = self.store.append_terms(buyer, &terms, effective_from).await?;
        info!(
            buyer_id = %buyer,
            version = version.version,
            effective_from = %effective_from,
            markup_percent = %terms.markup_percent,
            "commercial terms updated"
        );
        Ok(version)
    }

    pub async fn terms_history(&self, buyer: &EntityId) -> Result<Vec<TermsVersion>, LedgerError> {
        Ok(self.store.terms_history(buyer).await?)
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    /// Apply an evidence event to its order.
    ///
    /// A buyer payment also credits the seller's trade revenue with the
    /// order's wholesale cost. If that credit cannot be applied right away the
    /// payment still stands and the next sweep reconciles it.
    ///
    /// # Errors
    /// `MissingEvidence`, `InvalidTransition`, `NotFound`, `Quarantined`,
    /// `DataCorruption`.
    pub async fn record_evidence(
        &self,
        event: EvidenceEvent,
    ) -> Result<SettlementEvent, LedgerError> {
        let key = order_key(&event.order_id);
        let _guard = self.locks.acquire(&key).await;
        self.ensure_not_quarantined(&key).await?;

        let mut order = self.load_order(&event.order_id).await?;
        let emitted = apply_transition(&mut order, &event)?;
        let receipt = Receipted {
            evidence_ref: event.evidence_ref.trim().to_string(),
            at: event.timestamp,
        };

        let applied = match event.track {
            Track::Buyer => self.store.record_buyer_payment(&order.id, &receipt).await?,
            Track::Supplier => {
                self.store
                    .record_supplier_remittance(&order.id, &receipt)
                    .await?
            }
        };
        if !applied {
            // Lost a race with a writer outside this process.
            let current = self.load_order(&event.order_id).await?;
            let current = match event.track {
                Track::Buyer => current.buyer_payment_status.as_str(),
                Track::Supplier => current.supplier_payout_status.as_str(),
            };
            return Err(LedgerError::InvalidTransition {
                order_id: event.order_id,
                track: event.track,
                current: current.to_string(),
            });
        }

        info!(
            order_id = %order.id,
            track = %event.track,
            evidence_ref = %receipt.evidence_ref,
            "settlement transition recorded"
        );

        if let SettlementEvent::BuyerPaid { at, .. } = &emitted {
            if let Err(e) = self.credit_seller_for(&order, *at).await {
                warn!(
                    order_id = %order.id,
                    seller_id = %order.seller_id,
                    error = %e,
                    "seller credit deferred to next sweep"
                );
            }
        }

        // No subscribers is fine.
        let _ = self.events.send(emitted.clone());
        Ok(emitted)
    }

    // =========================================================================
    // Aggregation
    // =========================================================================

    /// Full rollup over one consistent snapshot of orders, terms and
    /// quarantine state.
    pub async fn rollup_report(&self, now: TimeMs) -> Result<RollupReport, LedgerError> {
        let snapshot = self.store.settlement_snapshot().await?;
        let mut clean = Vec::with_capacity(snapshot.orders.len());
        for order in snapshot.orders {
            let key = order_key(&order.id);
            if snapshot.quarantined.contains(&key) {
                continue;
            }
            if let Some(detail) = order.integrity_violation() {
                self.quarantine(&key, &detail, now).await?;
                continue;
            }
            clean.push(order);
        }
        Ok(rollup(&clean, &snapshot.terms, now))
    }

    pub async fn entity_rollup(
        &self,
        entity: &EntityId,
        role: RollupRole,
        now: TimeMs,
    ) -> Result<EntityRollup, LedgerError> {
        Ok(self.rollup_report(now).await?.rollup_for(entity, role))
    }

    // =========================================================================
    // Quarantine
    // =========================================================================

    pub async fn quarantine_reason(&self, entity_key: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.store.quarantine_reason(entity_key).await?)
    }

    /// Clear a quarantine after manual reconciliation.
    pub async fn release_quarantine(&self, entity_key: &str) -> Result<bool, LedgerError> {
        let released = self.store.release_quarantine(entity_key).await?;
        if released {
            info!(entity = %entity_key, "quarantine released");
        }
        Ok(released)
    }

    async fn ensure_not_quarantined(&self, entity_key: &str) -> Result<(), LedgerError> {
        match self.store.quarantine_reason(entity_key).await? {
            Some(reason) => Err(LedgerError::Quarantined {
                entity: entity_key.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    async fn quarantine(&self, entity_key: &str, detail: &str, at: TimeMs) -> Result<(), LedgerError> {
        error!(entity = %entity_key, detail = %detail, "data corruption, entity quarantined");
        self.store.quarantine(entity_key, detail, at).await?;
        Ok(())
    }

    /// Load an order, quarantining it if the stored record is inconsistent.
    async fn load_order(&self, id: &OrderId) -> Result<Order, LedgerError> {
        let key = order_key(id);
        let order = match self.store.get_order(id).await {
            Ok(Some(order)) => order,
            Ok(None) => return Err(LedgerError::NotFound(format!("order {}", id))),
            Err(StoreError::Decode { table, detail }) => {
                let detail = format!("{}: {}", table, detail);
                self.quarantine(&key, &detail, TimeMs::now()).await?;
                return Err(LedgerError::DataCorruption { entity: key, detail });
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(detail) = order.integrity_violation() {
            self.quarantine(&key, &detail, TimeMs::now()).await?;
            return Err(LedgerError::DataCorruption { entity: key, detail });
        }
        Ok(order)
    }

    /// Settlement split used for crediting: terms in force, else the
    /// configured fallback, else the platform default.
    fn settlement_entry(&self, order: &Order, terms: Option<&CommercialTerms>) -> LedgerEntry {
        build_ledger_entry_with_fallback(order, terms, self.fallback_terms.as_ref())
            .unwrap_or_else(|_| platform_default_entry(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BuyerPaymentStatus, LineItem};
    use crate::store::MemoryStore;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn order(id: &str, total: &str, ts: i64) -> Order {
        Order::new(
            OrderId::new(id),
            EntityId::new("grocer-1"),
            EntityId::new("farm-1"),
            vec![LineItem::new("apples", d("1"), d(total))],
            d(total),
            TimeMs::new(ts),
        )
    }

    fn evidence(id: &str, track: Track, r: &str) -> EvidenceEvent {
        EvidenceEvent {
            order_id: OrderId::new(id),
            track,
            evidence_ref: r.to_string(),
            timestamp: TimeMs::new(5_000),
        }
    }

    fn service() -> (Arc<MemoryStore>, LedgerService) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), LedgerService::new(store))
    }

    #[tokio::test]
    async fn test_ingest_rejects_total_mismatch() {
        let (_, svc) = service();
        let mut bad = order("o1", "10", 0);
        bad.total_amount = d("11");
        let err = svc.ingest_order(bad).await.unwrap_err();
        assert!(matches!(err, LedgerError::DataCorruption { .. }));
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent_for_identical_order() {
        let (_, svc) = service();
        svc.ingest_order(order("o1", "10", 0)).await.unwrap();
        svc.ingest_order(order("o1", "10", 0)).await.unwrap();
        let err = svc.ingest_order(order("o1", "12", 0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_ledger_entry_uses_terms_at_order_time() {
        let (_, svc) = service();
        let buyer = EntityId::new("grocer-1");
        svc.set_terms(&buyer, CommercialTerms::new(d("15"), 30, 7), TimeMs::new(0))
            .await
            .unwrap();
        svc.ingest_order(order("o1", "115", 1_000)).await.unwrap();
        svc.set_terms(&buyer, CommercialTerms::new(d("50"), 30, 7), TimeMs::new(2_000))
            .await
            .unwrap();

        let view = svc
            .get_ledger_entry(&OrderId::new("o1"), TimeMs::new(3_000))
            .await
            .unwrap();
        assert_eq!(view.entry.wholesale_cost, d("100"));
        assert_eq!(view.entry.platform_margin, d("15"));
        assert_eq!(view.buyer_status, BuyerStatus::Unpaid);
    }

    #[tokio::test]
    async fn test_ledger_entry_without_terms() {
        let (store, svc) = service();
        svc.ingest_order(order("o1", "10", 0)).await.unwrap();
        let err = svc
            .get_ledger_entry(&OrderId::new("o1"), TimeMs::new(0))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTerms { .. }));

        let svc = LedgerService::new(store).with_fallback_markup(d("25"));
        let view = svc
            .get_ledger_entry(&OrderId::new("o1"), TimeMs::new(0))
            .await
            .unwrap();
        assert!(view.entry.terms_defaulted);
        assert_eq!(view.entry.wholesale_cost, d("8"));
    }

    #[tokio::test]
    async fn test_set_terms_rejects_negative_markup() {
        let (_, svc) = service();
        let err = svc
            .set_terms(
                &EntityId::new("grocer-1"),
                CommercialTerms::new(d("-1"), 0, 0),
                TimeMs::new(0),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTerms { .. }));
    }

    #[tokio::test]
    async fn test_set_terms_cannot_backdate_over_recorded_orders() {
        let (_, svc) = service();
        let buyer = EntityId::new("grocer-1");
        svc.set_terms(&buyer, CommercialTerms::new(d("15"), 30, 7), TimeMs::new(0))
            .await
            .unwrap();
        svc.ingest_order(order("o1", "115", 1_000)).await.unwrap();
        svc.record_evidence(evidence("o1", Track::Buyer, "bank-1"))
            .await
            .unwrap();

        for effective_from in [500, 1_000] {
            let err = svc
                .set_terms(
                    &buyer,
                    CommercialTerms::new(d("50"), 30, 7),
                    TimeMs::new(effective_from),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidTerms { .. }), "{err}");
        }

        let view = svc
            .get_ledger_entry(&OrderId::new("o1"), TimeMs::new(6_000))
            .await
            .unwrap();
        assert_eq!(view.entry.wholesale_cost, d("100"));
        assert_eq!(view.entry.markup_percent, d("15"));
        assert_eq!(svc.terms_history(&buyer).await.unwrap().len(), 1);

        svc.set_terms(&buyer, CommercialTerms::new(d("50"), 30, 7), TimeMs::new(1_001))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_terms_cannot_precede_latest_version() {
        let (_, svc) = service();
        let buyer = EntityId::new("grocer-1");
        svc.set_terms(&buyer, CommercialTerms::new(d("15"), 30, 7), TimeMs::new(5_000))
            .await
            .unwrap();
        let err = svc
            .set_terms(&buyer, CommercialTerms::new(d("20"), 30, 7), TimeMs::new(4_000))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTerms { .. }));

        // Other buyers are unaffected.
        svc.set_terms(
            &EntityId::new("grocer-2"),
            CommercialTerms::new(d("20"), 30, 7),
            TimeMs::new(0),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_ingest_rejects_overflowing_line_items() {
        let (_, svc) = service();
        let huge = Order::new(
            OrderId::new("o-huge"),
            EntityId::new("grocer-1"),
            EntityId::new("farm-1"),
            vec![LineItem::new(
                "apples",
                d("79228162514264337593543950335"),
                d("2"),
            )],
            d("1"),
            TimeMs::new(0),
        );
        let err = svc.ingest_order(huge).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        let err = svc.load_order(&OrderId::new("o-huge")).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rollup_skips_quarantined_orders() {
        let (store, svc) = service();
        svc.set_terms(
            &EntityId::new("grocer-1"),
            CommercialTerms::new(d("25"), 30, 7),
            TimeMs::new(0),
        )
        .await
        .unwrap();
        svc.ingest_order(order("o1", "125", 1_000)).await.unwrap();
        svc.ingest_order(order("o2", "250", 1_000)).await.unwrap();
        store
            .quarantine("order:o2", "manual hold", TimeMs::new(1_500))
            .await
            .unwrap();

        let report = svc.rollup_report(TimeMs::new(2_000)).await.unwrap();
        assert_eq!(report.platform_profit, d("25"));
    }

    #[tokio::test]
    async fn test_buyer_paid_credits_seller_and_broadcasts() {
        let (_, svc) = service();
        let mut events = svc.subscribe();
        svc.set_terms(
            &EntityId::new("grocer-1"),
            CommercialTerms::new(d("15"), 30, 7),
            TimeMs::new(0),
        )
        .await
        .unwrap();
        svc.ingest_order(order("o1", "115", 1_000)).await.unwrap();

        svc.record_evidence(evidence("o1", Track::Buyer, " bank-ref-1 "))
            .await
            .unwrap();

        let statement = svc.credit_statement(&EntityId::new("farm-1")).await.unwrap();
        assert_eq!(statement.trade_revenue, d("100"));
        match events.recv().await.unwrap() {
            SettlementEvent::BuyerPaid { evidence_ref, .. } => assert_eq!(evidence_ref, "bank-ref-1"),
            other => panic!("unexpected event {:?}", other),
        }

        let err = svc
            .record_evidence(evidence("o1", Track::Buyer, "bank-ref-2"))
            .await
            .unwrap_err();
        match err {
            LedgerError::InvalidTransition { current, .. } => assert_eq!(current, "paid"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_blank_evidence_changes_nothing() {
        let (store, svc) = service();
        svc.ingest_order(order("o1", "10", 0)).await.unwrap();
        let err = svc
            .record_evidence(evidence("o1", Track::Supplier, "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::MissingEvidence { .. }));
        let stored = store.get_order(&OrderId::new("o1")).await.unwrap().unwrap();
        assert_eq!(stored.supplier_payout_status, SupplierPayoutStatus::Pending);
        assert_eq!(stored.buyer_payment_status, BuyerPaymentStatus::Unpaid);
    }

    #[tokio::test]
    async fn test_corrupt_stored_order_is_quarantined() {
        let (store, svc) = service();
        svc.ingest_order(order("o1", "10", 0)).await.unwrap();
        let mut tampered = order("o1", "10", 0);
        tampered.total_amount = d("99");
        store.overwrite_order(tampered).await;

        let err = svc
            .record_evidence(evidence("o1", Track::Buyer, "ref"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DataCorruption { .. }));

        let err = svc
            .record_evidence(evidence("o1", Track::Buyer, "ref"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Quarantined { .. }));

        assert!(svc.release_quarantine("order:o1").await.unwrap());
    }

    #[tokio::test]
    async fn test_rollup_skips_corrupt_orders() {
        let (store, svc) = service();
        svc.ingest_order(order("o1", "10", 0)).await.unwrap();
        svc.ingest_order(order("o2", "20", 0)).await.unwrap();
        let mut tampered = order("o2", "20", 0);
        tampered.total_amount = d("0");
        store.overwrite_order(tampered).await;

        let report = svc.rollup_report(TimeMs::new(0)).await.unwrap();
        let buyer = report.rollup_for(&EntityId::new("grocer-1"), RollupRole::Buyer);
        assert_eq!(buyer.order_count, 1);
        assert_eq!(buyer.total_transacted, d("10"));
        assert!(svc.quarantine_reason("order:o2").await.unwrap().is_some());
    }
}
