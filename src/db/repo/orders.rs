//! Order and settlement status operations.

use super::{decimal_col, Repository};
use crate::domain::{
    BuyerPaymentStatus, EntityId, LineItem, Order, OrderId, Receipted, SupplierPayoutStatus,
    TimeMs,
};
use crate::store::StoreError;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;

const ORDER_COLUMNS: &str = r#"
    order_id, buyer_id, seller_id, total_amount, order_time_ms,
    buyer_payment_status, buyer_evidence_ref, buyer_paid_at_ms,
    supplier_payout_status, supplier_evidence_ref, supplier_remitted_at_ms
"#;

impl Repository {
    /// Insert an order and its line items in one transaction.
    ///
    /// Returns false without writing anything if the order id already exists.
    pub(super) async fn insert_order_row(&self, order: &Order) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, buyer_id, seller_id, total_amount, order_time_ms,
                buyer_payment_status, buyer_evidence_ref, buyer_paid_at_ms,
                supplier_payout_status, supplier_evidence_ref, supplier_remitted_at_ms
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(order_id) DO NOTHING
            "#,
        )
        .bind(order.id.as_str())
        .bind(order.buyer_id.as_str())
        .bind(order.seller_id.as_str())
        .bind(order.total_amount.to_canonical_string())
        .bind(order.order_timestamp.as_ms())
        .bind(order.buyer_payment_status.as_str())
        .bind(order.buyer_receipt.as_ref().map(|r| r.evidence_ref.as_str()))
        .bind(order.buyer_receipt.as_ref().map(|r| r.at.as_ms()))
        .bind(order.supplier_payout_status.as_str())
        .bind(order.supplier_receipt.as_ref().map(|r| r.evidence_ref.as_str()))
        .bind(order.supplier_receipt.as_ref().map(|r| r.at.as_ms()))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for (line_no, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, line_no, product_id, quantity, unit_price)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(order.id.as_str())
            .bind(line_no as i64)
            .bind(item.product_id.as_str())
            .bind(item.quantity.to_canonical_string())
            .bind(item.unit_price.to_canonical_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    pub(super) async fn fetch_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE order_id = ?",
            ORDER_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let item_rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, unit_price
            FROM order_items
            WHERE order_id = ?
            ORDER BY line_no ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let items = item_rows
            .iter()
            .map(decode_item)
            .collect::<Result<Vec<_>, _>>()?;
        decode_order(&row, items).map(Some)
    }

    pub(super) async fn query_latest_order_time(
        &self,
        buyer: &EntityId,
    ) -> Result<Option<TimeMs>, StoreError> {
        let row = sqlx::query("SELECT MAX(order_time_ms) AS latest FROM orders WHERE buyer_id = ?")
            .bind(buyer.as_str())
            .fetch_one(&self.pool)
            .await?;
        let latest: Option<i64> = row.try_get("latest")?;
        Ok(latest.map(TimeMs::new))
    }

    /// Compare-and-set Unpaid -> Paid in a single conditional UPDATE.
    pub(super) async fn mark_buyer_paid(
        &self,
        id: &OrderId,
        receipt: &Receipted,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET buyer_payment_status = ?, buyer_evidence_ref = ?, buyer_paid_at_ms = ?
            WHERE order_id = ? AND buyer_payment_status = ?
            "#,
        )
        .bind(BuyerPaymentStatus::Paid.as_str())
        .bind(receipt.evidence_ref.as_str())
        .bind(receipt.at.as_ms())
        .bind(id.as_str())
        .bind(BuyerPaymentStatus::Unpaid.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Compare-and-set Pending -> Remitted in a single conditional UPDATE.
    pub(super) async fn mark_supplier_remitted(
        &self,
        id: &OrderId,
        receipt: &Receipted,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET supplier_payout_status = ?, supplier_evidence_ref = ?, supplier_remitted_at_ms = ?
            WHERE order_id = ? AND supplier_payout_status = ?
            "#,
        )
        .bind(SupplierPayoutStatus::Remitted.as_str())
        .bind(receipt.evidence_ref.as_str())
        .bind(receipt.at.as_ms())
        .bind(id.as_str())
        .bind(SupplierPayoutStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Load every order with its items, on a connection the caller controls.
pub(super) async fn load_all_orders(
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM orders ORDER BY order_time_ms ASC, order_id ASC",
        ORDER_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await?;

    let item_rows = sqlx::query(
        r#"
        SELECT order_id, product_id, quantity, unit_price
        FROM order_items
        ORDER BY order_id ASC, line_no ASC
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut items_by_order: HashMap<String, Vec<LineItem>> = HashMap::new();
    for row in &item_rows {
        let order_id: String = row.try_get("order_id")?;
        items_by_order
            .entry(order_id)
            .or_default()
            .push(decode_item(row)?);
    }

    rows.iter()
        .map(|row| {
            let order_id: String = row.try_get("order_id")?;
            let items = items_by_order.remove(&order_id).unwrap_or_default();
            decode_order(row, items)
        })
        .collect()
}

/// Order times placed by `buyer`, for incentive activation.
pub(super) async fn load_buyer_order_times(
    conn: &mut SqliteConnection,
    buyer: &EntityId,
) -> Result<Vec<TimeMs>, StoreError> {
    let rows = sqlx::query(
        "SELECT order_time_ms FROM orders WHERE buyer_id = ? ORDER BY order_time_ms ASC",
    )
    .bind(buyer.as_str())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<TimeMs, StoreError> { Ok(TimeMs::new(row.try_get("order_time_ms")?)) })
        .collect()
}

fn decode_item(row: &SqliteRow) -> Result<LineItem, StoreError> {
    let product_id: String = row.try_get("product_id")?;
    Ok(LineItem::new(
        product_id,
        decimal_col(row, "order_items", "quantity")?,
        decimal_col(row, "order_items", "unit_price")?,
    ))
}

/// Decode an order row. Status/receipt disagreement is left for the
/// integrity check so the caller can quarantine the order.
fn decode_order(row: &SqliteRow, items: Vec<LineItem>) -> Result<Order, StoreError> {
    let buyer_status_raw: String = row.try_get("buyer_payment_status")?;
    let buyer_payment_status = BuyerPaymentStatus::parse(&buyer_status_raw).ok_or_else(|| {
        StoreError::decode(
            "orders",
            format!("buyer_payment_status={:?}", buyer_status_raw),
        )
    })?;
    let supplier_status_raw: String = row.try_get("supplier_payout_status")?;
    let supplier_payout_status =
        SupplierPayoutStatus::parse(&supplier_status_raw).ok_or_else(|| {
            StoreError::decode(
                "orders",
                format!("supplier_payout_status={:?}", supplier_status_raw),
            )
        })?;

    let buyer_receipt = receipt(
        row.try_get("buyer_evidence_ref")?,
        row.try_get("buyer_paid_at_ms")?,
    );
    let supplier_receipt = receipt(
        row.try_get("supplier_evidence_ref")?,
        row.try_get("supplier_remitted_at_ms")?,
    );

    Ok(Order {
        id: OrderId::new(row.try_get::<String, _>("order_id")?),
        buyer_id: EntityId::new(row.try_get::<String, _>("buyer_id")?),
        seller_id: EntityId::new(row.try_get::<String, _>("seller_id")?),
        items,
        total_amount: decimal_col(row, "orders", "total_amount")?,
        order_timestamp: TimeMs::new(row.try_get("order_time_ms")?),
        buyer_payment_status,
        buyer_receipt,
        supplier_payout_status,
        supplier_receipt,
    })
}

fn receipt(evidence_ref: Option<String>, at_ms: Option<i64>) -> Option<Receipted> {
    match (evidence_ref, at_ms) {
        (Some(evidence_ref), Some(at)) => Some(Receipted {
            evidence_ref,
            at: TimeMs::new(at),
        }),
        _ => None,
    }
}
