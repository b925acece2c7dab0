use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::api::{AppState, AsOfQuery};
use crate::domain::{Decimal, EntityId, LineItem, Order, OrderId, TimeMs};
use crate::error::AppError;
use crate::service::OrderLedgerView;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub order_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub items: Vec<LineItem>,
    pub total_amount: Decimal,
    pub order_timestamp_ms: Option<i64>,
}

impl CreateOrderRequest {
    fn into_order(self) -> Order {
        Order::new(
            OrderId::new(self.order_id),
            EntityId::new(self.buyer_id),
            EntityId::new(self.seller_id),
            self.items,
            self.total_amount,
            self.order_timestamp_ms
                .map(TimeMs::new)
                .unwrap_or_else(TimeMs::now),
        )
    }
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(body): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = state.service.ingest_order(body.into_order()).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order_ledger(
    Path(order_id): Path<String>,
    Query(params): Query<AsOfQuery>,
    State(state): State<AppState>,
) -> Result<Json<OrderLedgerView>, AppError> {
    let view = state
        .service
        .get_ledger_entry(&OrderId::new(order_id), params.instant())
        .await?;
    Ok(Json(view))
}
