use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::api::AppState;
use crate::domain::{Decimal, EntityId, Receipt, TimeMs};
use crate::error::AppError;
use crate::service::CreditStatement;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub amount: Decimal,
}

pub async fn get_credits(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CreditStatement>, AppError> {
    let statement = state
        .service
        .credit_statement(&EntityId::new(user_id))
        .await?;
    Ok(Json(statement))
}

pub async fn post_withdraw(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<WithdrawRequest>,
) -> Result<Json<Receipt>, AppError> {
    let receipt = state
        .service
        .withdraw(&EntityId::new(user_id), body.amount, TimeMs::now())
        .await?;
    Ok(Json(receipt))
}
