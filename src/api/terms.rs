use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::domain::{CommercialTerms, Decimal, EntityId, TermsVersion, TimeMs};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutTermsRequest {
    pub markup_percent: Decimal,
    pub buyer_payment_term_days: i64,
    pub supplier_payment_term_days: i64,
    /// Defaults to now.
    pub effective_from_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermsHistoryResponse {
    pub buyer_id: String,
    pub versions: Vec<TermsVersion>,
}

fn term_days(field: &str, days: i64) -> Result<u32, AppError> {
    u32::try_from(days).map_err(|_| AppError::BadRequest(format!("{} must be >= 0", field)))
}

pub async fn put_terms(
    Path(buyer_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<PutTermsRequest>,
) -> Result<Json<TermsVersion>, AppError> {
    let terms = CommercialTerms::new(
        body.markup_percent,
        term_days("buyerPaymentTermDays", body.buyer_payment_term_days)?,
        term_days("supplierPaymentTermDays", body.supplier_payment_term_days)?,
    );
    let effective_from = body
        .effective_from_ms
        .map(TimeMs::new)
        .unwrap_or_else(TimeMs::now);

    let version = state
        .service
        .set_terms(&EntityId::new(buyer_id), terms, effective_from)
        .await?;
    Ok(Json(version))
}

pub async fn get_terms_history(
    Path(buyer_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<TermsHistoryResponse>, AppError> {
    let versions = state
        .service
        .terms_history(&EntityId::new(buyer_id.clone()))
        .await?;
    Ok(Json(TermsHistoryResponse { buyer_id, versions }))
}
