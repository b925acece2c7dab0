use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;

use crate::api::{AppState, AsOfQuery};
use crate::error::AppError;
use crate::service::SweepReport;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantineResponse {
    pub entity_key: String,
    pub quarantined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub async fn run_sweep(
    Query(params): Query<AsOfQuery>,
    State(state): State<AppState>,
) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(state.service.sweep(params.instant()).await?))
}

pub async fn get_quarantine(
    Path(entity_key): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<QuarantineResponse>, AppError> {
    let reason = state.service.quarantine_reason(&entity_key).await?;
    Ok(Json(QuarantineResponse {
        entity_key,
        quarantined: reason.is_some(),
        reason,
    }))
}

pub async fn release_quarantine(
    Path(entity_key): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<QuarantineResponse>, AppError> {
    if !state.service.release_quarantine(&entity_key).await? {
        return Err(AppError::NotFound(format!(
            "{} is not quarantined",
            entity_key
        )));
    }
    Ok(Json(QuarantineResponse {
        entity_key,
        quarantined: false,
        reason: None,
    }))
}
