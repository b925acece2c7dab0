use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::api::AppState;
use crate::domain::{OrderId, TimeMs, Track};
use crate::engine::{EvidenceEvent, SettlementEvent};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRequest {
    pub order_id: String,
    pub track: Track,
    pub evidence_ref: String,
    pub timestamp_ms: Option<i64>,
}

pub async fn post_evidence(
    State(state): State<AppState>,
    Json(body): Json<EvidenceRequest>,
) -> Result<Json<SettlementEvent>, AppError> {
    let event = EvidenceEvent {
        order_id: OrderId::new(body.order_id),
        track: body.track,
        evidence_ref: body.evidence_ref,
        timestamp: body.timestamp_ms.map(TimeMs::new).unwrap_or_else(TimeMs::now),
    };
    let emitted = state.service.record_evidence(event).await?;
    Ok(Json(emitted))
}
