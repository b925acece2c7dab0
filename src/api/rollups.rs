use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::domain::{Decimal, EntityId, TimeMs};
use crate::engine::{EntityRollup, RollupReport, RollupRole};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRollupQuery {
    pub role: RollupRole,
    pub as_of_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRollupResponse {
    pub entity_id: String,
    pub role: RollupRole,
    pub order_count: u64,
    pub total_transacted: Decimal,
    pub outstanding: Decimal,
    pub overdue: Decimal,
}

impl EntityRollupResponse {
    fn new(entity_id: String, role: RollupRole, rollup: EntityRollup) -> Self {
        Self {
            entity_id,
            role,
            order_count: rollup.order_count,
            total_transacted: rollup.total_transacted,
            outstanding: rollup.outstanding,
            overdue: rollup.overdue,
        }
    }
}

pub async fn get_rollup_report(
    Query(params): Query<crate::api::AsOfQuery>,
    State(state): State<AppState>,
) -> Result<Json<RollupReport>, AppError> {
    let report = state.service.rollup_report(params.instant()).await?;
    Ok(Json(report))
}

pub async fn get_entity_rollup(
    Path(entity_id): Path<String>,
    Query(params): Query<EntityRollupQuery>,
    State(state): State<AppState>,
) -> Result<Json<EntityRollupResponse>, AppError> {
    let now = params.as_of_ms.map(TimeMs::new).unwrap_or_else(TimeMs::now);
    let rollup = state
        .service
        .entity_rollup(&EntityId::new(entity_id.clone()), params.role, now)
        .await?;
    Ok(Json(EntityRollupResponse::new(entity_id, params.role, rollup)))
}
