use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::str::FromStr;

use crate::api::{AppState, AsOfQuery};
use crate::domain::{
    Decimal, EntityId, IncentiveConfig, IncentiveGrant, Role, SpendSample, TimeMs,
};
use crate::error::AppError;
use crate::service::IncentiveSchedule;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub user_id: String,
    pub role: Role,
    pub signup_at_ms: Option<i64>,
    pub referred_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendRequest {
    pub user_id: String,
    pub amount: Decimal,
    pub at_ms: Option<i64>,
}

fn parse_role(raw: &str) -> Result<Role, AppError> {
    Role::from_str(raw).map_err(AppError::BadRequest)
}

pub async fn put_incentive_config(
    Path(role): Path<String>,
    State(state): State<AppState>,
    Json(config): Json<IncentiveConfig>,
) -> Result<Json<IncentiveConfig>, AppError> {
    let role = parse_role(&role)?;
    let config = state.service.set_incentive_config(role, config).await?;
    Ok(Json(config))
}

pub async fn get_incentive_config(
    Path(role): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<IncentiveConfig>, AppError> {
    let role = parse_role(&role)?;
    Ok(Json(state.service.incentive_config(role).await?))
}

pub async fn create_grant(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> Result<(StatusCode, Json<IncentiveGrant>), AppError> {
    let grant = state
        .service
        .register_signup(
            &EntityId::new(body.user_id),
            body.role,
            body.signup_at_ms.map(TimeMs::new).unwrap_or_else(TimeMs::now),
            body.referred_by.map(EntityId::new),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(grant)))
}

pub async fn post_spend(
    State(state): State<AppState>,
    Json(body): Json<SpendRequest>,
) -> Result<StatusCode, AppError> {
    state
        .service
        .record_spend(SpendSample {
            user_id: EntityId::new(body.user_id),
            at: body.at_ms.map(TimeMs::new).unwrap_or_else(TimeMs::now),
            amount: body.amount,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_schedule(
    Path(user_id): Path<String>,
    Query(params): Query<AsOfQuery>,
    State(state): State<AppState>,
) -> Result<Json<IncentiveSchedule>, AppError> {
    let schedule = state
        .service
        .incentive_schedule(&EntityId::new(user_id), params.instant())
        .await?;
    Ok(Json(schedule))
}
