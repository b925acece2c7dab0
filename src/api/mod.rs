pub mod credits;
pub mod health;
pub mod incentives;
pub mod orders;
pub mod rollups;
pub mod settlement;
pub mod sweep;
pub mod terms;

use crate::config::Config;
use crate::domain::TimeMs;
use crate::service::LedgerService;
use axum::{
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LedgerService>,
    pub config: Config,
}

impl AppState {
    pub fn new(service: Arc<LedgerService>, config: Config) -> Self {
        Self { service, config }
    }
}

/// Optional read instant shared by the query-time endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsOfQuery {
    pub as_of_ms: Option<i64>,
}

impl AsOfQuery {
    pub fn instant(&self) -> TimeMs {
        self.as_of_ms.map(TimeMs::new).unwrap_or_else(TimeMs::now)
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/orders", post(orders::create_order))
        .route("/v1/orders/:order_id/ledger", get(orders::get_order_ledger))
        .route(
            "/v1/terms/:buyer_id",
            put(terms::put_terms).get(terms::get_terms_history),
        )
        .route("/v1/evidence", post(settlement::post_evidence))
        .route(
            "/v1/incentives/config/:role",
            put(incentives::put_incentive_config).get(incentives::get_incentive_config),
        )
        .route("/v1/incentives/grants", post(incentives::create_grant))
        .route(
            "/v1/incentives/:user_id/schedule",
            get(incentives::get_schedule),
        )
        .route("/v1/spend", post(incentives::post_spend))
        .route("/v1/rollups", get(rollups::get_rollup_report))
        .route("/v1/rollups/:entity_id", get(rollups::get_entity_rollup))
        .route("/v1/credits/:user_id", get(credits::get_credits))
        .route("/v1/credits/:user_id/withdraw", post(credits::post_withdraw))
        .route("/v1/sweep", post(sweep::run_sweep))
        .route(
            "/v1/quarantine/:entity_key",
            get(sweep::get_quarantine).delete(sweep::release_quarantine),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
