use axum::extract::State;
use axum::Json;

use crate::api::AppState;
use crate::config::StoreBackend;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the router exists; the store was opened before it was built.
pub async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    let store = match state.config.store_backend {
        StoreBackend::Sqlite => "sqlite",
        StoreBackend::Memory => "memory",
    };
    Json(serde_json::json!({
        "status": "ready",
        "store": store,
        "sweepIntervalMs": state.config.sweep_interval_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
