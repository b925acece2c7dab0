use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::{Decimal, EntityId, OrderId, Track};
use crate::store::StoreError;

/// Failures of ledger operations.
///
/// Everything except `DataCorruption` and `Store` is recoverable at the call
/// site and carries enough detail for an operator to act on.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid commercial terms for buyer {buyer}: {reason}")]
    InvalidTerms { buyer: EntityId, reason: String },

    #[error("order {order_id}: {track} transition requires a non-empty evidence reference")]
    MissingEvidence { order_id: OrderId, track: Track },

    #[error("order {order_id}: {track} track is already {current} and cannot transition again")]
    InvalidTransition {
        order_id: OrderId,
        track: Track,
        current: String,
    },

    #[error(
        "withdrawal of {requested} for {user_id} exceeds withdrawable trade revenue {available} \
         (restricted incentive credit {restricted} is not withdrawable)"
    )]
    InsufficientWithdrawableFunds {
        user_id: EntityId,
        requested: Decimal,
        available: Decimal,
        restricted: Decimal,
    },

    #[error("credit {source_key} was already applied for {user_id}")]
    DuplicateCredit { user_id: EntityId, source_key: String },

    #[error("data corruption detected on {entity}: {detail}")]
    DataCorruption { entity: String, detail: String },

    #[error("{entity} is quarantined pending manual reconciliation: {reason}")]
    Quarantined { entity: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidTerms { .. } => "invalid_terms",
            LedgerError::MissingEvidence { .. } => "missing_evidence",
            LedgerError::InvalidTransition { .. } => "invalid_transition",
            LedgerError::InsufficientWithdrawableFunds { .. } => "insufficient_withdrawable_funds",
            LedgerError::DuplicateCredit { .. } => "duplicate_credit",
            LedgerError::DataCorruption { .. } => "data_corruption",
            LedgerError::Quarantined { .. } => "quarantined",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::InvalidInput(_) => "invalid_input",
            LedgerError::Store(_) => "store_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            LedgerError::InvalidTerms { .. }
            | LedgerError::MissingEvidence { .. }
            | LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LedgerError::InvalidTransition { .. } | LedgerError::DuplicateCredit { .. } => {
                StatusCode::CONFLICT
            }
            LedgerError::InsufficientWithdrawableFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::Quarantined { .. } => StatusCode::LOCKED,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::DataCorruption { .. } | LedgerError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Ledger(err) => (err.status(), err.code(), err.to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_message_names_both_balances() {
        let err = LedgerError::InsufficientWithdrawableFunds {
            user_id: EntityId::new("farm-1"),
            requested: Decimal::from_i64(500),
            available: Decimal::from_i64(100),
            restricted: Decimal::from_i64(750),
        };
        let msg = err.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("trade revenue 100"));
        assert!(msg.contains("incentive credit 750"));
        assert_eq!(err.code(), "insufficient_withdrawable_funds");
    }

    #[test]
    fn test_status_codes() {
        let transition = LedgerError::InvalidTransition {
            order_id: OrderId::new("o1"),
            track: Track::Buyer,
            current: "paid".to_string(),
        };
        assert_eq!(transition.status(), StatusCode::CONFLICT);

        let evidence = LedgerError::MissingEvidence {
            order_id: OrderId::new("o1"),
            track: Track::Supplier,
        };
        assert_eq!(evidence.status(), StatusCode::BAD_REQUEST);

        let quarantined = LedgerError::Quarantined {
            entity: "user:x".to_string(),
            reason: "ledger mismatch".to_string(),
        };
        assert_eq!(quarantined.status(), StatusCode::LOCKED);
    }

    #[test]
    fn test_app_error_response_status() {
        let resp = AppError::BadRequest("nope".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = AppError::from(LedgerError::NotFound("order o9".to_string())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
