// Ledger error taxonomy and its HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::models::Money;

// SQLite (extended) result codes for a contended lock: BUSY, LOCKED and their variants.
const SQLITE_CONTENTION_CODES: &[&str] = &["5", "6", "261", "262", "517", "773"];

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("recipient '{0}' not found")]
    RecipientNotFound(String),

    #[error("creator '{0}' not found")]
    CreatorNotFound(String),

    #[error("goal '{0}' not found")]
    GoalNotFound(String),

    #[error("tip with provider reference '{0}' not found")]
    TipNotFound(String),

    #[error("withdrawal '{0}' not found")]
    WithdrawalNotFound(String),

    #[error("amount must be a positive number of minor units, got {0}")]
    InvalidAmount(Money),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("caller is not allowed to act on this creator")]
    Unauthorized,

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Money, available: Money },

    #[error("handle '{0}' is already taken")]
    HandleTaken(String),

    #[error("provider reference '{0}' belongs to a different tip")]
    ReferenceConflict(String),

    #[error("tip '{reference}' is already {status}")]
    TipAlreadyFinal { reference: String, status: &'static str },

    #[error("withdrawal '{id}' is already {status}")]
    WithdrawalAlreadyFinal { id: String, status: &'static str },

    #[error("goal '{0}' is already completed")]
    GoalCompleted(String),

    #[error("concurrent update conflict, retry the operation")]
    ConcurrencyConflict,

    #[error("payment provider timed out")]
    ProviderTimeout,

    #[error("payment provider failure: {0}")]
    ProviderFailure(String),

    #[error("arithmetic overflow in ledger aggregate")]
    Overflow,

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict)
    }

    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::RecipientNotFound(_) => "recipient_not_found",
            LedgerError::CreatorNotFound(_) => "creator_not_found",
            LedgerError::GoalNotFound(_) => "goal_not_found",
            LedgerError::TipNotFound(_) => "tip_not_found",
            LedgerError::WithdrawalNotFound(_) => "withdrawal_not_found",
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::InvalidRequest(_) => "invalid_request",
            LedgerError::Unauthorized => "unauthorized",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::HandleTaken(_) => "handle_taken",
            LedgerError::ReferenceConflict(_) => "reference_conflict",
            LedgerError::TipAlreadyFinal { .. } => "tip_already_final",
            LedgerError::WithdrawalAlreadyFinal { .. } => "withdrawal_already_final",
            LedgerError::GoalCompleted(_) => "goal_completed",
            LedgerError::ConcurrencyConflict => "concurrency_conflict",
            LedgerError::ProviderTimeout => "provider_timeout",
            LedgerError::ProviderFailure(_) => "provider_failure",
            LedgerError::Overflow => "overflow",
            LedgerError::Database(_) => "database",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::RecipientNotFound(_)
            | LedgerError::CreatorNotFound(_)
            | LedgerError::GoalNotFound(_)
            | LedgerError::TipNotFound(_)
            | LedgerError::WithdrawalNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InvalidAmount(_) | LedgerError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            LedgerError::Unauthorized => StatusCode::FORBIDDEN,
            LedgerError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::HandleTaken(_)
            | LedgerError::ReferenceConflict(_)
            | LedgerError::TipAlreadyFinal { .. }
            | LedgerError::WithdrawalAlreadyFinal { .. }
            | LedgerError::GoalCompleted(_) => StatusCode::CONFLICT,
            LedgerError::ConcurrencyConflict => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::ProviderTimeout => StatusCode::GATEWAY_TIMEOUT,
            LedgerError::ProviderFailure(_) => StatusCode::BAD_GATEWAY,
            LedgerError::Overflow | LedgerError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => LedgerError::ConcurrencyConflict,
            sqlx::Error::Database(db_err)
                if db_err
                    .code()
                    .is_some_and(|code| SQLITE_CONTENTION_CODES.contains(&code.as_ref())) =>
            {
                LedgerError::ConcurrencyConflict
            }
            _ => LedgerError::Database(err),
        }
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            LedgerError::Database(e) => {
                error!("Database error: {}", e);
                "internal error".to_string()
            }
            LedgerError::Overflow => {
                error!("Ledger aggregate overflow");
                "internal error".to_string()
            }
            LedgerError::ProviderFailure(_) | LedgerError::ProviderTimeout => {
                "payment could not be completed".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(json!({
            "error": message,
            "code": self.code(),
        }));
        (status, body).into_response()
    }
}
