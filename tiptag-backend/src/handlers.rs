// HTTP handlers for the tiptag backend

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::analytics::{self, CreatorAggregates, TimeRange};
use crate::checkout;
use crate::database::Database;
use crate::error::LedgerError;
use crate::models::{
    CheckoutRequest, CheckoutResponse, Creator, CreatorProfile, FundingGoal, GoalActivation,
    GoalUpdate, NewCreator, NewGoal, Pagination, PaymentWebhook, SettlementOutcome, Tip,
    TipIdResponse, TipInput, TipsResponse, WebhookStatus, Withdrawal, WithdrawalReceipt,
    WithdrawalRequest,
};
use crate::AppState;

/// Header carrying the authenticated creator id, set by the session layer in front of us
pub const CALLER_HEADER: &str = "x-tiptag-user";
/// Shared secret presented by the payment provider on server-to-server calls
pub const WEBHOOK_SECRET_HEADER: &str = "x-tiptag-webhook-secret";

/// Authenticated creator making the request
#[derive(Debug, Clone)]
pub struct Caller(pub String);

impl Caller {
    fn must_be(&self, creator_id: &str) -> Result<(), LedgerError> {
        if self.0 == creator_id {
            Ok(())
        } else {
            warn!("Caller {} tried to act on creator {}", self.0, creator_id);
            Err(LedgerError::Unauthorized)
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = LedgerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Caller(v.to_string()))
            .ok_or(LedgerError::Unauthorized)
    }
}

/// Server-to-server calls must present the shared secret. Without one configured they are
/// refused, unless unsigned callbacks were explicitly allowed for local development.
fn check_webhook_secret(state: &AppState, headers: &HeaderMap) -> Result<(), LedgerError> {
    let Some(expected) = state.webhook_secret.as_deref() else {
        if state.allow_unsigned_callbacks {
            return Ok(());
        }
        warn!("Rejected server-to-server call: no webhook secret configured");
        return Err(LedgerError::Unauthorized);
    };
    let presented = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented == Some(expected) {
        Ok(())
    } else {
        warn!("Rejected server-to-server call with a missing or wrong secret");
        Err(LedgerError::Unauthorized)
    }
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_health = Database::ping(state.ledger.pool()).await;
    let provider_health = state.provider.is_healthy().await;

    let status = if db_health { "healthy" } else { "unhealthy" };

    Json(json!({
        "status": status,
        "database": if db_health { "up" } else { "down" },
        "payment_provider": if provider_health { "up" } else { "down" },
        "reconciler": "running"
    }))
}

// ============================================================================
// CREATORS
// ============================================================================

pub async fn register_creator(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewCreator>,
) -> Result<(StatusCode, Json<Creator>), LedgerError> {
    let creator = Database::insert_creator(state.ledger.pool(), &req).await?;
    Ok((StatusCode::CREATED, Json(creator)))
}

/// Public profile; the active goal is only shown when the creator made it public
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<Json<CreatorProfile>, LedgerError> {
    let creator = Database::creator_by_handle(state.ledger.pool(), &handle).await?;
    let active_goal = state
        .ledger
        .active_goal(&creator.id)
        .await?
        .filter(|goal| goal.is_public);

    Ok(Json(CreatorProfile {
        handle: creator.handle,
        payout_address: creator.payout_address,
        total_tip_count: creator.total_tip_count,
        active_goal,
    }))
}

pub async fn record_profile_view(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<StatusCode, LedgerError> {
    let creator = Database::creator_by_handle(state.ledger.pool(), &handle).await?;
    Database::record_profile_view(state.ledger.pool(), &creator.id, chrono::Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// TIPS
// ============================================================================

/// Charge a supporter and record the tip once the provider has answered
pub async fn checkout_tip(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, LedgerError> {
    info!(
        "Checkout: {} {} for '{}'",
        req.amount_minor_units, req.currency, req.recipient_handle
    );
    let response = checkout::checkout(&state.ledger, state.provider.as_ref(), &req).await?;
    Ok(Json(response))
}

/// Record a payment the provider has already confirmed
pub async fn record_tip(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<TipInput>,
) -> Result<Json<TipIdResponse>, LedgerError> {
    check_webhook_secret(&state, &headers)?;
    let recorded = state.ledger.record_tip(&req).await?;
    Ok(Json(TipIdResponse {
        tip_id: recorded.tip_id,
    }))
}

/// Provider confirmation for a pending tip
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PaymentWebhook>,
) -> Result<Json<Tip>, LedgerError> {
    check_webhook_secret(&state, &headers)?;
    info!(
        "Payment webhook: {} -> {:?}",
        req.provider_reference, req.status
    );

    match req.status {
        WebhookStatus::Succeeded => {
            state.ledger.complete_tip(&req.provider_reference).await?;
        }
        WebhookStatus::Failed => {
            let reason = req.reason.as_deref().unwrap_or("payment failed");
            state.ledger.fail_tip(&req.provider_reference, reason).await?;
        }
    }

    state
        .ledger
        .tip_by_reference(&req.provider_reference)
        .await?
        .map(Json)
        .ok_or(LedgerError::TipNotFound(req.provider_reference))
}

pub async fn list_tips(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(creator_id): Path<String>,
    Query(page): Query<Pagination>,
) -> Result<Json<TipsResponse>, LedgerError> {
    caller.must_be(&creator_id)?;
    Ok(Json(state.ledger.list_tips(&creator_id, &page).await?))
}

// ============================================================================
// WITHDRAWALS
// ============================================================================

pub async fn request_withdrawal(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<WithdrawalRequest>,
) -> Result<Json<WithdrawalReceipt>, LedgerError> {
    caller.must_be(&req.creator_id)?;
    Ok(Json(state.ledger.request_withdrawal(&req).await?))
}

/// Settlement result for an asynchronous payout
pub async fn confirm_withdrawal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(withdrawal_id): Path<String>,
    Json(outcome): Json<SettlementOutcome>,
) -> Result<Json<Withdrawal>, LedgerError> {
    check_webhook_secret(&state, &headers)?;
    Ok(Json(
        state
            .ledger
            .confirm_withdrawal(&withdrawal_id, &outcome)
            .await?,
    ))
}

pub async fn list_withdrawals(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(creator_id): Path<String>,
) -> Result<Json<Vec<Withdrawal>>, LedgerError> {
    caller.must_be(&creator_id)?;
    Ok(Json(state.ledger.list_withdrawals(&creator_id).await?))
}

// ============================================================================
// GOALS
// ============================================================================

pub async fn create_goal(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<NewGoal>,
) -> Result<(StatusCode, Json<FundingGoal>), LedgerError> {
    caller.must_be(&req.creator_id)?;
    let goal = state.ledger.create_goal(&req).await?;
    Ok((StatusCode::CREATED, Json(goal)))
}

pub async fn update_goal(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(goal_id): Path<String>,
    Json(req): Json<GoalUpdate>,
) -> Result<Json<FundingGoal>, LedgerError> {
    Ok(Json(state.ledger.update_goal(&caller.0, &goal_id, &req).await?))
}

pub async fn activate_goal(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<GoalActivation>,
) -> Result<Json<FundingGoal>, LedgerError> {
    caller.must_be(&req.creator_id)?;
    Ok(Json(
        state
            .ledger
            .activate_goal(&req.creator_id, &req.goal_id)
            .await?,
    ))
}

pub async fn deactivate_goal(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(goal_id): Path<String>,
) -> Result<Json<FundingGoal>, LedgerError> {
    Ok(Json(state.ledger.deactivate_goal(&caller.0, &goal_id).await?))
}

pub async fn list_goals(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(creator_id): Path<String>,
) -> Result<Json<Vec<FundingGoal>>, LedgerError> {
    caller.must_be(&creator_id)?;
    Ok(Json(state.ledger.list_goals(&creator_id).await?))
}

// ============================================================================
// ANALYTICS
// ============================================================================

pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(creator_id): Path<String>,
    Query(range): Query<TimeRange>,
) -> Result<Json<CreatorAggregates>, LedgerError> {
    caller.must_be(&creator_id)?;
    Ok(Json(
        analytics::creator_aggregates(state.ledger.pool(), &creator_id, &range).await?,
    ))
}
