// tiptag backend: tip ledger, funding goals and withdrawals behind a JSON API
//
// ## Module Structure
//
// - `ledger`: tip write path and the transactional discipline everything shares
// - `goals`: funding goal settings, activation and accrual
// - `withdrawals`: balance-checked withdrawals and their settlement
// - `analytics`: dashboard aggregates derived from the ledger
// - `checkout`, `payment`, `reconciler`: the payment provider side of a tip
// - `notify`: best-effort notifications after a tip lands
// - `handlers`: HTTP endpoints

pub mod analytics;
pub mod checkout;
pub mod config;
pub mod database;
pub mod error;
pub mod goals;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod payment;
pub mod reconciler;
pub mod validate;
pub mod withdrawals;

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

use ledger::Ledger;
use payment::PaymentProvider;

/// Application state shared across handlers
pub struct AppState {
    pub ledger: Ledger,
    pub provider: Arc<dyn PaymentProvider>,
    pub webhook_secret: Option<String>,
    /// Accept provider callbacks without a secret when none is configured (development only)
    pub allow_unsigned_callbacks: bool,
}

/// Build the API router
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Creators and public profiles
        .route("/api/creators", post(handlers::register_creator))
        .route("/api/profiles/:handle", get(handlers::get_profile))
        .route("/api/profiles/:handle/views", post(handlers::record_profile_view))
        // Tips
        .route("/api/tips", post(handlers::checkout_tip))
        .route("/api/tips/record", post(handlers::record_tip))
        .route("/api/webhooks/payment", post(handlers::payment_webhook))
        .route("/api/creators/:id/tips", get(handlers::list_tips))
        // Withdrawals
        .route("/api/withdrawals", post(handlers::request_withdrawal))
        .route("/api/withdrawals/:id/confirm", post(handlers::confirm_withdrawal))
        .route("/api/creators/:id/withdrawals", get(handlers::list_withdrawals))
        // Goals
        .route("/api/goals", post(handlers::create_goal))
        .route("/api/goals/activate", post(handlers::activate_goal))
        .route("/api/goals/:id", patch(handlers::update_goal))
        .route("/api/goals/:id/deactivate", post(handlers::deactivate_goal))
        .route("/api/creators/:id/goals", get(handlers::list_goals))
        // Dashboard
        .route("/api/creators/:id/analytics", get(handlers::get_analytics))
        .with_state(state)
}
