//! HTTP routes

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::state::AppState;

pub mod admin;
pub mod billing;


pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Public subscription endpoints
        .route("/check-subscription", get(billing::check_subscription))
        .route("/subscription-status", get(billing::subscription_status))
        .route("/checkout", post(billing::create_checkout))
        .route("/verify-session", get(billing::verify_session))
        .route("/webhook", post(billing::webhook))
        // Admin secret protected
        .route("/update-seats", post(admin::update_seats))
        .route("/admin/reconcile", post(admin::reconcile))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
