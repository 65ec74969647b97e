//! Subscription routes: checkout, confirmation, access checks and the
//! Stripe webhook

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use yocreo_billing::{AccessCheck, CheckoutRequest, SessionVerification, SubscriptionStatusReport};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

fn required(value: Option<String>, name: &str) -> ApiResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::Validation(format!("{} is required", name)))
}

/// GET /check-subscription?email=
pub async fn check_subscription(
    State(state): State<AppState>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> ApiResult<Json<AccessCheck>> {
    let Query(query) = query?;
    let email = required(query.email, "email")?;

    let check = state.billing.access.check_access(&email).await?;
    Ok(Json(check))
}

/// GET /subscription-status?email=
pub async fn subscription_status(
    State(state): State<AppState>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> ApiResult<Json<SubscriptionStatusReport>> {
    let Query(query) = query?;
    let email = required(query.email, "email")?;

    let report = state.billing.access.subscription_status(&email).await?;
    Ok(Json(report))
}

/// POST /checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = payload?;

    let session = state.billing.checkout.create_checkout(&request).await?;
    Ok(Json(json!({ "url": session.url })))
}

/// GET /verify-session?session_id=
pub async fn verify_session(
    State(state): State<AppState>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> ApiResult<Json<SessionVerification>> {
    let Query(query) = query?;
    let session_id = required(query.session_id, "session_id")?;

    let verification = state.billing.checkout.verify_session(&session_id).await?;
    Ok(Json(verification))
}

/// POST /webhook
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::InvalidSignature
        })?;

    let outcome = state
        .billing
        .webhooks
        .process(&body, signature)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Stripe webhook rejected");
            ApiError::from(e)
        })?;

    tracing::info!(
        event_id = %outcome.event_id,
        event_type = %outcome.event_type,
        action = ?outcome.action,
        failures = outcome.failures.len(),
        "Stripe webhook processed"
    );

    Ok(Json(json!({ "received": true })))
}
