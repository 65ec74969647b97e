//! Admin routes
//!
//! Protected by the shared admin secret carried in the request body.

use axum::{body::Bytes, extract::rejection::JsonRejection, extract::State, Json};
use serde::Deserialize;
use yocreo_billing::{ReconciliationSummary, SeatUpdateRequest, SeatUpdateResult};

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub api_key: Option<String>,
    #[serde(default)]
    pub repair: bool,
}

/// POST /update-seats
///
/// Takes the raw body so a malformed request without the admin key is
/// answered with 401 rather than a parse error.
pub async fn update_seats(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<SeatUpdateResult>> {
    let request = SeatUpdateRequest::from_body(&body);

    let result = state.billing.seats.update_seats(&request).await?;
    Ok(Json(result))
}

/// POST /admin/reconcile
pub async fn reconcile(
    State(state): State<AppState>,
    payload: Result<Json<ReconcileRequest>, JsonRejection>,
) -> ApiResult<Json<ReconciliationSummary>> {
    let Json(request) = payload?;
    state.admin.authorize(request.api_key.as_deref())?;

    tracing::info!(repair = request.repair, "Manual billing reconciliation requested");

    let summary = state.billing.reconciliation.run(request.repair).await?;
    Ok(Json(summary))
}
