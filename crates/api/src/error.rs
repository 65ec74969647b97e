//! API error types

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use yocreo_billing::BillingError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("Upstream provider error: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidSignature => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_)
            | ApiError::Database(_)
            | ApiError::Internal(_)
            | ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show the caller
    fn public_message(&self) -> String {
        match self {
            ApiError::Validation(msg) | ApiError::NotFound(msg) => msg.clone(),
            ApiError::InvalidSignature => "Invalid webhook signature".to_string(),
            ApiError::Unauthorized => "Unauthorized".to_string(),
            ApiError::Upstream(_) => "Billing provider request failed".to_string(),
            ApiError::Database(_) => "Database error".to_string(),
            ApiError::Internal(_) | ApiError::Config(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::StripeApi(msg) => ApiError::Upstream(msg),
            BillingError::WebhookSignatureInvalid => ApiError::InvalidSignature,
            BillingError::WebhookPayload(msg) => {
                tracing::warn!(error = %msg, "Signed webhook payload could not be decoded");
                ApiError::Validation("Invalid webhook payload".to_string())
            }
            BillingError::Config(msg) => ApiError::Config(msg),
            BillingError::InvalidInput(msg) => ApiError::Validation(msg),
            BillingError::Unauthorized(_) => ApiError::Unauthorized,
            BillingError::NotFound(msg) => ApiError::NotFound(msg),
            BillingError::SubscriptionItemNotFound(subscription_id) => {
                ApiError::Internal(format!("Subscription {} has no line item", subscription_id))
            }
            BillingError::Store(e) => ApiError::Database(e.to_string()),
            BillingError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(format!("Invalid query string: {}", rejection.body_text()))
    }
}
