//! Billing error types

use yocreo_shared::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Malformed webhook payload: {0}")]
    WebhookPayload(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Subscription {0} has no line item")]
    SubscriptionItemNotFound(String),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        match &err {
            // Provider text names internal ids; callers only see a fixed message
            stripe::StripeError::Stripe(request) if request.http_status == 404 => {
                tracing::debug!(error = %err, "Billing provider returned 404");
                BillingError::NotFound("Billing record not found".to_string())
            }
            _ => BillingError::StripeApi(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::WebhookPayload(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
