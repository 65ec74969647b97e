//! Stripe Checkout sessions
//!
//! Starts subscription checkouts and resolves completed sessions for the
//! confirmation page. Neither path writes to the record store; local state
//! is created only by the webhook handler.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use yocreo_shared::PlanType;

use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{METADATA_COMPANY_NAME, METADATA_PLAN_TYPE};
use crate::gateway::{BillingGateway, CheckoutSessionRequest};

/// Plan selection posted by the pricing page
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub plan_type: Option<String>,
    pub company_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
}

/// Completed checkout as shown on the confirmation page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionVerification {
    pub email: Option<String>,
    pub status: String,
    pub customer_id: Option<String>,
    /// Where the purchaser continues after confirmation
    pub app_url: String,
}

/// Checkout service for creating Stripe checkout sessions
pub struct CheckoutService {
    gateway: Arc<dyn BillingGateway>,
    config: Arc<StripeConfig>,
}

impl CheckoutService {
    pub fn new(gateway: Arc<dyn BillingGateway>, config: Arc<StripeConfig>) -> Self {
        Self { gateway, config }
    }

    /// Build the session request for a plan selection.
    pub fn session_request(
        &self,
        request: &CheckoutRequest,
    ) -> BillingResult<CheckoutSessionRequest> {
        let plan_type = match request.plan_type.as_deref() {
            None => PlanType::default(),
            Some(value) if value.trim().is_empty() => PlanType::default(),
            Some(value) => PlanType::parse(value).ok_or_else(|| {
                BillingError::InvalidInput(format!("Unknown plan type: {}", value))
            })?,
        };

        let company_name = request
            .company_name
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();

        let mut metadata = HashMap::new();
        metadata.insert(METADATA_PLAN_TYPE.to_string(), plan_type.as_str().to_string());
        metadata.insert(METADATA_COMPANY_NAME.to_string(), company_name.to_string());

        Ok(CheckoutSessionRequest {
            price_id: self.config.price_id.clone(),
            quantity: 1,
            success_url: self.config.success_url(),
            cancel_url: self.config.cancel_url(),
            allow_promotion_codes: true,
            metadata,
        })
    }

    /// Create a subscription checkout session and return its hosted URL.
    pub async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> BillingResult<CheckoutResponse> {
        let params = self.session_request(request)?;
        let plan_type = params.metadata.get(METADATA_PLAN_TYPE).cloned();

        let session = self
            .gateway
            .create_checkout_session(&params)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    plan_type = ?plan_type,
                    "Failed to create checkout session"
                );
                e
            })?;

        let url = session.url.ok_or_else(|| {
            BillingError::StripeApi(format!("Checkout session {} has no URL", session.id))
        })?;

        tracing::info!(
            session_id = %session.id,
            plan_type = ?plan_type,
            "Checkout session created"
        );

        Ok(CheckoutResponse {
            session_id: session.id,
            url,
        })
    }

    /// Resolve a checkout session for the confirmation page.
    pub async fn verify_session(&self, session_id: &str) -> BillingResult<SessionVerification> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(BillingError::InvalidInput("session_id is required".to_string()));
        }

        let session = self.gateway.retrieve_checkout_session(session_id).await?;

        Ok(SessionVerification {
            email: session.customer_email,
            status: session.payment_status,
            customer_id: session.customer_id,
            app_url: self.config.app_url.clone(),
        })
    }
}
