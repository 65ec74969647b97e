// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries provider messages
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! YoCreo Billing Module
//!
//! Stripe integration for individual and team subscriptions.
//!
//! ## Features
//!
//! - **Checkout**: Subscription checkout sessions for the individual and team plans
//! - **Session Verification**: Post-checkout confirmation lookups
//! - **Access Checks**: Whether an email holds an active individual subscription
//! - **Webhooks**: Keep subscribers and organizations in sync with Stripe events
//! - **Seats**: Admin-authorized seat count changes for team organizations
//! - **Reconciliation**: Detect (and optionally repair) drift against Stripe

pub mod access;
pub mod admin_key;
pub mod checkout;
pub mod client;
pub mod error;
pub mod events;
pub mod gateway;
pub mod reconcile;
pub mod seats;
pub mod webhooks;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

#[cfg(test)]
mod edge_case_tests;

// Access
pub use access::{AccessCheck, AccessService, SubscriptionStatusReport};

// Admin
pub use admin_key::AdminSecret;

// Checkout
pub use checkout::{CheckoutRequest, CheckoutResponse, CheckoutService, SessionVerification};

// Client
pub use client::{StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{BillingEvent, EventEnvelope, PlanSelection};

// Gateway
pub use gateway::{BillingGateway, SubscriptionSnapshot};

// Reconciliation
pub use reconcile::{
    DriftKind, DriftReport, DriftSeverity, DriftSubject, ReconciliationService,
    ReconciliationSummary,
};

// Seats
pub use seats::{SeatService, SeatUpdateRequest, SeatUpdateResult};

// Webhooks
pub use webhooks::{ReconciliationFailure, WebhookAction, WebhookHandler, WebhookOutcome};

use std::sync::Arc;

use yocreo_shared::RecordStore;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub access: AccessService,
    pub checkout: CheckoutService,
    pub reconciliation: ReconciliationService,
    pub seats: SeatService,
    pub webhooks: Arc<WebhookHandler>,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(store: Arc<dyn RecordStore>, admin: AdminSecret) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        let config = Arc::new(stripe.config().clone());
        Ok(Self::new(Arc::new(stripe), store, config, admin))
    }

    /// Create a new billing service with an explicit gateway and config
    pub fn new(
        gateway: Arc<dyn BillingGateway>,
        store: Arc<dyn RecordStore>,
        config: Arc<StripeConfig>,
        admin: AdminSecret,
    ) -> Self {
        let webhooks = Arc::new(WebhookHandler::new(
            store.clone(),
            config.webhook_secret.clone(),
        ));

        Self {
            access: AccessService::new(store.clone()),
            checkout: CheckoutService::new(gateway.clone(), config),
            reconciliation: ReconciliationService::new(
                gateway.clone(),
                store.clone(),
                webhooks.clone(),
            ),
            seats: SeatService::new(gateway, store, admin),
            webhooks,
        }
    }
}
