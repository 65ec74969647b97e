//! Billing provider gateway
//!
//! The handful of provider calls the service needs, behind a trait so the
//! reconciliation logic can run against a scripted provider in tests.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionMode, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionPaymentMethodTypes, Subscription,
    SubscriptionId, UpdateSubscription, UpdateSubscriptionItems,
};
use yocreo_shared::SubscriptionStatus;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Parameters of a subscription-mode checkout session
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionRequest {
    pub price_id: String,
    pub quantity: u64,
    pub success_url: String,
    pub cancel_url: String,
    pub allow_promotion_codes: bool,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedCheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// Completed checkout session as seen by the confirmation page
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionDetails {
    pub id: String,
    pub customer_email: Option<String>,
    pub payment_status: String,
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionItemSnapshot {
    pub id: String,
    pub quantity: Option<u64>,
}

/// Live state of a subscription at the provider
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSnapshot {
    pub id: String,
    pub status: SubscriptionStatus,
    pub items: Vec<SubscriptionItemSnapshot>,
}

impl SubscriptionSnapshot {
    /// The single line item seats are billed on.
    pub fn primary_item(&self) -> Option<&SubscriptionItemSnapshot> {
        self.items.first()
    }

    pub fn quantity(&self) -> Option<u64> {
        self.primary_item().and_then(|item| item.quantity)
    }
}

#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedCheckoutSession>;

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> BillingResult<CheckoutSessionDetails>;

    async fn retrieve_subscription(&self, subscription_id: &str)
        -> BillingResult<SubscriptionSnapshot>;

    /// Set the quantity of one subscription item.
    async fn update_item_quantity(
        &self,
        subscription_id: &str,
        item_id: &str,
        quantity: u64,
    ) -> BillingResult<SubscriptionSnapshot>;
}

fn snapshot(subscription: &Subscription) -> SubscriptionSnapshot {
    SubscriptionSnapshot {
        id: subscription.id.to_string(),
        status: SubscriptionStatus::from(subscription.status.as_str()),
        items: subscription
            .items
            .data
            .iter()
            .map(|item| SubscriptionItemSnapshot {
                id: item.id.to_string(),
                quantity: item.quantity,
            })
            .collect(),
    }
}

fn parse_subscription_id(subscription_id: &str) -> BillingResult<SubscriptionId> {
    SubscriptionId::from_str(subscription_id).map_err(|e| {
        BillingError::InvalidInput(format!("Invalid subscription ID {}: {}", subscription_id, e))
    })
}

#[async_trait]
impl BillingGateway for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedCheckoutSession> {
        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Subscription),
            payment_method_types: Some(vec![CreateCheckoutSessionPaymentMethodTypes::Card]),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(request.price_id.clone()),
                quantity: Some(request.quantity),
                ..Default::default()
            }]),
            success_url: Some(&request.success_url),
            cancel_url: Some(&request.cancel_url),
            allow_promotion_codes: Some(request.allow_promotion_codes),
            metadata: Some(request.metadata.clone()),
            ..Default::default()
        };

        let session = CheckoutSession::create(self.inner(), params).await?;

        Ok(CreatedCheckoutSession {
            id: session.id.to_string(),
            url: session.url,
        })
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> BillingResult<CheckoutSessionDetails> {
        let id = CheckoutSessionId::from_str(session_id).map_err(|e| {
            BillingError::InvalidInput(format!("Invalid session ID {}: {}", session_id, e))
        })?;

        let session = CheckoutSession::retrieve(self.inner(), &id, &[]).await?;

        let customer_id = match &session.customer {
            Some(stripe::Expandable::Id(id)) => Some(id.to_string()),
            Some(stripe::Expandable::Object(c)) => Some(c.id.to_string()),
            None => None,
        };

        Ok(CheckoutSessionDetails {
            id: session.id.to_string(),
            customer_email: session
                .customer_details
                .as_ref()
                .and_then(|details| details.email.clone()),
            payment_status: session.payment_status.as_str().to_string(),
            customer_id,
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionSnapshot> {
        let id = parse_subscription_id(subscription_id)?;
        let subscription = Subscription::retrieve(self.inner(), &id, &[]).await?;
        Ok(snapshot(&subscription))
    }

    async fn update_item_quantity(
        &self,
        subscription_id: &str,
        item_id: &str,
        quantity: u64,
    ) -> BillingResult<SubscriptionSnapshot> {
        let id = parse_subscription_id(subscription_id)?;
        let params = UpdateSubscription {
            items: Some(vec![UpdateSubscriptionItems {
                id: Some(item_id.to_string()),
                quantity: Some(quantity),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let subscription = Subscription::update(self.inner(), &id, params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            item_id = %item_id,
            quantity = quantity,
            "Updated subscription item quantity"
        );

        Ok(snapshot(&subscription))
    }
}
