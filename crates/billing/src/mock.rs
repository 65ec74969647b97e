//! Scripted billing gateway for tests

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use yocreo_shared::SubscriptionStatus;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    BillingGateway, CheckoutSessionDetails, CheckoutSessionRequest, CreatedCheckoutSession,
    SubscriptionItemSnapshot, SubscriptionSnapshot,
};

#[derive(Default)]
struct Script {
    subscriptions: HashMap<String, SubscriptionSnapshot>,
    sessions: HashMap<String, CheckoutSessionDetails>,
    checkout_requests: Vec<CheckoutSessionRequest>,
    fail_checkout: bool,
    fail_updates: bool,
}

/// In-memory provider: subscriptions and sessions are registered up front,
/// checkout requests are recorded.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<Script>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription with a single line item.
    pub async fn add_subscription(
        &self,
        subscription_id: &str,
        item_id: &str,
        status: SubscriptionStatus,
        quantity: u64,
    ) {
        let snapshot = SubscriptionSnapshot {
            id: subscription_id.to_string(),
            status,
            items: vec![SubscriptionItemSnapshot {
                id: item_id.to_string(),
                quantity: Some(quantity),
            }],
        };
        self.script
            .lock()
            .await
            .subscriptions
            .insert(subscription_id.to_string(), snapshot);
    }

    pub async fn put_subscription(&self, snapshot: SubscriptionSnapshot) {
        self.script
            .lock()
            .await
            .subscriptions
            .insert(snapshot.id.clone(), snapshot);
    }

    pub async fn add_session(&self, details: CheckoutSessionDetails) {
        self.script
            .lock()
            .await
            .sessions
            .insert(details.id.clone(), details);
    }

    pub async fn fail_checkout(&self, fail: bool) {
        self.script.lock().await.fail_checkout = fail;
    }

    pub async fn fail_updates(&self, fail: bool) {
        self.script.lock().await.fail_updates = fail;
    }

    pub async fn checkout_requests(&self) -> Vec<CheckoutSessionRequest> {
        self.script.lock().await.checkout_requests.clone()
    }

    pub async fn subscription(&self, subscription_id: &str) -> Option<SubscriptionSnapshot> {
        self.script
            .lock()
            .await
            .subscriptions
            .get(subscription_id)
            .cloned()
    }
}

#[async_trait]
impl BillingGateway for ScriptedGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedCheckoutSession> {
        let mut script = self.script.lock().await;
        if script.fail_checkout {
            return Err(BillingError::StripeApi("No such price".to_string()));
        }
        script.checkout_requests.push(request.clone());
        let id = format!("cs_test_{}", script.checkout_requests.len());
        Ok(CreatedCheckoutSession {
            url: Some(format!("https://checkout.stripe.test/c/pay/{}", id)),
            id,
        })
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> BillingResult<CheckoutSessionDetails> {
        self.script
            .lock()
            .await
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                BillingError::NotFound(format!("No such checkout.session: {}", session_id))
            })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionSnapshot> {
        self.subscription(subscription_id)
            .await
            .ok_or_else(|| {
                BillingError::NotFound(format!("No such subscription: {}", subscription_id))
            })
    }

    async fn update_item_quantity(
        &self,
        subscription_id: &str,
        item_id: &str,
        quantity: u64,
    ) -> BillingResult<SubscriptionSnapshot> {
        let mut script = self.script.lock().await;
        if script.fail_updates {
            return Err(BillingError::StripeApi("Stripe is unavailable".to_string()));
        }
        let subscription = script
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| {
                BillingError::NotFound(format!("No such subscription: {}", subscription_id))
            })?;
        let item = subscription
            .items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or_else(|| {
                BillingError::NotFound(format!("No such subscription item: {}", item_id))
            })?;
        item.quantity = Some(quantity);
        Ok(subscription.clone())
    }
}
