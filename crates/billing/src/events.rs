//! Billing provider events
//!
//! Inbound webhook payloads decoded into one variant per event type the
//! reconciler acts on. Any other type decodes to `Unhandled` so new
//! provider events never cause a rejection.

use std::collections::HashMap;

use serde::Deserialize;
use yocreo_shared::{normalize_email, PlanType, SubscriptionStatus};

use crate::error::BillingResult;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

/// Checkout metadata keys written by the checkout initiator
pub const METADATA_PLAN_TYPE: &str = "planType";
pub const METADATA_COMPANY_NAME: &str = "companyName";

/// Reference to another provider object: a bare id or an expanded object
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ObjectRef {
    Id(String),
    Object { id: String },
}

impl ObjectRef {
    pub fn id(&self) -> &str {
        match self {
            ObjectRef::Id(id) => id,
            ObjectRef::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

/// `checkout.session.completed` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub mode: Option<String>,
    pub customer: Option<ObjectRef>,
    pub subscription: Option<ObjectRef>,
    pub customer_details: Option<CustomerDetails>,
    pub customer_email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// What a completed subscription checkout bought
#[derive(Debug, Clone, PartialEq)]
pub enum PlanSelection {
    Individual,
    Team { company_name: String },
}

/// Subscription purchase extracted from a completed checkout
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPurchase {
    pub email: Option<String>,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub plan: PlanSelection,
}

impl CheckoutSessionObject {
    pub fn is_subscription(&self) -> bool {
        self.mode.as_deref() == Some("subscription")
    }

    /// Purchase details, or `None` when the session was not a subscription.
    pub fn purchase(&self) -> Option<SubscriptionPurchase> {
        if !self.is_subscription() {
            return None;
        }

        let email = self
            .customer_details
            .as_ref()
            .and_then(|details| details.email.as_deref())
            .or(self.customer_email.as_deref())
            .map(normalize_email);

        let plan_type = self
            .metadata
            .get(METADATA_PLAN_TYPE)
            .and_then(|value| PlanType::parse(value))
            .unwrap_or_default();
        let company_name = self
            .metadata
            .get(METADATA_COMPANY_NAME)
            .map(|name| name.trim())
            .filter(|name| !name.is_empty());

        let plan = match (plan_type, company_name) {
            (PlanType::Empresa, Some(name)) => PlanSelection::Team {
                company_name: name.to_string(),
            },
            _ => PlanSelection::Individual,
        };

        Some(SubscriptionPurchase {
            email,
            customer_id: self.customer.as_ref().map(|c| c.id().to_string()),
            subscription_id: self.subscription.as_ref().map(|s| s.id().to_string()),
            plan,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionItemObject {
    pub id: String,
    pub quantity: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SubscriptionItemList {
    #[serde(default)]
    pub data: Vec<SubscriptionItemObject>,
}

/// `customer.subscription.*` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub items: SubscriptionItemList,
}

impl SubscriptionObject {
    /// Quantity of the first line item, if the provider sent one.
    pub fn quantity(&self) -> Option<u64> {
        self.items.data.first().and_then(|item| item.quantity)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    CheckoutSessionCompleted(CheckoutSessionObject),
    SubscriptionUpdated(SubscriptionObject),
    SubscriptionDeleted(SubscriptionObject),
    Unhandled,
}

/// A verified event with its provider envelope fields
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub id: String,
    pub event_type: String,
    pub created: i64,
    pub event: BillingEvent,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: i64,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

impl EventEnvelope {
    /// Decode a raw event body. Only the variants acted on are parsed
    /// strictly; other event types keep just their envelope.
    pub fn parse(payload: &str) -> BillingResult<Self> {
        let raw: RawEvent = serde_json::from_str(payload)?;

        let event = match raw.event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED => {
                BillingEvent::CheckoutSessionCompleted(serde_json::from_value(raw.data.object)?)
            }
            SUBSCRIPTION_UPDATED => {
                BillingEvent::SubscriptionUpdated(serde_json::from_value(raw.data.object)?)
            }
            SUBSCRIPTION_DELETED => {
                BillingEvent::SubscriptionDeleted(serde_json::from_value(raw.data.object)?)
            }
            _ => BillingEvent::Unhandled,
        };

        Ok(Self {
            id: raw.id,
            event_type: raw.event_type,
            created: raw.created,
            event,
        })
    }
}
