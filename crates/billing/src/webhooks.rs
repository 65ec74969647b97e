//! Stripe webhook handling
//!
//! Verifies inbound events and applies subscription state to the record
//! store: individual subscribers and team organizations on checkout,
//! status and seat count on subscription changes.
//!
//! Every authenticated event is acknowledged. Record store failures after
//! verification are logged with `reconciliation_needed = true` and returned
//! in the [`WebhookOutcome`]; they never turn into a provider retry.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;
use yocreo_shared::{
    MemberRole, MemberStatus, NewMember, NewOrganization, NewSubscriber, Organization, PlanType,
    RecordStore, StoreError, SubscriptionChange, SubscriptionStatus,
};

use crate::error::{BillingError, BillingResult};
use crate::events::{
    BillingEvent, CheckoutSessionObject, EventEnvelope, PlanSelection, SubscriptionObject,
    SubscriptionPurchase,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// What the handler did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAction {
    SubscriberRecorded {
        email: String,
    },
    OrganizationCreated {
        organization_id: Uuid,
    },
    /// Redelivered team checkout; the organization already existed
    OrganizationAlreadyRecorded {
        organization_id: Uuid,
    },
    SubscriptionSynced {
        subscription_id: String,
        subscribers: u64,
        organizations: u64,
    },
    SubscriptionCanceled {
        subscription_id: String,
        subscribers: u64,
        organizations: u64,
    },
    /// The event applied nothing; see `failures` for the cause
    NotRecorded,
    /// Event acknowledged without action
    Ignored,
}

/// A record store write that failed after the event was verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationFailure {
    /// Record kind that was being written (`subscriber`, `organization`, ...)
    pub record: &'static str,
    /// Email or subscription id identifying the record
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookOutcome {
    pub event_id: String,
    pub event_type: String,
    pub action: WebhookAction,
    pub failures: Vec<ReconciliationFailure>,
}

impl WebhookOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Rows touched by a status/seat sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncCounts {
    pub subscribers: u64,
    pub organizations: u64,
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    store: Arc<dyn RecordStore>,
    webhook_secret: String,
}

impl WebhookHandler {
    pub fn new(store: Arc<dyn RecordStore>, webhook_secret: impl Into<String>) -> Self {
        Self {
            store,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verify the signature header and decode the event.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<EventEnvelope> {
        self.verify_event_at(payload, signature, OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Same as [`verify_event`](Self::verify_event) with an explicit clock.
    pub fn verify_event_at(
        &self,
        payload: &str,
        signature: &str,
        now: i64,
    ) -> BillingResult<EventEnvelope> {
        // Header format: t=timestamp,v1=signature[,v1=signature,v0=...]
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();

        for part in signature.split(',') {
            if let Some((key, value)) = part.trim().split_once('=') {
                match key {
                    "t" => timestamp = value.parse().ok(),
                    "v1" => candidates.push(value),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Missing timestamp in signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        if candidates.is_empty() {
            tracing::warn!("Missing v1 signature in signature header");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                diff = (now - timestamp).abs(),
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let expected = compute_signature(&self.webhook_secret, timestamp, payload)?;
        let matched = candidates
            .iter()
            .any(|candidate| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())));

        if !matched {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let envelope = EventEnvelope::parse(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            e
        })?;

        tracing::debug!(
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            "Webhook signature verified"
        );

        Ok(envelope)
    }

    /// Verify then handle in one step.
    pub async fn process(&self, payload: &str, signature: &str) -> BillingResult<WebhookOutcome> {
        let envelope = self.verify_event(payload, signature)?;
        Ok(self.handle_event(envelope).await)
    }

    /// Apply a verified event. Never fails: store errors are collected in
    /// the outcome.
    pub async fn handle_event(&self, envelope: EventEnvelope) -> WebhookOutcome {
        let mut failures = Vec::new();

        let action = match &envelope.event {
            BillingEvent::CheckoutSessionCompleted(session) => {
                self.handle_checkout_completed(session, &mut failures).await
            }
            BillingEvent::SubscriptionUpdated(subscription) => {
                self.handle_subscription_updated(subscription, &mut failures)
                    .await
            }
            BillingEvent::SubscriptionDeleted(subscription) => {
                self.handle_subscription_deleted(subscription, &mut failures)
                    .await
            }
            BillingEvent::Unhandled => {
                tracing::info!(
                    event_id = %envelope.id,
                    event_type = %envelope.event_type,
                    "Unhandled webhook event type"
                );
                WebhookAction::Ignored
            }
        };

        if !failures.is_empty() {
            tracing::error!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                failures = failures.len(),
                reconciliation_needed = true,
                "Webhook acknowledged with unapplied record changes"
            );
        }

        WebhookOutcome {
            event_id: envelope.id,
            event_type: envelope.event_type,
            action,
            failures,
        }
    }

    async fn handle_checkout_completed(
        &self,
        session: &CheckoutSessionObject,
        failures: &mut Vec<ReconciliationFailure>,
    ) -> WebhookAction {
        let Some(purchase) = session.purchase() else {
            tracing::info!(
                session_id = %session.id,
                mode = ?session.mode,
                "Checkout session is not a subscription, ignoring"
            );
            return WebhookAction::Ignored;
        };

        let Some(email) = purchase.email.clone() else {
            record_failure(
                failures,
                "subscriber",
                &session.id,
                "checkout session has no customer email",
            );
            return WebhookAction::NotRecorded;
        };

        match &purchase.plan {
            PlanSelection::Team { company_name } => {
                self.record_organization(&purchase, &email, company_name, failures)
                    .await
            }
            PlanSelection::Individual => self.record_subscriber(&purchase, email, failures).await,
        }
    }

    async fn record_subscriber(
        &self,
        purchase: &SubscriptionPurchase,
        email: String,
        failures: &mut Vec<ReconciliationFailure>,
    ) -> WebhookAction {
        let subscriber = NewSubscriber {
            email: email.clone(),
            customer_id: purchase.customer_id.clone(),
            subscription_id: purchase.subscription_id.clone(),
            status: SubscriptionStatus::Active,
            plan_type: PlanType::Individual,
        };

        match self.store.upsert_subscriber(subscriber).await {
            Ok(_) => {
                tracing::info!(
                    email = %email,
                    subscription_id = ?purchase.subscription_id,
                    "Individual subscription recorded"
                );
                WebhookAction::SubscriberRecorded { email }
            }
            Err(e) => {
                record_failure(failures, "subscriber", &email, e);
                WebhookAction::NotRecorded
            }
        }
    }

    async fn record_organization(
        &self,
        purchase: &SubscriptionPurchase,
        email: &str,
        company_name: &str,
        failures: &mut Vec<ReconciliationFailure>,
    ) -> WebhookAction {
        if let Some(existing) = self.existing_organization(purchase).await {
            self.ensure_admin_member(&existing, email, failures).await;
            tracing::info!(
                organization_id = %existing.id,
                subscription_id = ?existing.subscription_id,
                "Organization already recorded for subscription"
            );
            return WebhookAction::OrganizationAlreadyRecorded {
                organization_id: existing.id,
            };
        }

        let organization = NewOrganization {
            name: company_name.to_string(),
            admin_email: email.to_string(),
            customer_id: purchase.customer_id.clone(),
            subscription_id: purchase.subscription_id.clone(),
            status: SubscriptionStatus::Active,
            seat_count: 1,
            max_members: None,
        };

        match self.store.insert_organization(organization).await {
            Ok(created) => {
                tracing::info!(
                    organization_id = %created.id,
                    name = %created.name,
                    admin_email = %email,
                    "Organization created"
                );
                self.ensure_admin_member(&created, email, failures).await;
                WebhookAction::OrganizationCreated {
                    organization_id: created.id,
                }
            }
            // A concurrent delivery won the insert
            Err(StoreError::Conflict(_)) => match self.existing_organization(purchase).await {
                Some(existing) => {
                    self.ensure_admin_member(&existing, email, failures).await;
                    WebhookAction::OrganizationAlreadyRecorded {
                        organization_id: existing.id,
                    }
                }
                None => {
                    record_failure(
                        failures,
                        "organization",
                        purchase.subscription_id.as_deref().unwrap_or(email),
                        "subscription id conflict without a matching organization",
                    );
                    WebhookAction::NotRecorded
                }
            },
            Err(e) => {
                record_failure(
                    failures,
                    "organization",
                    purchase.subscription_id.as_deref().unwrap_or(email),
                    e,
                );
                WebhookAction::NotRecorded
            }
        }
    }

    async fn existing_organization(&self, purchase: &SubscriptionPurchase) -> Option<Organization> {
        let subscription_id = purchase.subscription_id.as_deref()?;
        match self
            .store
            .find_organization_by_subscription(subscription_id)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    subscription_id = %subscription_id,
                    error = %e,
                    "Organization lookup failed, attempting insert"
                );
                None
            }
        }
    }

    async fn ensure_admin_member(
        &self,
        organization: &Organization,
        email: &str,
        failures: &mut Vec<ReconciliationFailure>,
    ) {
        let member = NewMember {
            organization_id: organization.id,
            email: email.to_string(),
            role: MemberRole::Admin,
            status: MemberStatus::Active,
        };

        if let Err(e) = self.store.insert_member(member).await {
            record_failure(failures, "organization_member", email, e);
        }
    }

    async fn handle_subscription_updated(
        &self,
        subscription: &SubscriptionObject,
        failures: &mut Vec<ReconciliationFailure>,
    ) -> WebhookAction {
        let counts = self
            .apply_subscription_state(
                &subscription.id,
                &subscription.status,
                subscription.quantity(),
                failures,
            )
            .await;

        tracing::info!(
            subscription_id = %subscription.id,
            status = %subscription.status,
            quantity = ?subscription.quantity(),
            subscribers = counts.subscribers,
            organizations = counts.organizations,
            "Subscription updated"
        );

        WebhookAction::SubscriptionSynced {
            subscription_id: subscription.id.clone(),
            subscribers: counts.subscribers,
            organizations: counts.organizations,
        }
    }

    async fn handle_subscription_deleted(
        &self,
        subscription: &SubscriptionObject,
        failures: &mut Vec<ReconciliationFailure>,
    ) -> WebhookAction {
        let counts = self
            .apply_subscription_state(
                &subscription.id,
                &SubscriptionStatus::Canceled,
                None,
                failures,
            )
            .await;

        tracing::info!(
            subscription_id = %subscription.id,
            subscribers = counts.subscribers,
            organizations = counts.organizations,
            "Subscription canceled"
        );

        WebhookAction::SubscriptionCanceled {
            subscription_id: subscription.id.clone(),
            subscribers: counts.subscribers,
            organizations: counts.organizations,
        }
    }

    /// Write a subscription's status (and seat count, when known) to every
    /// subscriber and organization row carrying its id. Used by the
    /// update/delete events and by drift repair.
    pub async fn sync_subscription_state(
        &self,
        subscription_id: &str,
        status: &SubscriptionStatus,
        quantity: Option<u64>,
    ) -> (SyncCounts, Vec<ReconciliationFailure>) {
        let mut failures = Vec::new();
        let counts = self
            .apply_subscription_state(subscription_id, status, quantity, &mut failures)
            .await;
        (counts, failures)
    }

    async fn apply_subscription_state(
        &self,
        subscription_id: &str,
        status: &SubscriptionStatus,
        quantity: Option<u64>,
        failures: &mut Vec<ReconciliationFailure>,
    ) -> SyncCounts {
        let mut counts = SyncCounts::default();

        match self
            .store
            .update_subscriber_status(subscription_id, status)
            .await
        {
            Ok(rows) => counts.subscribers = rows,
            Err(e) => record_failure(failures, "subscriber", subscription_id, e),
        }

        let seat_count = quantity.and_then(|q| match i32::try_from(q) {
            Ok(seats) if seats >= 1 => Some(seats),
            _ => {
                tracing::warn!(
                    subscription_id = %subscription_id,
                    quantity = q,
                    "Ignoring out-of-range subscription quantity"
                );
                None
            }
        });
        let change = SubscriptionChange {
            status: status.clone(),
            seat_count,
        };

        match self
            .store
            .apply_organization_change(subscription_id, &change)
            .await
        {
            Ok(rows) => counts.organizations = rows,
            Err(e) => record_failure(failures, "organization", subscription_id, e),
        }

        counts
    }
}

fn record_failure(
    failures: &mut Vec<ReconciliationFailure>,
    record: &'static str,
    key: &str,
    error: impl std::fmt::Display,
) {
    let error = error.to_string();
    tracing::error!(
        record = record,
        key = %key,
        error = %error,
        reconciliation_needed = true,
        "RECONCILIATION NEEDED: record store write failed after webhook verification"
    );
    failures.push(ReconciliationFailure {
        record,
        key: key.to_string(),
        error,
    });
}

fn compute_signature(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("Invalid webhook secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a `stripe-signature` header value for `payload`, as the provider
/// would send it.
#[cfg(any(test, feature = "test-util"))]
pub fn signature_header(secret: &str, timestamp: i64, payload: &str) -> String {
    match compute_signature(secret, timestamp, payload) {
        Ok(signature) => format!("t={},v1={}", timestamp, signature),
        Err(_) => format!("t={}", timestamp),
    }
}
