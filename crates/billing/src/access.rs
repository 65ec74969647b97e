//! Subscription access checks
//!
//! Read-only queries over individual subscribers. Team members other than
//! the purchasing admin are not covered here.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use yocreo_shared::{normalize_email, RecordStore, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};

/// Result of the access check
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheck {
    pub has_access: bool,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub subscribed_at: Option<OffsetDateTime>,
}

/// Detailed subscription state for the application login screen
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusReport {
    pub has_access: bool,
    /// `active`, `trial`, `none` or the provider status
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub message: String,
}

pub struct AccessService {
    store: Arc<dyn RecordStore>,
}

impl AccessService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Whether `email` has an active individual subscription.
    pub async fn check_access(&self, email: &str) -> BillingResult<AccessCheck> {
        let email = required_email(email)?;

        let subscriber = self.store.find_active_subscriber(&email).await?;

        Ok(match subscriber {
            Some(row) => AccessCheck {
                has_access: true,
                subscribed_at: Some(row.created_at),
            },
            None => AccessCheck {
                has_access: false,
                subscribed_at: None,
            },
        })
    }

    /// Classify the subscriber row for `email`, counting trials as access.
    pub async fn subscription_status(
        &self,
        email: &str,
    ) -> BillingResult<SubscriptionStatusReport> {
        let email = required_email(email)?;

        let Some(row) = self.store.find_subscriber(&email).await? else {
            return Ok(SubscriptionStatusReport {
                has_access: false,
                status: "none".to_string(),
                customer_id: None,
                message: "No subscription found for this email".to_string(),
            });
        };

        let report = match &row.status {
            SubscriptionStatus::Active => SubscriptionStatusReport {
                has_access: true,
                status: "active".to_string(),
                customer_id: row.customer_id,
                message: "Subscription active".to_string(),
            },
            SubscriptionStatus::Trialing => SubscriptionStatusReport {
                has_access: true,
                status: "trial".to_string(),
                customer_id: row.customer_id,
                message: "Trial period".to_string(),
            },
            other => SubscriptionStatusReport {
                has_access: false,
                status: other.as_str().to_string(),
                customer_id: row.customer_id,
                message: format!("Subscription {}", other.as_str()),
            },
        };

        Ok(report)
    }
}

/// Lower-cases only; surrounding whitespace is part of the lookup key.
fn required_email(email: &str) -> BillingResult<String> {
    if email.trim().is_empty() {
        return Err(BillingError::InvalidInput("email is required".to_string()));
    }
    Ok(normalize_email(email))
}
