//! Seat management for team organizations
//!
//! Changes the paid seat count in two steps: the provider's subscription
//! item first, then the local organization row. A failure between the two
//! leaves the provider ahead of the record store; the next
//! `customer.subscription.updated` event carries the new quantity and
//! converges the row.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use yocreo_shared::RecordStore;

use crate::admin_key::AdminSecret;
use crate::error::{BillingError, BillingResult};
use crate::gateway::BillingGateway;

/// Seat update request as posted by the admin tooling.
///
/// Fields stay loosely typed so the credential is checked before any
/// parameter is looked at.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeatUpdateRequest {
    pub organization_id: Option<Value>,
    pub new_quantity: Option<Value>,
    pub api_key: Option<Value>,
}

impl SeatUpdateRequest {
    /// Parses a raw request body. Anything that is not a JSON object yields
    /// an empty request, which then fails authorization.
    pub fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_ref().and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatUpdateResult {
    pub success: bool,
    pub seat_count: i32,
    pub previous_seat_count: i32,
}

pub struct SeatService {
    gateway: Arc<dyn BillingGateway>,
    store: Arc<dyn RecordStore>,
    admin: AdminSecret,
}

impl SeatService {
    pub fn new(
        gateway: Arc<dyn BillingGateway>,
        store: Arc<dyn RecordStore>,
        admin: AdminSecret,
    ) -> Self {
        Self {
            gateway,
            store,
            admin,
        }
    }

    pub async fn update_seats(
        &self,
        request: &SeatUpdateRequest,
    ) -> BillingResult<SeatUpdateResult> {
        self.admin.authorize(request.api_key())?;

        let (organization_id, quantity) = validate(request)?;

        let organization = self
            .store
            .find_organization(organization_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Organization not found".to_string()))?;

        let subscription_id = organization.subscription_id.clone().ok_or_else(|| {
            BillingError::NotFound("Organization has no subscription".to_string())
        })?;

        let subscription = self.gateway.retrieve_subscription(&subscription_id).await?;
        let item = subscription
            .primary_item()
            .ok_or_else(|| BillingError::SubscriptionItemNotFound(subscription_id.clone()))?;

        // The quantity fits i32 after validation
        self.gateway
            .update_item_quantity(&subscription_id, &item.id, quantity as u64)
            .await?;

        match self
            .store
            .set_organization_seats(organization_id, quantity)
            .await
        {
            Ok(0) => {
                tracing::warn!(
                    organization_id = %organization_id,
                    subscription_id = %subscription_id,
                    "Organization disappeared before the seat count was stored"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    organization_id = %organization_id,
                    subscription_id = %subscription_id,
                    seat_count = quantity,
                    error = %e,
                    reconciliation_needed = true,
                    "RECONCILIATION NEEDED: billing quantity updated but local seat count was not"
                );
                return Err(e.into());
            }
        }

        tracing::info!(
            organization_id = %organization_id,
            subscription_id = %subscription_id,
            previous_seat_count = organization.seat_count,
            seat_count = quantity,
            "Organization seat count updated"
        );

        Ok(SeatUpdateResult {
            success: true,
            seat_count: quantity,
            previous_seat_count: organization.seat_count,
        })
    }
}

fn validate(request: &SeatUpdateRequest) -> BillingResult<(Uuid, i32)> {
    let organization_id = request
        .organization_id
        .as_ref()
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| BillingError::InvalidInput("organization_id is required".to_string()))?;
    let organization_id = Uuid::parse_str(organization_id)
        .map_err(|_| BillingError::InvalidInput("organization_id is not a valid id".to_string()))?;

    let quantity = request
        .new_quantity
        .as_ref()
        .and_then(Value::as_i64)
        .ok_or_else(|| {
            BillingError::InvalidInput("new_quantity must be a positive integer".to_string())
        })?;
    let quantity = i32::try_from(quantity)
        .ok()
        .filter(|q| *q >= 1)
        .ok_or_else(|| {
            BillingError::InvalidInput("new_quantity must be a positive integer".to_string())
        })?;

    Ok((organization_id, quantity))
}
