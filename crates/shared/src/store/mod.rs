//! Record store adapters
//!
//! Stateless gateways to the three subscription tables. Every write is a
//! single-row (or single-statement) operation; no transaction spans
//! subscriber, organization and member writes.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    NewMember, NewOrganization, NewSubscriber, Organization, OrganizationMember, Subscriber,
    SubscriptionChange, SubscriptionStatus,
};

#[cfg(any(test, feature = "test-util"))]
pub mod memory;
mod postgres;
mod postgrest;

pub use postgres::{create_pool, run_migrations, PgStore};
pub use postgrest::PostgrestStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record store request failed: {0}")]
    Request(String),
    #[error("Record store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Database error: {0}")]
    Database(String),
    #[error("Unique constraint violated: {0}")]
    Conflict(String),
    #[error("Failed to decode record: {0}")]
    Decode(String),
}

impl StoreError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Request(_) => true,
            StoreError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Request(err.to_string())
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db) = err.as_database_error() {
            if db.is_unique_violation() {
                return StoreError::Conflict(db.message().to_string());
            }
        }
        StoreError::Database(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read/write access to subscribers, organizations and members.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert the subscriber, or overwrite status, ids and plan on an
    /// existing row with the same email. `created_at` is kept on overwrite.
    async fn upsert_subscriber(&self, subscriber: NewSubscriber) -> StoreResult<Subscriber>;

    async fn find_subscriber(&self, email: &str) -> StoreResult<Option<Subscriber>>;

    /// Subscriber with this email and status `active`.
    async fn find_active_subscriber(&self, email: &str) -> StoreResult<Option<Subscriber>>;

    /// Subscribers that carry a billing subscription id.
    async fn list_billed_subscribers(&self) -> StoreResult<Vec<Subscriber>>;

    /// Set status and `updated_at` on subscribers matching the subscription
    /// id. Returns the number of rows touched; zero is not an error.
    async fn update_subscriber_status(
        &self,
        subscription_id: &str,
        status: &SubscriptionStatus,
    ) -> StoreResult<u64>;

    /// Insert a new organization. Fails with `Conflict` when another row
    /// already holds the subscription id.
    async fn insert_organization(
        &self,
        organization: NewOrganization,
    ) -> StoreResult<Organization>;

    async fn find_organization(&self, id: Uuid) -> StoreResult<Option<Organization>>;

    async fn find_organization_by_subscription(
        &self,
        subscription_id: &str,
    ) -> StoreResult<Option<Organization>>;

    /// Organizations that carry a billing subscription id.
    async fn list_billed_organizations(&self) -> StoreResult<Vec<Organization>>;

    /// Apply status (and seat count when present) to organizations matching
    /// the subscription id. Returns the number of rows touched.
    async fn apply_organization_change(
        &self,
        subscription_id: &str,
        change: &SubscriptionChange,
    ) -> StoreResult<u64>;

    /// Set the paid seat count of one organization.
    async fn set_organization_seats(&self, id: Uuid, seat_count: i32) -> StoreResult<u64>;

    /// Insert a member. An existing `(organization_id, email)` row is
    /// returned unchanged.
    async fn insert_member(&self, member: NewMember) -> StoreResult<OrganizationMember>;

    async fn find_member(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<OrganizationMember>>;
}
