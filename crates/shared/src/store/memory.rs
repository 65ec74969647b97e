//! In-memory record store for tests
//!
//! Mirrors the constraints of the real tables (unique email, unique
//! organization subscription id, composite member key) and can be told to
//! fail specific operations.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{RecordStore, StoreError, StoreResult};
use crate::models::{
    NewMember, NewOrganization, NewSubscriber, Organization, OrganizationMember, Subscriber,
    SubscriptionChange, SubscriptionStatus,
};

/// Operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    UpsertSubscriber,
    UpdateSubscriberStatus,
    InsertOrganization,
    ApplyOrganizationChange,
    SetOrganizationSeats,
    InsertMember,
}

#[derive(Default)]
struct Tables {
    subscribers: HashMap<String, Subscriber>,
    organizations: HashMap<Uuid, Organization>,
    members: HashMap<(Uuid, String), OrganizationMember>,
    failures: HashSet<FailurePoint>,
    mutations: usize,
}

impl Tables {
    fn check(&self, point: FailurePoint) -> StoreResult<()> {
        if self.failures.contains(&point) {
            return Err(StoreError::Database(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `point` fail until `recover` is called.
    pub async fn fail_on(&self, point: FailurePoint) {
        self.tables.lock().await.failures.insert(point);
    }

    pub async fn recover(&self, point: FailurePoint) {
        self.tables.lock().await.failures.remove(&point);
    }

    /// Number of successful writes that changed stored state.
    pub async fn mutation_count(&self) -> usize {
        self.tables.lock().await.mutations
    }

    pub async fn subscribers(&self) -> Vec<Subscriber> {
        self.tables.lock().await.subscribers.values().cloned().collect()
    }

    pub async fn organizations(&self) -> Vec<Organization> {
        self.tables.lock().await.organizations.values().cloned().collect()
    }

    pub async fn members(&self) -> Vec<OrganizationMember> {
        self.tables.lock().await.members.values().cloned().collect()
    }

    /// Seed an organization row directly.
    pub async fn seed_organization(&self, organization: NewOrganization) -> Organization {
        let now = OffsetDateTime::now_utc();
        let row = Organization {
            id: Uuid::new_v4(),
            name: organization.name,
            admin_email: organization.admin_email,
            customer_id: organization.customer_id,
            subscription_id: organization.subscription_id,
            status: organization.status,
            seat_count: organization.seat_count,
            max_members: organization.max_members,
            created_at: now,
            updated_at: now,
        };
        self.tables
            .lock()
            .await
            .organizations
            .insert(row.id, row.clone());
        row
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_subscriber(&self, subscriber: NewSubscriber) -> StoreResult<Subscriber> {
        let mut tables = self.tables.lock().await;
        tables.check(FailurePoint::UpsertSubscriber)?;

        let now = OffsetDateTime::now_utc();
        let created_at = tables
            .subscribers
            .get(&subscriber.email)
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let row = Subscriber {
            email: subscriber.email,
            customer_id: subscriber.customer_id,
            subscription_id: subscriber.subscription_id,
            status: subscriber.status,
            plan_type: subscriber.plan_type,
            created_at,
            updated_at: now,
        };
        tables.subscribers.insert(row.email.clone(), row.clone());
        tables.mutations += 1;
        Ok(row)
    }

    async fn find_subscriber(&self, email: &str) -> StoreResult<Option<Subscriber>> {
        Ok(self.tables.lock().await.subscribers.get(email).cloned())
    }

    async fn find_active_subscriber(&self, email: &str) -> StoreResult<Option<Subscriber>> {
        Ok(self
            .tables
            .lock()
            .await
            .subscribers
            .get(email)
            .filter(|s| s.status.is_active())
            .cloned())
    }

    async fn list_billed_subscribers(&self) -> StoreResult<Vec<Subscriber>> {
        Ok(self
            .tables
            .lock()
            .await
            .subscribers
            .values()
            .filter(|s| s.subscription_id.is_some())
            .cloned()
            .collect())
    }

    async fn update_subscriber_status(
        &self,
        subscription_id: &str,
        status: &SubscriptionStatus,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.check(FailurePoint::UpdateSubscriberStatus)?;

        let now = OffsetDateTime::now_utc();
        let mut touched = 0;
        for row in tables.subscribers.values_mut() {
            if row.subscription_id.as_deref() == Some(subscription_id) {
                row.status = status.clone();
                row.updated_at = now;
                touched += 1;
            }
        }
        tables.mutations += touched as usize;
        Ok(touched)
    }

    async fn insert_organization(
        &self,
        organization: NewOrganization,
    ) -> StoreResult<Organization> {
        let mut tables = self.tables.lock().await;
        tables.check(FailurePoint::InsertOrganization)?;

        if let Some(subscription_id) = &organization.subscription_id {
            let taken = tables
                .organizations
                .values()
                .any(|o| o.subscription_id.as_ref() == Some(subscription_id));
            if taken {
                return Err(StoreError::Conflict(format!(
                    "organizations.subscription_id {} already exists",
                    subscription_id
                )));
            }
        }

        let now = OffsetDateTime::now_utc();
        let row = Organization {
            id: Uuid::new_v4(),
            name: organization.name,
            admin_email: organization.admin_email,
            customer_id: organization.customer_id,
            subscription_id: organization.subscription_id,
            status: organization.status,
            seat_count: organization.seat_count,
            max_members: organization.max_members,
            created_at: now,
            updated_at: now,
        };
        tables.organizations.insert(row.id, row.clone());
        tables.mutations += 1;
        Ok(row)
    }

    async fn find_organization(&self, id: Uuid) -> StoreResult<Option<Organization>> {
        Ok(self.tables.lock().await.organizations.get(&id).cloned())
    }

    async fn find_organization_by_subscription(
        &self,
        subscription_id: &str,
    ) -> StoreResult<Option<Organization>> {
        Ok(self
            .tables
            .lock()
            .await
            .organizations
            .values()
            .find(|o| o.subscription_id.as_deref() == Some(subscription_id))
            .cloned())
    }

    async fn list_billed_organizations(&self) -> StoreResult<Vec<Organization>> {
        Ok(self
            .tables
            .lock()
            .await
            .organizations
            .values()
            .filter(|o| o.subscription_id.is_some())
            .cloned()
            .collect())
    }

    async fn apply_organization_change(
        &self,
        subscription_id: &str,
        change: &SubscriptionChange,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.check(FailurePoint::ApplyOrganizationChange)?;

        let now = OffsetDateTime::now_utc();
        let mut touched = 0;
        for row in tables.organizations.values_mut() {
            if row.subscription_id.as_deref() == Some(subscription_id) {
                row.status = change.status.clone();
                if let Some(seats) = change.seat_count {
                    row.seat_count = seats;
                }
                row.updated_at = now;
                touched += 1;
            }
        }
        tables.mutations += touched as usize;
        Ok(touched)
    }

    async fn set_organization_seats(&self, id: Uuid, seat_count: i32) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.check(FailurePoint::SetOrganizationSeats)?;

        let touched = match tables.organizations.get_mut(&id) {
            Some(row) => {
                row.seat_count = seat_count;
                row.updated_at = OffsetDateTime::now_utc();
                1
            }
            None => 0,
        };
        tables.mutations += touched as usize;
        Ok(touched)
    }

    async fn insert_member(&self, member: NewMember) -> StoreResult<OrganizationMember> {
        let mut tables = self.tables.lock().await;
        tables.check(FailurePoint::InsertMember)?;

        let key = (member.organization_id, member.email.clone());
        if let Some(existing) = tables.members.get(&key) {
            return Ok(existing.clone());
        }
        let row = OrganizationMember {
            organization_id: member.organization_id,
            email: member.email,
            role: member.role,
            status: member.status,
        };
        tables.members.insert(key, row.clone());
        tables.mutations += 1;
        Ok(row)
    }

    async fn find_member(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<OrganizationMember>> {
        Ok(self
            .tables
            .lock()
            .await
            .members
            .get(&(organization_id, email.to_string()))
            .cloned())
    }
}
