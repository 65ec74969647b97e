//! Direct PostgreSQL store

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{RecordStore, StoreError, StoreResult};
use crate::models::{
    MemberRole, MemberStatus, NewMember, NewOrganization, NewSubscriber, Organization,
    OrganizationMember, PlanType, Subscriber, SubscriptionChange, SubscriptionStatus,
};

/// Create a connection pool for the record store
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Apply the subscription table migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriberRow {
    email: String,
    customer_id: Option<String>,
    subscription_id: Option<String>,
    status: String,
    plan_type: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl SubscriberRow {
    fn into_model(self) -> StoreResult<Subscriber> {
        let plan_type = PlanType::parse(&self.plan_type)
            .ok_or_else(|| StoreError::Decode(format!("unknown plan_type '{}'", self.plan_type)))?;
        Ok(Subscriber {
            email: self.email,
            customer_id: self.customer_id,
            subscription_id: self.subscription_id,
            status: SubscriptionStatus::from(self.status),
            plan_type,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    admin_email: String,
    customer_id: Option<String>,
    subscription_id: Option<String>,
    status: String,
    seat_count: i32,
    max_members: Option<i32>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: row.id,
            name: row.name,
            admin_email: row.admin_email,
            customer_id: row.customer_id,
            subscription_id: row.subscription_id,
            status: SubscriptionStatus::from(row.status),
            seat_count: row.seat_count,
            max_members: row.max_members,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    organization_id: Uuid,
    email: String,
    role: String,
    status: String,
}

impl MemberRow {
    fn into_model(self) -> StoreResult<OrganizationMember> {
        let role = match self.role.as_str() {
            "admin" => MemberRole::Admin,
            "member" => MemberRole::Member,
            other => return Err(StoreError::Decode(format!("unknown member role '{}'", other))),
        };
        let status = match self.status.as_str() {
            "active" => MemberStatus::Active,
            "inactive" => MemberStatus::Inactive,
            other => {
                return Err(StoreError::Decode(format!(
                    "unknown member status '{}'",
                    other
                )))
            }
        };
        Ok(OrganizationMember {
            organization_id: self.organization_id,
            email: self.email,
            role,
            status,
        })
    }
}

const SUBSCRIBER_COLUMNS: &str =
    "email, customer_id, subscription_id, status, plan_type, created_at, updated_at";
const ORGANIZATION_COLUMNS: &str = "id, name, admin_email, customer_id, subscription_id, status, \
     seat_count, max_members, created_at, updated_at";

/// Record store over a `sqlx` pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn upsert_subscriber(&self, subscriber: NewSubscriber) -> StoreResult<Subscriber> {
        let row: SubscriberRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO subscriptions (email, customer_id, subscription_id, status, plan_type, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (email) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                subscription_id = EXCLUDED.subscription_id,
                status = EXCLUDED.status,
                plan_type = EXCLUDED.plan_type,
                updated_at = NOW()
            RETURNING {}
            "#,
            SUBSCRIBER_COLUMNS
        ))
        .bind(&subscriber.email)
        .bind(&subscriber.customer_id)
        .bind(&subscriber.subscription_id)
        .bind(subscriber.status.as_str())
        .bind(subscriber.plan_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.into_model()
    }

    async fn find_subscriber(&self, email: &str) -> StoreResult<Option<Subscriber>> {
        let row: Option<SubscriberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE email = $1",
            SUBSCRIBER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubscriberRow::into_model).transpose()
    }

    async fn find_active_subscriber(&self, email: &str) -> StoreResult<Option<Subscriber>> {
        let row: Option<SubscriberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE email = $1 AND status = 'active'",
            SUBSCRIBER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubscriberRow::into_model).transpose()
    }

    async fn list_billed_subscribers(&self) -> StoreResult<Vec<Subscriber>> {
        let rows: Vec<SubscriberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE subscription_id IS NOT NULL ORDER BY created_at",
            SUBSCRIBER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SubscriberRow::into_model).collect()
    }

    async fn update_subscriber_status(
        &self,
        subscription_id: &str,
        status: &SubscriptionStatus,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE subscriptions SET status = $1, updated_at = NOW() WHERE subscription_id = $2",
        )
        .bind(status.as_str())
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_organization(
        &self,
        organization: NewOrganization,
    ) -> StoreResult<Organization> {
        let row: OrganizationRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO organizations
                (id, name, admin_email, customer_id, subscription_id, status, seat_count, max_members, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            RETURNING {}
            "#,
            ORGANIZATION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&organization.name)
        .bind(&organization.admin_email)
        .bind(&organization.customer_id)
        .bind(&organization.subscription_id)
        .bind(organization.status.as_str())
        .bind(organization.seat_count)
        .bind(organization.max_members)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_organization(&self, id: Uuid) -> StoreResult<Option<Organization>> {
        let row: Option<OrganizationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE id = $1",
            ORGANIZATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Organization::from))
    }

    async fn find_organization_by_subscription(
        &self,
        subscription_id: &str,
    ) -> StoreResult<Option<Organization>> {
        let row: Option<OrganizationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE subscription_id = $1",
            ORGANIZATION_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Organization::from))
    }

    async fn list_billed_organizations(&self) -> StoreResult<Vec<Organization>> {
        let rows: Vec<OrganizationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE subscription_id IS NOT NULL ORDER BY created_at",
            ORGANIZATION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Organization::from).collect())
    }

    async fn apply_organization_change(
        &self,
        subscription_id: &str,
        change: &SubscriptionChange,
    ) -> StoreResult<u64> {
        // COALESCE keeps the stored seat count when the change carries none
        let result = sqlx::query(
            r#"
            UPDATE organizations
            SET status = $1,
                seat_count = COALESCE($2, seat_count),
                updated_at = NOW()
            WHERE subscription_id = $3
            "#,
        )
        .bind(change.status.as_str())
        .bind(change.seat_count)
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn set_organization_seats(&self, id: Uuid, seat_count: i32) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE organizations SET seat_count = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(seat_count)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_member(&self, member: NewMember) -> StoreResult<OrganizationMember> {
        sqlx::query(
            r#"
            INSERT INTO organization_members (organization_id, email, role, status, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (organization_id, email) DO NOTHING
            "#,
        )
        .bind(member.organization_id)
        .bind(&member.email)
        .bind(member.role.as_str())
        .bind(member.status.as_str())
        .execute(&self.pool)
        .await?;

        self.find_member(member.organization_id, &member.email)
            .await?
            .ok_or_else(|| StoreError::Database("member row missing after insert".to_string()))
    }

    async fn find_member(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<OrganizationMember>> {
        let row: Option<MemberRow> = sqlx::query_as(
            r#"
            SELECT organization_id, email, role, status
            FROM organization_members
            WHERE organization_id = $1 AND email = $2
            "#,
        )
        .bind(organization_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MemberRow::into_model).transpose()
    }
}
