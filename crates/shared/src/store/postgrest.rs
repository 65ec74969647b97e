//! Hosted record store reached through its PostgREST interface

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use uuid::Uuid;

use super::{RecordStore, StoreError, StoreResult};
use crate::models::{
    NewMember, NewOrganization, NewSubscriber, Organization, OrganizationMember, Subscriber,
    SubscriptionChange, SubscriptionStatus,
};

const SUBSCRIPTIONS: &str = "subscriptions";
const ORGANIZATIONS: &str = "organizations";
const MEMBERS: &str = "organization_members";

/// Read attempts after the first one for idempotent GETs
const READ_RETRIES: usize = 2;

#[derive(Serialize)]
struct SubscriberUpsert<'a> {
    #[serde(flatten)]
    subscriber: &'a NewSubscriber,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
}

#[derive(Serialize)]
struct OrganizationInsert<'a> {
    id: Uuid,
    #[serde(flatten)]
    organization: &'a NewOrganization,
}

#[derive(Serialize)]
struct StatusPatch<'a> {
    status: &'a SubscriptionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    seat_count: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
}

#[derive(Serialize)]
struct SeatPatch {
    seat_count: i32,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
}

/// PostgREST-backed store (`<url>/rest/v1/<table>`)
#[derive(Clone)]
pub struct PostgrestStore {
    http: Client,
    base_url: String,
    api_key: String,
}

impl PostgrestStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, api_key)
    }

    pub fn with_client(
        http: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            api_key: api_key.into(),
        }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
    }

    /// GET rows matching the filters, retrying transient failures.
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> StoreResult<Vec<T>> {
        let strategy = ExponentialBackoff::from_millis(50)
            .max_delay(Duration::from_secs(1))
            .map(jitter)
            .take(READ_RETRIES);

        RetryIf::start(
            strategy,
            move || async move {
                let response = self
                    .request(Method::GET, table)
                    .query(&[("select", "*")])
                    .query(filters)
                    .send()
                    .await?;
                read_rows(response).await
            },
            |e: &StoreError| {
                if e.is_transient() {
                    tracing::warn!(table = table, error = %e, "Record store read failed, retrying");
                }
                e.is_transient()
            },
        )
        .await
    }

    async fn patch<B: Serialize>(
        &self,
        table: &str,
        filters: &[(&str, String)],
        body: &B,
    ) -> StoreResult<u64> {
        let response = self
            .request(Method::PATCH, table)
            .header("Prefer", "return=representation")
            .query(filters)
            .json(body)
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = read_rows(response).await?;
        Ok(rows.len() as u64)
    }
}

async fn read_rows<T: DeserializeOwned>(response: Response) -> StoreResult<Vec<T>> {
    let status = response.status();
    if status == StatusCode::CONFLICT {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::Conflict(body));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<Vec<T>>()
        .await
        .map_err(|e| StoreError::Decode(e.to_string()))
}

fn first_row<T>(rows: Vec<T>, table: &str) -> StoreResult<T> {
    rows.into_iter()
        .next()
        .ok_or_else(|| StoreError::Decode(format!("{} write returned no representation", table)))
}

#[async_trait]
impl RecordStore for PostgrestStore {
    async fn upsert_subscriber(&self, subscriber: NewSubscriber) -> StoreResult<Subscriber> {
        let body = SubscriberUpsert {
            subscriber: &subscriber,
            updated_at: OffsetDateTime::now_utc(),
        };
        let response = self
            .request(Method::POST, SUBSCRIPTIONS)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .query(&[("on_conflict", "email")])
            .json(&body)
            .send()
            .await?;
        first_row(read_rows(response).await?, SUBSCRIPTIONS)
    }

    async fn find_subscriber(&self, email: &str) -> StoreResult<Option<Subscriber>> {
        let rows = self
            .select(SUBSCRIPTIONS, &[("email", format!("eq.{}", email))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_active_subscriber(&self, email: &str) -> StoreResult<Option<Subscriber>> {
        let rows = self
            .select(
                SUBSCRIPTIONS,
                &[
                    ("email", format!("eq.{}", email)),
                    ("status", "eq.active".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_billed_subscribers(&self) -> StoreResult<Vec<Subscriber>> {
        self.select(SUBSCRIPTIONS, &[("subscription_id", "not.is.null".to_string())])
            .await
    }

    async fn update_subscriber_status(
        &self,
        subscription_id: &str,
        status: &SubscriptionStatus,
    ) -> StoreResult<u64> {
        let body = StatusPatch {
            status,
            seat_count: None,
            updated_at: OffsetDateTime::now_utc(),
        };
        self.patch(
            SUBSCRIPTIONS,
            &[("subscription_id", format!("eq.{}", subscription_id))],
            &body,
        )
        .await
    }

    async fn insert_organization(
        &self,
        organization: NewOrganization,
    ) -> StoreResult<Organization> {
        let body = OrganizationInsert {
            id: Uuid::new_v4(),
            organization: &organization,
        };
        let response = self
            .request(Method::POST, ORGANIZATIONS)
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;
        first_row(read_rows(response).await?, ORGANIZATIONS)
    }

    async fn find_organization(&self, id: Uuid) -> StoreResult<Option<Organization>> {
        let rows = self
            .select(ORGANIZATIONS, &[("id", format!("eq.{}", id))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_organization_by_subscription(
        &self,
        subscription_id: &str,
    ) -> StoreResult<Option<Organization>> {
        let rows = self
            .select(
                ORGANIZATIONS,
                &[("subscription_id", format!("eq.{}", subscription_id))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_billed_organizations(&self) -> StoreResult<Vec<Organization>> {
        self.select(ORGANIZATIONS, &[("subscription_id", "not.is.null".to_string())])
            .await
    }

    async fn apply_organization_change(
        &self,
        subscription_id: &str,
        change: &SubscriptionChange,
    ) -> StoreResult<u64> {
        let body = StatusPatch {
            status: &change.status,
            seat_count: change.seat_count,
            updated_at: OffsetDateTime::now_utc(),
        };
        self.patch(
            ORGANIZATIONS,
            &[("subscription_id", format!("eq.{}", subscription_id))],
            &body,
        )
        .await
    }

    async fn set_organization_seats(&self, id: Uuid, seat_count: i32) -> StoreResult<u64> {
        let body = SeatPatch {
            seat_count,
            updated_at: OffsetDateTime::now_utc(),
        };
        self.patch(ORGANIZATIONS, &[("id", format!("eq.{}", id))], &body)
            .await
    }

    async fn insert_member(&self, member: NewMember) -> StoreResult<OrganizationMember> {
        let response = self
            .request(Method::POST, MEMBERS)
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .query(&[("on_conflict", "organization_id,email")])
            .json(&member)
            .send()
            .await?;
        let rows: Vec<OrganizationMember> = read_rows(response).await?;
        if let Some(row) = rows.into_iter().next() {
            return Ok(row);
        }

        // Duplicate ignored: hand back the row that was already there
        self.find_member(member.organization_id, &member.email)
            .await?
            .ok_or_else(|| StoreError::Decode(format!("{} insert returned no row", MEMBERS)))
    }

    async fn find_member(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<OrganizationMember>> {
        let rows = self
            .select(
                MEMBERS,
                &[
                    ("organization_id", format!("eq.{}", organization_id)),
                    ("email", format!("eq.{}", email)),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanType;
    use mockito::Matcher;

    fn subscriber_row(email: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "email": email,
            "customer_id": "cus_123",
            "subscription_id": "sub_123",
            "status": status,
            "plan_type": "individual",
            "created_at": "2025-01-10T12:00:00+00:00",
            "updated_at": "2025-01-10T12:00:00+00:00"
        })
    }

    #[tokio::test]
    async fn test_find_active_subscriber_filters_by_email_and_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/subscriptions")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("email".into(), "eq.x@y.com".into()),
                Matcher::UrlEncoded("status".into(), "eq.active".into()),
            ]))
            .match_header("apikey", "service-key")
            .with_status(200)
            .with_body(serde_json::json!([subscriber_row("x@y.com", "active")]).to_string())
            .create_async()
            .await;

        let store = PostgrestStore::new(server.url(), "service-key");
        let found = store.find_active_subscriber("x@y.com").await.unwrap();

        mock.assert_async().await;
        let found = found.expect("subscriber should be returned");
        assert_eq!(found.status, SubscriptionStatus::Active);
        assert_eq!(found.plan_type, PlanType::Individual);
    }

    #[tokio::test]
    async fn test_find_active_subscriber_empty_result_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/subscriptions")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let store = PostgrestStore::new(server.url(), "key");
        assert!(store.find_active_subscriber("nobody@y.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_subscriber_uses_email_conflict_target() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/subscriptions")
            .match_query(Matcher::UrlEncoded("on_conflict".into(), "email".into()))
            .match_header(
                "prefer",
                "resolution=merge-duplicates,return=representation",
            )
            .match_body(Matcher::PartialJson(serde_json::json!({
                "email": "x@y.com",
                "status": "active",
                "plan_type": "individual"
            })))
            .with_status(201)
            .with_body(serde_json::json!([subscriber_row("x@y.com", "active")]).to_string())
            .create_async()
            .await;

        let store = PostgrestStore::new(server.url(), "key");
        let saved = store
            .upsert_subscriber(NewSubscriber {
                email: "x@y.com".into(),
                customer_id: Some("cus_123".into()),
                subscription_id: Some("sub_123".into()),
                status: SubscriptionStatus::Active,
                plan_type: PlanType::Individual,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(saved.email, "x@y.com");
    }

    #[tokio::test]
    async fn test_organization_patch_omits_missing_seat_count() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/rest/v1/organizations")
            .match_query(Matcher::UrlEncoded(
                "subscription_id".into(),
                "eq.sub_9".into(),
            ))
            .match_body(Matcher::Regex(r#"^\{"status":"past_due","updated_at":"#.into()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let store = PostgrestStore::new(server.url(), "key");
        let touched = store
            .apply_organization_change(
                "sub_9",
                &SubscriptionChange {
                    status: SubscriptionStatus::PastDue,
                    seat_count: None,
                },
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(touched, 0);
    }

    #[tokio::test]
    async fn test_duplicate_organization_maps_to_conflict() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/rest/v1/organizations")
            .with_status(409)
            .with_body(r#"{"code":"23505","message":"duplicate key value"}"#)
            .create_async()
            .await;

        let store = PostgrestStore::new(server.url(), "key");
        let result = store
            .insert_organization(NewOrganization {
                name: "Acme".into(),
                admin_email: "a@b.com".into(),
                customer_id: None,
                subscription_id: Some("sub_1".into()),
                status: SubscriptionStatus::Active,
                seat_count: 1,
                max_members: None,
            })
            .await;

        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_for_reads() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/rest/v1/organizations")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(READ_RETRIES + 1)
            .create_async()
            .await;

        let store = PostgrestStore::new(server.url(), "key");
        let result = store.find_organization(Uuid::new_v4()).await;

        failing.assert_async().await;
        assert!(matches!(result, Err(StoreError::Status { status: 503, .. })));
    }
}
