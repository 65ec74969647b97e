// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Subscription Reconciliation
//!
//! End-to-end checks over the webhook handler, access checks and seat
//! updates, run against the in-memory store and scripted gateway:
//! - Webhook redelivery and ordering
//! - Partial record store failures
//! - Signature rejection
//! - Seat update saga and its webhook fallback

#[cfg(test)]
mod support {
    use std::sync::Arc;

    use serde_json::{json, Value};
    use time::OffsetDateTime;
    use yocreo_shared::MemoryStore;

    use crate::client::StripeConfig;
    use crate::mock::ScriptedGateway;
    use crate::webhooks::signature_header;
    use crate::{AdminSecret, BillingService};

    pub const WEBHOOK_SECRET: &str = "whsec_edge_case_secret";
    pub const ADMIN_KEY: &str = "admin-key-123";

    pub struct Harness {
        pub gateway: Arc<ScriptedGateway>,
        pub store: Arc<MemoryStore>,
        pub billing: BillingService,
    }

    pub fn harness() -> Harness {
        let gateway = Arc::new(ScriptedGateway::new());
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(StripeConfig {
            secret_key: "sk_test".into(),
            webhook_secret: WEBHOOK_SECRET.into(),
            price_id: "price_test".into(),
            site_url: "https://yocreo.test".into(),
            app_url: "https://app.yocreo.test".into(),
        });
        let admin = AdminSecret::new(ADMIN_KEY).unwrap();
        let billing = BillingService::new(gateway.clone(), store.clone(), config, admin);
        Harness {
            gateway,
            store,
            billing,
        }
    }

    pub fn sign(payload: &str) -> String {
        signature_header(
            WEBHOOK_SECRET,
            OffsetDateTime::now_utc().unix_timestamp(),
            payload,
        )
    }

    pub fn checkout_completed(
        event_id: &str,
        email: &str,
        subscription_id: &str,
        metadata: Value,
    ) -> String {
        json!({
            "id": event_id,
            "object": "event",
            "type": "checkout.session.completed",
            "created": 1_750_000_000,
            "data": { "object": {
                "id": format!("cs_{}", event_id),
                "object": "checkout.session",
                "mode": "subscription",
                "customer": "cus_edge",
                "subscription": subscription_id,
                "customer_details": { "email": email },
                "metadata": metadata
            }}
        })
        .to_string()
    }

    pub fn subscription_event(
        event_type: &str,
        subscription_id: &str,
        status: &str,
        quantity: Option<u64>,
    ) -> String {
        let mut object = json!({
            "id": subscription_id,
            "object": "subscription",
            "status": status,
        });
        if let Some(quantity) = quantity {
            object["items"] = json!({
                "object": "list",
                "data": [{ "id": "si_edge", "quantity": quantity }]
            });
        }
        json!({
            "id": format!("evt_{}_{}", status, quantity.unwrap_or_default()),
            "object": "event",
            "type": event_type,
            "created": 1_750_000_100,
            "data": { "object": object }
        })
        .to_string()
    }
}

#[cfg(test)]
mod webhook_tests {
    use serde_json::json;
    use yocreo_shared::{
        FailurePoint, MemberRole, MemberStatus, NewOrganization, NewSubscriber, PlanType,
        RecordStore, SubscriptionStatus,
    };

    use super::support::*;
    use crate::webhooks::WebhookAction;
    use crate::BillingError;

    // =========================================================================
    // Individual checkout lower-cases the email and records an active row
    // =========================================================================
    #[tokio::test]
    async fn test_individual_checkout_records_lowercase_subscriber() {
        let h = harness();
        let payload = checkout_completed(
            "evt_ind",
            "X@Y.com",
            "sub_ind",
            json!({ "planType": "individual", "companyName": "" }),
        );

        let outcome = h.billing.webhooks.process(&payload, &sign(&payload)).await.unwrap();

        assert!(outcome.is_clean());
        let subscribers = h.store.subscribers().await;
        assert_eq!(subscribers.len(), 1);
        assert_eq!(subscribers[0].email, "x@y.com");
        assert_eq!(subscribers[0].status, SubscriptionStatus::Active);
        assert_eq!(subscribers[0].plan_type, PlanType::Individual);
        assert_eq!(subscribers[0].subscription_id.as_deref(), Some("sub_ind"));
        assert!(h.store.organizations().await.is_empty());
    }

    // =========================================================================
    // Team checkout creates one organization and its admin member
    // =========================================================================
    #[tokio::test]
    async fn test_team_checkout_creates_organization_and_admin() {
        let h = harness();
        let payload = checkout_completed(
            "evt_team",
            "a@b.com",
            "sub_team",
            json!({ "planType": "empresa", "companyName": "Acme" }),
        );

        let outcome = h.billing.webhooks.process(&payload, &sign(&payload)).await.unwrap();
        assert!(matches!(outcome.action, WebhookAction::OrganizationCreated { .. }));

        let organizations = h.store.organizations().await;
        assert_eq!(organizations.len(), 1);
        let org = &organizations[0];
        assert_eq!(org.name, "Acme");
        assert_eq!(org.admin_email, "a@b.com");
        assert_eq!(org.seat_count, 1);
        assert_eq!(org.status, SubscriptionStatus::Active);
        assert_eq!(org.max_members, None);

        let members = h.store.members().await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].organization_id, org.id);
        assert_eq!(members[0].email, "a@b.com");
        assert_eq!(members[0].role, MemberRole::Admin);
        assert_eq!(members[0].status, MemberStatus::Active);

        assert!(h.store.subscribers().await.is_empty());
    }

    // =========================================================================
    // Redelivered checkout converges to the same state
    // =========================================================================
    #[tokio::test]
    async fn test_checkout_redelivery_is_idempotent() {
        let h = harness();
        let individual = checkout_completed(
            "evt_dup_ind",
            "dup@y.com",
            "sub_dup_ind",
            json!({ "planType": "individual" }),
        );
        let team = checkout_completed(
            "evt_dup_team",
            "boss@acme.com",
            "sub_dup_team",
            json!({ "planType": "empresa", "companyName": "Acme" }),
        );

        for _ in 0..2 {
            h.billing.webhooks.process(&individual, &sign(&individual)).await.unwrap();
        }
        let first = h.billing.webhooks.process(&team, &sign(&team)).await.unwrap();
        let second = h.billing.webhooks.process(&team, &sign(&team)).await.unwrap();

        let subscribers = h.store.subscribers().await;
        assert_eq!(subscribers.len(), 1);
        assert_eq!(subscribers[0].status, SubscriptionStatus::Active);

        assert_eq!(h.store.organizations().await.len(), 1);
        assert_eq!(h.store.members().await.len(), 1);

        let WebhookAction::OrganizationCreated { organization_id } = first.action else {
            panic!("first delivery should create the organization");
        };
        assert_eq!(
            second.action,
            WebhookAction::OrganizationAlreadyRecorded { organization_id }
        );
    }

    // =========================================================================
    // Empty company name falls back to an individual subscription
    // =========================================================================
    #[tokio::test]
    async fn test_empresa_without_company_records_subscriber() {
        let h = harness();
        let payload = checkout_completed(
            "evt_nocompany",
            "lone@y.com",
            "sub_nocompany",
            json!({ "planType": "empresa", "companyName": "   " }),
        );

        h.billing.webhooks.process(&payload, &sign(&payload)).await.unwrap();

        assert_eq!(h.store.subscribers().await.len(), 1);
        assert!(h.store.organizations().await.is_empty());
    }

    // =========================================================================
    // Deletion delivered twice leaves both rows canceled without error
    // =========================================================================
    #[tokio::test]
    async fn test_deleted_twice_stays_canceled() {
        let h = harness();
        let checkout = checkout_completed("evt_c", "d@y.com", "sub_del", json!({}));
        h.billing.webhooks.process(&checkout, &sign(&checkout)).await.unwrap();

        let deleted =
            subscription_event("customer.subscription.deleted", "sub_del", "canceled", None);
        for _ in 0..2 {
            let outcome = h.billing.webhooks.process(&deleted, &sign(&deleted)).await.unwrap();
            assert!(outcome.is_clean());
            assert!(matches!(
                outcome.action,
                WebhookAction::SubscriptionCanceled { subscribers: 1, .. }
            ));
            assert_eq!(h.store.subscribers().await[0].status, SubscriptionStatus::Canceled);
        }
    }

    // =========================================================================
    // Deletion always cancels, whatever status the payload carries
    // =========================================================================
    #[tokio::test]
    async fn test_deleted_event_forces_canceled() {
        let h = harness();
        h.store
            .seed_organization(NewOrganization {
                name: "Acme".into(),
                admin_email: "a@b.com".into(),
                customer_id: None,
                subscription_id: Some("sub_org_del".into()),
                status: SubscriptionStatus::Active,
                seat_count: 4,
                max_members: None,
            })
            .await;

        let deleted =
            subscription_event("customer.subscription.deleted", "sub_org_del", "active", Some(9));
        h.billing.webhooks.process(&deleted, &sign(&deleted)).await.unwrap();

        let org = &h.store.organizations().await[0];
        assert_eq!(org.status, SubscriptionStatus::Canceled);
        assert_eq!(org.seat_count, 4);
    }

    // =========================================================================
    // Update without quantity keeps the last known seat count
    // =========================================================================
    #[tokio::test]
    async fn test_update_without_quantity_keeps_seats() {
        let h = harness();
        let checkout = checkout_completed(
            "evt_seats",
            "a@b.com",
            "sub_seats",
            json!({ "planType": "empresa", "companyName": "Acme" }),
        );
        h.billing.webhooks.process(&checkout, &sign(&checkout)).await.unwrap();

        let with_quantity =
            subscription_event("customer.subscription.updated", "sub_seats", "active", Some(7));
        let without_quantity =
            subscription_event("customer.subscription.updated", "sub_seats", "past_due", None);

        h.billing.webhooks.process(&with_quantity, &sign(&with_quantity)).await.unwrap();
        assert_eq!(h.store.organizations().await[0].seat_count, 7);

        h.billing.webhooks.process(&without_quantity, &sign(&without_quantity)).await.unwrap();
        let org = &h.store.organizations().await[0];
        assert_eq!(org.seat_count, 7);
        assert_eq!(org.status, SubscriptionStatus::PastDue);
    }

    // =========================================================================
    // Events for unknown subscriptions are silent no-ops
    // =========================================================================
    #[tokio::test]
    async fn test_update_for_unknown_subscription_is_noop() {
        let h = harness();
        let payload = subscription_event(
            "customer.subscription.updated",
            "sub_never_seen",
            "active",
            Some(2),
        );

        let outcome = h.billing.webhooks.process(&payload, &sign(&payload)).await.unwrap();

        assert!(outcome.is_clean());
        assert_eq!(
            outcome.action,
            WebhookAction::SubscriptionSynced {
                subscription_id: "sub_never_seen".into(),
                subscribers: 0,
                organizations: 0,
            }
        );
        assert_eq!(h.store.mutation_count().await, 0);
    }

    // =========================================================================
    // Unknown event types are acknowledged without action
    // =========================================================================
    #[tokio::test]
    async fn test_unknown_event_type_is_acknowledged() {
        let h = harness();
        let payload = json!({
            "id": "evt_future",
            "type": "customer.subscription.trial_will_end",
            "data": { "object": { "id": "sub_x", "shape": "unexpected" } }
        })
        .to_string();

        let outcome = h.billing.webhooks.process(&payload, &sign(&payload)).await.unwrap();

        assert_eq!(outcome.action, WebhookAction::Ignored);
        assert_eq!(h.store.mutation_count().await, 0);
    }

    // =========================================================================
    // Tampered or missing signatures mutate nothing
    // =========================================================================
    #[tokio::test]
    async fn test_bad_signature_mutates_nothing() {
        let h = harness();
        let payload = checkout_completed("evt_forged", "f@y.com", "sub_forged", json!({}));
        let header = sign(&payload);
        let tampered = payload.replace("f@y.com", "attacker@y.com");

        for (body, signature) in [
            (tampered.as_str(), header.as_str()),
            (payload.as_str(), ""),
            (payload.as_str(), "t=1,v1=deadbeef"),
        ] {
            let result = h.billing.webhooks.process(body, signature).await;
            assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
        }

        assert_eq!(h.store.mutation_count().await, 0);
    }

    // =========================================================================
    // Record store failures are reported but the event is still acknowledged
    // =========================================================================
    #[tokio::test]
    async fn test_organization_failure_is_acknowledged() {
        let h = harness();
        h.store.fail_on(FailurePoint::InsertOrganization).await;
        let payload = checkout_completed(
            "evt_fail",
            "a@b.com",
            "sub_fail",
            json!({ "planType": "empresa", "companyName": "Acme" }),
        );

        let outcome = h.billing.webhooks.process(&payload, &sign(&payload)).await.unwrap();

        assert_eq!(outcome.action, WebhookAction::NotRecorded);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].record, "organization");
        assert!(h.store.members().await.is_empty());

        // Redelivery after recovery completes the record
        h.store.recover(FailurePoint::InsertOrganization).await;
        let retry = h.billing.webhooks.process(&payload, &sign(&payload)).await.unwrap();
        assert!(matches!(retry.action, WebhookAction::OrganizationCreated { .. }));
        assert_eq!(h.store.members().await.len(), 1);
    }

    #[tokio::test]
    async fn test_member_failure_keeps_organization() {
        let h = harness();
        h.store.fail_on(FailurePoint::InsertMember).await;
        let payload = checkout_completed(
            "evt_member",
            "a@b.com",
            "sub_member",
            json!({ "planType": "empresa", "companyName": "Acme" }),
        );

        let outcome = h.billing.webhooks.process(&payload, &sign(&payload)).await.unwrap();

        assert!(matches!(outcome.action, WebhookAction::OrganizationCreated { .. }));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].record, "organization_member");
        assert_eq!(h.store.organizations().await.len(), 1);

        h.store.recover(FailurePoint::InsertMember).await;
        let again = h.billing.webhooks.process(&payload, &sign(&payload)).await.unwrap();
        assert!(again.is_clean());
        assert_eq!(h.store.members().await.len(), 1);
    }

    #[tokio::test]
    async fn test_checkout_without_email_is_acknowledged() {
        let h = harness();
        let payload = json!({
            "id": "evt_noemail",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_noemail",
                "mode": "subscription",
                "customer": "cus_1",
                "subscription": "sub_1",
                "customer_details": { "email": null }
            }}
        })
        .to_string();

        let outcome = h.billing.webhooks.process(&payload, &sign(&payload)).await.unwrap();

        assert_eq!(outcome.action, WebhookAction::NotRecorded);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(h.store.mutation_count().await, 0);
    }

    // =========================================================================
    // Re-subscribing with the same email overwrites the previous row
    // =========================================================================
    #[tokio::test]
    async fn test_resubscribe_overwrites_canceled_row() {
        let h = harness();
        h.store
            .upsert_subscriber(NewSubscriber {
                email: "back@y.com".into(),
                customer_id: Some("cus_old".into()),
                subscription_id: Some("sub_old".into()),
                status: SubscriptionStatus::Canceled,
                plan_type: PlanType::Individual,
            })
            .await
            .unwrap();

        let payload = checkout_completed("evt_back", "Back@Y.com", "sub_new", json!({}));
        h.billing.webhooks.process(&payload, &sign(&payload)).await.unwrap();

        let row = h.store.find_subscriber("back@y.com").await.unwrap().unwrap();
        assert_eq!(row.status, SubscriptionStatus::Active);
        assert_eq!(row.subscription_id.as_deref(), Some("sub_new"));
        assert_eq!(row.customer_id.as_deref(), Some("cus_edge"));
    }
}

#[cfg(test)]
mod access_tests {
    use serde_json::json;
    use yocreo_shared::{NewSubscriber, PlanType, RecordStore, SubscriptionStatus};

    use super::support::*;

    // =========================================================================
    // Access iff an active row exists for the lower-cased email
    // =========================================================================
    #[tokio::test]
    async fn test_access_tracks_subscription_lifecycle() {
        let h = harness();
        assert!(!h.billing.access.check_access("x@y.com").await.unwrap().has_access);

        let checkout = checkout_completed("evt_acc", "X@y.COM", "sub_acc", json!({}));
        h.billing.webhooks.process(&checkout, &sign(&checkout)).await.unwrap();
        let check = h.billing.access.check_access("x@Y.com").await.unwrap();
        assert!(check.has_access);
        assert!(check.subscribed_at.is_some());

        let past_due =
            subscription_event("customer.subscription.updated", "sub_acc", "past_due", Some(1));
        h.billing.webhooks.process(&past_due, &sign(&past_due)).await.unwrap();
        assert!(!h.billing.access.check_access("x@y.com").await.unwrap().has_access);

        let active = subscription_event("customer.subscription.updated", "sub_acc", "active", None);
        h.billing.webhooks.process(&active, &sign(&active)).await.unwrap();
        assert!(h.billing.access.check_access("X@Y.COM").await.unwrap().has_access);
    }

    #[tokio::test]
    async fn test_team_admin_is_not_covered_by_access_check() {
        let h = harness();
        let checkout = checkout_completed(
            "evt_team_acc",
            "boss@acme.com",
            "sub_team_acc",
            json!({ "planType": "empresa", "companyName": "Acme" }),
        );
        h.billing.webhooks.process(&checkout, &sign(&checkout)).await.unwrap();

        assert!(!h.billing.access.check_access("boss@acme.com").await.unwrap().has_access);
    }

    #[tokio::test]
    async fn test_non_active_statuses_deny_access() {
        let h = harness();
        for (i, status) in [
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Unpaid,
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::Other("paused_forever".into()),
        ]
        .into_iter()
        .enumerate()
        {
            let email = format!("user{}@y.com", i);
            h.store
                .upsert_subscriber(NewSubscriber {
                    email: email.clone(),
                    customer_id: None,
                    subscription_id: Some(format!("sub_{}", i)),
                    status,
                    plan_type: PlanType::Individual,
                })
                .await
                .unwrap();
            assert!(!h.billing.access.check_access(&email).await.unwrap().has_access);
        }
    }
}

#[cfg(test)]
mod seat_tests {
    use serde_json::json;
    use uuid::Uuid;
    use yocreo_shared::{FailurePoint, NewOrganization, SubscriptionStatus};

    use super::support::*;
    use crate::seats::SeatUpdateRequest;
    use crate::BillingError;

    async fn seeded(h: &Harness) -> Uuid {
        h.gateway
            .add_subscription("sub_seat", "si_seat", SubscriptionStatus::Active, 3)
            .await;
        h.store
            .seed_organization(NewOrganization {
                name: "Acme".into(),
                admin_email: "a@b.com".into(),
                customer_id: Some("cus_seat".into()),
                subscription_id: Some("sub_seat".into()),
                status: SubscriptionStatus::Active,
                seat_count: 3,
                max_members: None,
            })
            .await
            .id
    }

    fn request(organization_id: Uuid, quantity: i64, key: &str) -> SeatUpdateRequest {
        SeatUpdateRequest {
            organization_id: Some(json!(organization_id.to_string())),
            new_quantity: Some(json!(quantity)),
            api_key: Some(json!(key)),
        }
    }

    // =========================================================================
    // Seat update writes both the provider and the record store
    // =========================================================================
    #[tokio::test]
    async fn test_seat_update_changes_both_sides() {
        let h = harness();
        let org_id = seeded(&h).await;

        let result = h
            .billing
            .seats
            .update_seats(&request(org_id, 5, ADMIN_KEY))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.seat_count, 5);
        assert_eq!(result.previous_seat_count, 3);
        assert_eq!(
            h.gateway.subscription("sub_seat").await.unwrap().quantity(),
            Some(5)
        );
        assert_eq!(h.store.organizations().await[0].seat_count, 5);
    }

    #[tokio::test]
    async fn test_seat_update_bad_key_changes_nothing() {
        let h = harness();
        let org_id = seeded(&h).await;

        let result = h.billing.seats.update_seats(&request(org_id, 5, "wrong")).await;

        assert!(matches!(result, Err(BillingError::Unauthorized(_))));
        assert_eq!(
            h.gateway.subscription("sub_seat").await.unwrap().quantity(),
            Some(3)
        );
        assert_eq!(h.store.organizations().await[0].seat_count, 3);
    }

    #[tokio::test]
    async fn test_seat_update_checks_key_before_params() {
        let h = harness();
        let bad_params = SeatUpdateRequest {
            organization_id: Some(json!(42)),
            new_quantity: Some(json!(0)),
            api_key: Some(json!("wrong")),
        };
        assert!(matches!(
            h.billing.seats.update_seats(&bad_params).await,
            Err(BillingError::Unauthorized(_))
        ));

        let bad_params = SeatUpdateRequest {
            api_key: Some(json!(ADMIN_KEY)),
            ..bad_params
        };
        assert!(matches!(
            h.billing.seats.update_seats(&bad_params).await,
            Err(BillingError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_seat_update_unknown_organization() {
        let h = harness();
        seeded(&h).await;

        let result = h
            .billing
            .seats
            .update_seats(&request(Uuid::new_v4(), 5, ADMIN_KEY))
            .await;
        assert!(matches!(result, Err(BillingError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_seat_update_without_line_item() {
        let h = harness();
        let org_id = seeded(&h).await;
        h.gateway
            .put_subscription(crate::gateway::SubscriptionSnapshot {
                id: "sub_seat".into(),
                status: SubscriptionStatus::Active,
                items: vec![],
            })
            .await;

        let result = h.billing.seats.update_seats(&request(org_id, 5, ADMIN_KEY)).await;
        assert!(matches!(result, Err(BillingError::SubscriptionItemNotFound(_))));
        assert_eq!(h.store.organizations().await[0].seat_count, 3);
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_local_seats() {
        let h = harness();
        let org_id = seeded(&h).await;
        h.gateway.fail_updates(true).await;

        let result = h.billing.seats.update_seats(&request(org_id, 5, ADMIN_KEY)).await;

        assert!(matches!(result, Err(BillingError::StripeApi(_))));
        assert_eq!(h.store.organizations().await[0].seat_count, 3);
    }

    // =========================================================================
    // Local write failure after billing succeeds is converged by the webhook
    // =========================================================================
    #[tokio::test]
    async fn test_interrupted_seat_update_converges_on_webhook() {
        let h = harness();
        let org_id = seeded(&h).await;
        h.store.fail_on(FailurePoint::SetOrganizationSeats).await;

        let result = h.billing.seats.update_seats(&request(org_id, 5, ADMIN_KEY)).await;
        assert!(matches!(result, Err(BillingError::Store(_))));
        assert_eq!(
            h.gateway.subscription("sub_seat").await.unwrap().quantity(),
            Some(5)
        );
        assert_eq!(h.store.organizations().await[0].seat_count, 3);

        // Provider emits the update for the quantity change
        let updated =
            subscription_event("customer.subscription.updated", "sub_seat", "active", Some(5));
        let outcome = h.billing.webhooks.process(&updated, &sign(&updated)).await.unwrap();

        assert!(outcome.is_clean());
        assert_eq!(h.store.organizations().await[0].seat_count, 5);
    }

    #[tokio::test]
    async fn test_interrupted_seat_update_is_found_by_sweep() {
        let h = harness();
        let org_id = seeded(&h).await;
        h.store.fail_on(FailurePoint::SetOrganizationSeats).await;
        let _ = h.billing.seats.update_seats(&request(org_id, 6, ADMIN_KEY)).await;

        let report = h.billing.reconciliation.run(false).await.unwrap();
        assert_eq!(report.drift.len(), 1);

        let repaired = h.billing.reconciliation.run(true).await.unwrap();
        assert_eq!(repaired.repaired, 1);
        assert_eq!(h.store.organizations().await[0].seat_count, 6);
    }
}
