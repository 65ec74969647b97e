//! Billing drift reconciliation
//!
//! Compares every subscriber and organization that carries a subscription
//! id against the live subscription at the provider. Read-only unless
//! repair is requested; repairs are routed through the webhook handler's
//! sync path so rows keep a single writer.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;
use yocreo_shared::{RecordStore, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{BillingGateway, SubscriptionSnapshot};
use crate::webhooks::WebhookHandler;

/// Record that drifted from the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriftSubject {
    Subscriber { email: String },
    Organization { id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriftKind {
    StatusMismatch {
        local: SubscriptionStatus,
        remote: SubscriptionStatus,
    },
    SeatCountMismatch {
        local: i32,
        remote: u64,
    },
    /// The provider no longer knows the subscription
    MissingRemote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriftSeverity {
    /// Access is granted or denied incorrectly
    High,
    /// Stored state is stale but access is unaffected
    Medium,
}

impl std::fmt::Display for DriftSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftSeverity::High => write!(f, "HIGH"),
            DriftSeverity::Medium => write!(f, "MEDIUM"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub subject: DriftSubject,
    pub subscription_id: String,
    #[serde(flatten)]
    pub kind: DriftKind,
    pub severity: DriftSeverity,
    pub repaired: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub subscriptions_checked: usize,
    /// Subscriptions whose provider lookup failed for reasons other than
    /// not-found; they are retried on the next sweep
    pub failed_lookups: usize,
    pub drift: Vec<DriftReport>,
    pub repaired: usize,
    pub healthy: bool,
}

/// Local view of one subscription id
#[derive(Default)]
struct LocalRecords {
    subscribers: Vec<(String, SubscriptionStatus)>,
    organizations: Vec<(Uuid, SubscriptionStatus, i32)>,
}

pub struct ReconciliationService {
    gateway: Arc<dyn BillingGateway>,
    store: Arc<dyn RecordStore>,
    webhooks: Arc<WebhookHandler>,
}

impl ReconciliationService {
    pub fn new(
        gateway: Arc<dyn BillingGateway>,
        store: Arc<dyn RecordStore>,
        webhooks: Arc<WebhookHandler>,
    ) -> Self {
        Self {
            gateway,
            store,
            webhooks,
        }
    }

    /// Run one sweep. With `repair`, drifted status and seat counts are
    /// overwritten with the provider's values.
    pub async fn run(&self, repair: bool) -> BillingResult<ReconciliationSummary> {
        let checked_at = OffsetDateTime::now_utc();
        let grouped = self.local_records().await?;

        let mut drift = Vec::new();
        let mut failed_lookups = 0;

        for (subscription_id, local) in &grouped {
            let snapshot = match self.gateway.retrieve_subscription(subscription_id).await {
                Ok(snapshot) => snapshot,
                Err(BillingError::NotFound(_)) => {
                    drift.extend(missing_remote(subscription_id, local));
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        subscription_id = %subscription_id,
                        error = %e,
                        "Could not retrieve subscription during reconciliation"
                    );
                    failed_lookups += 1;
                    continue;
                }
            };

            let mut found = compare(subscription_id, local, &snapshot);
            if found.is_empty() {
                continue;
            }

            if repair {
                let (_, failures) = self
                    .webhooks
                    .sync_subscription_state(subscription_id, &snapshot.status, snapshot.quantity())
                    .await;
                if failures.is_empty() {
                    for report in &mut found {
                        report.repaired = true;
                    }
                }
            }

            drift.extend(found);
        }

        let repaired = drift.iter().filter(|d| d.repaired).count();
        let healthy = drift.iter().all(|d| d.repaired) && failed_lookups == 0;

        for report in drift.iter().filter(|d| !d.repaired) {
            tracing::warn!(
                subscription_id = %report.subscription_id,
                subject = ?report.subject,
                kind = ?report.kind,
                severity = %report.severity,
                "Billing drift detected"
            );
        }

        tracing::info!(
            subscriptions_checked = grouped.len(),
            drift = drift.len(),
            repaired = repaired,
            failed_lookups = failed_lookups,
            "Billing reconciliation finished"
        );

        Ok(ReconciliationSummary {
            checked_at,
            subscriptions_checked: grouped.len(),
            failed_lookups,
            drift,
            repaired,
            healthy,
        })
    }

    async fn local_records(&self) -> BillingResult<BTreeMap<String, LocalRecords>> {
        let mut grouped: BTreeMap<String, LocalRecords> = BTreeMap::new();

        for subscriber in self.store.list_billed_subscribers().await? {
            if let Some(subscription_id) = subscriber.subscription_id {
                grouped
                    .entry(subscription_id)
                    .or_default()
                    .subscribers
                    .push((subscriber.email, subscriber.status));
            }
        }

        for organization in self.store.list_billed_organizations().await? {
            if let Some(subscription_id) = organization.subscription_id {
                grouped.entry(subscription_id).or_default().organizations.push((
                    organization.id,
                    organization.status,
                    organization.seat_count,
                ));
            }
        }

        Ok(grouped)
    }
}

fn status_severity(local: &SubscriptionStatus, remote: &SubscriptionStatus) -> DriftSeverity {
    if local.is_active() != remote.is_active() {
        DriftSeverity::High
    } else {
        DriftSeverity::Medium
    }
}

fn compare(
    subscription_id: &str,
    local: &LocalRecords,
    snapshot: &SubscriptionSnapshot,
) -> Vec<DriftReport> {
    let mut found = Vec::new();

    for (email, status) in &local.subscribers {
        if *status != snapshot.status {
            found.push(DriftReport {
                subject: DriftSubject::Subscriber {
                    email: email.clone(),
                },
                subscription_id: subscription_id.to_string(),
                kind: DriftKind::StatusMismatch {
                    local: status.clone(),
                    remote: snapshot.status.clone(),
                },
                severity: status_severity(status, &snapshot.status),
                repaired: false,
            });
        }
    }

    for (id, status, seat_count) in &local.organizations {
        if *status != snapshot.status {
            found.push(DriftReport {
                subject: DriftSubject::Organization { id: *id },
                subscription_id: subscription_id.to_string(),
                kind: DriftKind::StatusMismatch {
                    local: status.clone(),
                    remote: snapshot.status.clone(),
                },
                severity: status_severity(status, &snapshot.status),
                repaired: false,
            });
        }

        if let Some(quantity) = snapshot.quantity() {
            if i64::from(*seat_count) != i64::try_from(quantity).unwrap_or(i64::MAX) {
                found.push(DriftReport {
                    subject: DriftSubject::Organization { id: *id },
                    subscription_id: subscription_id.to_string(),
                    kind: DriftKind::SeatCountMismatch {
                        local: *seat_count,
                        remote: quantity,
                    },
                    severity: DriftSeverity::Medium,
                    repaired: false,
                });
            }
        }
    }

    found
}

fn missing_remote(subscription_id: &str, local: &LocalRecords) -> Vec<DriftReport> {
    let subjects = local
        .subscribers
        .iter()
        .map(|(email, _)| DriftSubject::Subscriber {
            email: email.clone(),
        })
        .chain(
            local
                .organizations
                .iter()
                .map(|(id, _, _)| DriftSubject::Organization { id: *id }),
        );

    subjects
        .map(|subject| DriftReport {
            subject,
            subscription_id: subscription_id.to_string(),
            kind: DriftKind::MissingRemote,
            severity: DriftSeverity::High,
            repaired: false,
        })
        .collect()
}
