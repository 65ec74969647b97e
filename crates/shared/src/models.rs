//! Subscriber, organization and membership records

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Lower-case an email so it can be used as the subscriber key.
pub fn normalize_email(email: &str) -> String {
    email.to_lowercase()
}

/// Plan purchased at checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    #[default]
    Individual,
    /// Team plan, billed per seat
    Empresa,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Individual => "individual",
            PlanType::Empresa => "empresa",
        }
    }

    /// Parse a plan name, accepting any casing.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "individual" => Some(PlanType::Individual),
            "empresa" => Some(PlanType::Empresa),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription status as reported by the billing provider.
///
/// Statuses the provider adds later are kept verbatim in `Other` so they
/// round-trip through the record store unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Unpaid,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Paused,
    Other(String),
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Other(s) => s.as_str(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }
}

impl From<String> for SubscriptionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "unpaid" => SubscriptionStatus::Unpaid,
            "canceled" => SubscriptionStatus::Canceled,
            "incomplete" => SubscriptionStatus::Incomplete,
            "incomplete_expired" => SubscriptionStatus::IncompleteExpired,
            "paused" => SubscriptionStatus::Paused,
            _ => SubscriptionStatus::Other(value),
        }
    }
}

impl From<&str> for SubscriptionStatus {
    fn from(value: &str) -> Self {
        SubscriptionStatus::from(value.to_string())
    }
}

impl From<SubscriptionStatus> for String {
    fn from(value: SubscriptionStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Inactive,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Inactive => "inactive",
        }
    }
}

/// Individual-plan subscriber, keyed by normalized email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub email: String,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub plan_type: PlanType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Values written by a subscriber upsert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSubscriber {
    pub email: String,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub plan_type: PlanType,
}

/// Team-plan organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub admin_email: String,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub seat_count: i32,
    pub max_members: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewOrganization {
    pub name: String,
    pub admin_email: String,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub seat_count: i32,
    pub max_members: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationMember {
    pub organization_id: Uuid,
    pub email: String,
    pub role: MemberRole,
    pub status: MemberStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMember {
    pub organization_id: Uuid,
    pub email: String,
    pub role: MemberRole,
    pub status: MemberStatus,
}

/// Change applied to rows matched by billing subscription id.
///
/// `seat_count: None` leaves the stored seat count untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionChange {
    pub status: SubscriptionStatus,
    pub seat_count: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email_lowercases() {
        assert_eq!(normalize_email("X@Y.com"), "x@y.com");
        assert_eq!(normalize_email("already@lower.io"), "already@lower.io");
    }

    #[test]
    fn test_plan_type_parse() {
        assert_eq!(PlanType::parse("empresa"), Some(PlanType::Empresa));
        assert_eq!(PlanType::parse("Individual"), Some(PlanType::Individual));
        assert_eq!(PlanType::parse("team"), None);
    }

    #[test]
    fn test_status_keeps_unknown_values() {
        let status = SubscriptionStatus::from("some_future_status");
        assert_eq!(status.as_str(), "some_future_status");
        assert!(!status.is_active());

        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, "\"some_future_status\"");
    }

    #[test]
    fn test_status_serde_uses_provider_names() {
        let status: SubscriptionStatus = serde_json::from_str("\"past_due\"").unwrap();
        assert_eq!(status, SubscriptionStatus::PastDue);
        assert_eq!(
            serde_json::to_value(SubscriptionStatus::Canceled).unwrap(),
            serde_json::json!("canceled")
        );
    }
}
