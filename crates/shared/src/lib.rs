// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! YoCreo shared types
//!
//! Data model for individual subscribers and team organizations, plus the
//! record store adapters used to read and write them.
//!
//! ## Stores
//!
//! - **PostgREST**: hosted store reached over HTTP (`SUPABASE_URL`)
//! - **PostgreSQL**: direct connection through `sqlx` (`DATABASE_URL`)
//! - **Memory**: in-process store for tests (feature `test-util`)

pub mod models;
pub mod store;

pub use models::{
    normalize_email, MemberRole, MemberStatus, NewMember, NewOrganization, NewSubscriber,
    Organization, OrganizationMember, PlanType, Subscriber, SubscriptionChange,
    SubscriptionStatus,
};
pub use store::{
    create_pool, run_migrations, PgStore, PostgrestStore, RecordStore, StoreError, StoreResult,
};

#[cfg(any(test, feature = "test-util"))]
pub use store::memory::{FailurePoint, MemoryStore};
