// API crate clippy configuration
#![allow(clippy::needless_borrows_for_generic_args)] // Sometimes needed for clarity
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! YoCreo API Library
//!
//! HTTP surface for subscription checkout, access checks, the Stripe
//! webhook and the admin seat/reconciliation endpoints.

pub mod config;
pub mod error;
pub mod routes;
pub mod security;
pub mod state;
pub mod store;

pub use config::{Config, StoreConfig};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
pub use store::connect_store;
