//! Application state

use std::sync::Arc;

use yocreo_billing::{AdminSecret, BillingService};

use crate::config::Config;

/// Shared application state
///
/// Provider handles are built once at startup and only read afterwards.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub billing: Arc<BillingService>,
    /// Credential required by the admin endpoints
    pub admin: AdminSecret,
}

impl AppState {
    pub fn new(config: Config, billing: BillingService, admin: AdminSecret) -> Self {
        Self {
            config: Arc::new(config),
            billing: Arc::new(billing),
            admin,
        }
    }
}
