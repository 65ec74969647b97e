//! Stripe client configuration

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};

const DEFAULT_SITE_URL: &str = "http://localhost:3000";
const DEFAULT_APP_URL: &str = "https://yocreo-app-production.up.railway.app";

/// Settings for the billing provider and the checkout redirects
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Fixed recurring price sold at checkout
    pub price_id: String,
    /// Public marketing site, used for checkout redirects
    pub site_url: String,
    /// Application users are sent to after purchase
    pub app_url: String,
}

impl StripeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: required("STRIPE_SECRET_KEY")?,
            webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            price_id: required("STRIPE_PRICE_ID")?,
            site_url: optional("SITE_URL")
                .or_else(|| optional("NEXT_PUBLIC_SITE_URL"))
                .unwrap_or_else(|| DEFAULT_SITE_URL.to_string()),
            app_url: optional("APP_URL")
                .or_else(|| optional("NEXT_PUBLIC_STREAMLIT_URL"))
                .unwrap_or_else(|| DEFAULT_APP_URL.to_string()),
        })
    }

    pub fn success_url(&self) -> String {
        format!(
            "{}/exito?session_id={{CHECKOUT_SESSION_ID}}",
            self.site_url.trim_end_matches('/')
        )
    }

    pub fn cancel_url(&self) -> String {
        self.site_url.trim_end_matches('/').to_string()
    }
}

fn required(name: &str) -> BillingResult<String> {
    optional(name).ok_or_else(|| BillingError::Config(format!("{} must be set", name)))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Process-wide Stripe handle; cheap to clone, never mutated after creation
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self {
            inner,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
