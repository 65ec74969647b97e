//! Shared admin secret for administrative operations

use std::fmt;

use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};

/// Server-held secret that administrative callers must present
#[derive(Clone)]
pub struct AdminSecret(String);

impl AdminSecret {
    pub fn new(secret: impl Into<String>) -> BillingResult<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(BillingError::Config("admin secret must not be empty".to_string()));
        }
        Ok(Self(secret))
    }

    /// Constant-time comparison against a caller-supplied credential.
    pub fn matches(&self, candidate: &str) -> bool {
        bool::from(self.0.as_bytes().ct_eq(candidate.as_bytes()))
    }

    pub fn authorize(&self, candidate: Option<&str>) -> BillingResult<()> {
        match candidate {
            Some(candidate) if self.matches(candidate) => Ok(()),
            _ => Err(BillingError::Unauthorized("invalid api key".to_string())),
        }
    }
}

impl fmt::Debug for AdminSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminSecret(***)")
    }
}
