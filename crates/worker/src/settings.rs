//! Worker schedule settings

/// Every 30 minutes, on the minute
pub const DEFAULT_RECONCILE_CRON: &str = "0 */30 * * * *";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Six-field cron expression (seconds first) for the drift sweep
    pub reconcile_cron: String,
    /// Rewrite local rows to match Stripe when drift is found
    pub auto_repair: bool,
}

impl WorkerSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let reconcile_cron = lookup("RECONCILE_CRON")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_RECONCILE_CRON.to_string());

        let auto_repair = lookup("RECONCILE_AUTO_REPAIR")
            .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            reconcile_cron,
            auto_repair,
        }
    }
}
