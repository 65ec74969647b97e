//! Server configuration

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),
    #[error(
        "Missing record store configuration: set DATABASE_URL or SUPABASE_URL with SUPABASE_SERVICE_KEY"
    )]
    MissingStore,
}

/// Where subscriber and organization rows live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// Direct PostgreSQL connection
    Postgres { database_url: String },
    /// Hosted PostgREST endpoint
    Postgrest { url: String, api_key: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub allowed_origins: Vec<String>,
    /// Shared secret for administrative endpoints
    pub api_secret_key: String,
    pub store: StoreConfig,
    /// Apply SQL migrations at startup (PostgreSQL store only)
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_secret_key = get("API_SECRET_KEY").ok_or(ConfigError::Missing("API_SECRET_KEY"))?;

        let store = if let Some(database_url) = get("DATABASE_URL") {
            StoreConfig::Postgres { database_url }
        } else {
            let url = get("SUPABASE_URL").or_else(|| get("NEXT_PUBLIC_SUPABASE_URL"));
            let api_key = get("SUPABASE_SERVICE_KEY")
                .or_else(|| get("SUPABASE_ANON_KEY"))
                .or_else(|| get("NEXT_PUBLIC_SUPABASE_ANON_KEY"));
            match (url, api_key) {
                (Some(url), Some(api_key)) => StoreConfig::Postgrest { url, api_key },
                _ => return Err(ConfigError::MissingStore),
            }
        };

        let allowed_origins = get("ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            allowed_origins,
            api_secret_key,
            store,
            run_migrations: get("RUN_MIGRATIONS")
                .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }
}
