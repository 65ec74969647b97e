//! Record store bootstrap

use std::sync::Arc;

use yocreo_shared::{create_pool, run_migrations, PgStore, PostgrestStore, RecordStore};

use crate::config::{Config, StoreConfig};

/// Open the record store selected by the configuration.
pub async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn RecordStore>> {
    match &config.store {
        StoreConfig::Postgres { database_url } => {
            tracing::info!("Connecting to database...");
            let pool = create_pool(database_url).await?;
            tracing::info!("Database connection established");

            if config.run_migrations {
                tracing::info!("Running database migrations...");
                run_migrations(&pool).await?;
            } else {
                tracing::info!("Database migrations skipped (RUN_MIGRATIONS not set)");
            }

            Ok(Arc::new(PgStore::new(pool)))
        }
        StoreConfig::Postgrest { url, api_key } => {
            tracing::info!(url = %url, "Using PostgREST record store");
            Ok(Arc::new(PostgrestStore::new(url.clone(), api_key.clone())))
        }
    }
}
