// Test code patterns:
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! YoCreo Background Worker
//!
//! Handles scheduled jobs:
//! - Billing drift sweep against Stripe (every 30 minutes by default)
//! - Heartbeat (every 5 minutes)

mod settings;

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use yocreo_api::{connect_store, Config};
use yocreo_billing::{AdminSecret, BillingService, ReconciliationSummary};

use crate::settings::WorkerSettings;

/// Log results of a drift sweep
fn log_reconciliation(summary: &ReconciliationSummary) {
    info!(
        subscriptions_checked = summary.subscriptions_checked,
        failed_lookups = summary.failed_lookups,
        drift = summary.drift.len(),
        repaired = summary.repaired,
        healthy = summary.healthy,
        "Billing reconciliation cycle complete"
    );

    for report in summary.drift.iter().filter(|r| !r.repaired) {
        warn!(
            subscription_id = %report.subscription_id,
            subject = ?report.subject,
            kind = ?report.kind,
            severity = %report.severity,
            "Unrepaired billing drift"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting YoCreo Worker");

    let config = Config::from_env()?;
    let settings = WorkerSettings::from_env();

    let store = connect_store(&config).await?;
    let admin = AdminSecret::new(config.api_secret_key.clone())?;
    let billing = Arc::new(BillingService::from_env(store, admin)?);

    let scheduler = JobScheduler::new().await?;

    // Job 1: Compare local subscription rows with Stripe
    let reconcile_billing = billing.clone();
    let auto_repair = settings.auto_repair;
    scheduler
        .add(Job::new_async(
            settings.reconcile_cron.as_str(),
            move |_uuid, _l| {
                let billing = reconcile_billing.clone();
                Box::pin(async move {
                    info!(auto_repair, "Running scheduled billing reconciliation");
                    match billing.reconciliation.run(auto_repair).await {
                        Ok(summary) => log_reconciliation(&summary),
                        Err(e) => error!(error = %e, "Billing reconciliation failed"),
                    }
                })
            },
        )?)
        .await?;
    info!(
        cron = %settings.reconcile_cron,
        auto_repair,
        "Scheduled: Billing reconciliation"
    );

    // Job 2: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("YoCreo Worker started successfully with 2 scheduled jobs");

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
