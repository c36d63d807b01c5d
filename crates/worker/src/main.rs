//! Subkassa Background Worker
//!
//! Handles scheduled jobs including:
//! - Pending payment reconciliation sweep (every 10 seconds)
//! - Subscription expiry sweep (daily at 0:05 UTC)
//! - Expiry warning sweep (daily at 0:10 UTC)

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use subkassa_billing::{BillingEvent, BillingService, LogNotifier, Notifier, UsageCache};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// How far ahead the warning sweep looks.
const WARN_AHEAD_DAYS: i32 = 2;

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// One reconciliation tick: poll every live pending payment sequentially.
/// A failure on one payment never aborts the sweep over the rest.
async fn run_pending_sweep(billing: &BillingService) {
    let payments = match billing.payments.list_pending().await {
        Ok(payments) => payments,
        Err(e) => {
            error!(error = %e, "Failed to list pending payments");
            return;
        }
    };

    if payments.is_empty() {
        return;
    }

    let total = payments.len();
    let mut settled = 0;
    let mut errors = 0;

    for payment in payments {
        match billing.engine.validate_payment(&payment).await {
            Ok(true) => settled += 1,
            Ok(false) => {}
            Err(e) => {
                error!(order_id = %payment.order_id, error = %e, "Failed to validate payment");
                errors += 1;
            }
        }
    }

    info!(total, settled, errors, "Pending payment sweep complete");
}

/// Downgrade users whose paid subscription window has closed.
async fn run_expiry_sweep(billing: &BillingService, notifier: &dyn Notifier) {
    let free = match billing.tariffs.free_tariff().await {
        Ok(free) => free,
        Err(e) => {
            error!(error = %e, "Failed to resolve free tariff");
            return;
        }
    };

    let expired = match billing.entitlements.list_expired().await {
        Ok(users) => users,
        Err(e) => {
            error!(error = %e, "Failed to list expired subscriptions");
            return;
        }
    };

    let total = expired.len();
    let mut downgraded = 0;
    let mut errors = 0;

    for user in expired {
        let old_tariff_name = billing
            .tariffs
            .get(user.tariff_id)
            .await
            .map(|t| t.name)
            .unwrap_or_else(|_| "unknown".to_string());

        match billing.entitlements.downgrade_to_free(user.id, free.id).await {
            Ok(()) => {
                downgraded += 1;
                // The free tariff is a fresh entitlement; hand the gateway its
                // limit directly rather than waiting for a cache miss.
                resync_quota(&billing.cache, user.token, free.requests_limit).await;

                if let Some(chat_id) = user.chat_id {
                    if let Err(e) = notifier
                        .notify(
                            chat_id,
                            BillingEvent::SubscriptionExpired {
                                tariff_name: old_tariff_name,
                            },
                        )
                        .await
                    {
                        warn!(user_id = %user.id, error = %e, "Expiry notification failed");
                    }
                }
            }
            Err(e) => {
                error!(user_id = %user.id, error = %e, "Failed to downgrade expired user");
                errors += 1;
            }
        }
    }

    info!(total, downgraded, errors, "Expiry sweep complete");
}

async fn resync_quota(cache: &UsageCache, token: uuid::Uuid, limit: i64) {
    if let Err(e) = cache.force_set(token, limit).await {
        warn!(error = %e, "Quota resync failed, cache will self-heal on next miss");
    }
}

/// Warn users whose paid subscription ends within the lookahead window.
async fn run_warning_sweep(billing: &BillingService, notifier: &dyn Notifier) {
    let expiring = match billing.entitlements.list_expiring(WARN_AHEAD_DAYS).await {
        Ok(users) => users,
        Err(e) => {
            error!(error = %e, "Failed to list expiring subscriptions");
            return;
        }
    };

    let total = expiring.len();
    let mut warned = 0;

    for user in expiring {
        let Some(ends_at) = user.subscription_end else {
            continue;
        };
        let tariff_name = billing
            .tariffs
            .get(user.tariff_id)
            .await
            .map(|t| t.name)
            .unwrap_or_else(|_| "unknown".to_string());

        if let Some(chat_id) = user.chat_id {
            if let Err(e) = notifier
                .notify(
                    chat_id,
                    BillingEvent::ExpiryWarning {
                        tariff_name,
                        ends_at,
                    },
                )
                .await
            {
                warn!(user_id = %user.id, error = %e, "Warning notification failed");
                continue;
            }
        }

        // Mark only after a successful (or skipped) delivery so a transport
        // outage retries tomorrow.
        match billing.entitlements.mark_warned(user.id).await {
            Ok(()) => warned += 1,
            Err(e) => error!(user_id = %user.id, error = %e, "Failed to mark user warned"),
        }
    }

    info!(total, warned, "Expiry warning sweep complete");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Subkassa Worker");

    let pool = create_db_pool().await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;

    let redis_url = std::env::var("REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let redis_client = redis::Client::open(redis_url.as_str())?;
    let redis = redis::aio::ConnectionManager::new(redis_client).await?;
    info!("Redis connection established");

    let billing = Arc::new(BillingService::from_env(pool, redis)?);
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let scheduler = JobScheduler::new().await?;

    // Job 1: Pending payment reconciliation (every 10 seconds)
    let sweep_billing = billing.clone();
    scheduler
        .add(Job::new_async("*/10 * * * * *", move |_uuid, _l| {
            let billing = sweep_billing.clone();
            Box::pin(async move {
                run_pending_sweep(&billing).await;
            })
        })?)
        .await?;
    info!("Scheduled: Pending payment sweep (every 10 seconds)");

    // Job 2: Subscription expiry sweep (daily at 0:05 UTC)
    let expiry_billing = billing.clone();
    let expiry_notifier = notifier.clone();
    scheduler
        .add(Job::new_async("0 5 0 * * *", move |_uuid, _l| {
            let billing = expiry_billing.clone();
            let notifier = expiry_notifier.clone();
            Box::pin(async move {
                info!("Running subscription expiry sweep");
                run_expiry_sweep(&billing, notifier.as_ref()).await;
            })
        })?)
        .await?;
    info!("Scheduled: Subscription expiry sweep (daily at 0:05 UTC)");

    // Job 3: Expiry warning sweep (daily at 0:10 UTC)
    let warn_billing = billing.clone();
    let warn_notifier = notifier.clone();
    scheduler
        .add(Job::new_async("0 10 0 * * *", move |_uuid, _l| {
            let billing = warn_billing.clone();
            let notifier = warn_notifier.clone();
            Box::pin(async move {
                info!("Running expiry warning sweep");
                run_warning_sweep(&billing, notifier.as_ref()).await;
            })
        })?)
        .await?;
    info!("Scheduled: Expiry warning sweep (daily at 0:10 UTC)");

    scheduler.start().await?;
    info!("Worker started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down worker");

    Ok(())
}
