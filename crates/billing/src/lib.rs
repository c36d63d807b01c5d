// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::result_large_err)] // BillingError carries provider response bodies
#![allow(clippy::too_many_arguments)] // Service constructors wire every collaborator explicitly
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Subkassa Billing Module
//!
//! Multi-provider payment reconciliation for the subscription bot.
//!
//! ## Features
//!
//! - **Provider Adapters**: crypto processor, e-wallet, two card acquirers, cash
//! - **Reconciliation Engine**: checkout with proration, idempotent validation
//! - **Entitlements**: tariff, subscription window, usage counters
//! - **Usage Cache**: Redis request quota keyed by the derived API credential
//! - **Checkout Sessions**: short-lived plan selection state
//! - **Webhooks**: signed wallet notifications with operation cross-check

pub mod dates;
pub mod entitlements;
pub mod error;
pub mod notify;
pub mod payments;
pub mod proration;
pub mod providers;
pub mod reconcile;
pub mod sessions;
pub mod tariffs;
pub mod usage_cache;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Error
pub use error::{BillingError, BillingResult};

// Stores
pub use entitlements::{plan_disposition, Disposition, EntitlementStore, User};
pub use payments::{NewPayment, Payment, PaymentStore, PENDING_WINDOW_HOURS};
pub use tariffs::{Tariff, TariffStore, UNLIMITED_REQUESTS};

// Pricing
pub use proration::{price_checkout, CheckoutPrice, CurrentPlan};

// Providers
pub use providers::{
    PaymentProvider, PaymentRequest, ProviderError, ProviderPaymentRef, ProviderRegistry,
    RetryPolicy, TransactionRef,
};

// Engine
pub use reconcile::{Checkout, PaymentService};

// Cache and sessions
pub use sessions::{CheckoutSession, SessionStore};
pub use usage_cache::{plan_resync, UsageCache};

// Notifications
pub use notify::{BillingEvent, LogNotifier, Notifier};

// Webhooks
pub use webhooks::WalletNotification;

use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

/// Main billing service combining the engine with its collaborators.
pub struct BillingService {
    pub engine: PaymentService,
    pub sessions: SessionStore,
    pub cache: UsageCache,
    pub tariffs: TariffStore,
    pub entitlements: EntitlementStore,
    pub payments: PaymentStore,
    pub providers: Arc<ProviderRegistry>,
}

impl BillingService {
    /// Build every provider adapter from environment variables.
    pub fn from_env(pool: PgPool, redis: ConnectionManager) -> BillingResult<Self> {
        let providers = Arc::new(ProviderRegistry::from_env()?);
        Ok(Self::new(pool, redis, providers, Arc::new(LogNotifier)))
    }

    pub fn new(
        pool: PgPool,
        redis: ConnectionManager,
        providers: Arc<ProviderRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let payments = PaymentStore::new(pool.clone());
        let tariffs = TariffStore::new(pool.clone());
        let entitlements = EntitlementStore::new(pool);
        let cache = UsageCache::new(redis.clone());
        let sessions = SessionStore::new(redis);

        let engine = PaymentService::new(
            payments.clone(),
            tariffs.clone(),
            entitlements.clone(),
            cache.clone(),
            sessions.clone(),
            providers.clone(),
            notifier,
        );

        Self {
            engine,
            sessions,
            cache,
            tariffs,
            entitlements,
            payments,
            providers,
        }
    }
}
