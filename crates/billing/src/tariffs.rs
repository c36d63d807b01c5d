//! Tariff reference data.
//!
//! Tariffs are immutable during the lifetime of a payment: the engine reads
//! the price only at creation time, never again at validation time, so a
//! price edit can never leak into in-flight reconciliation.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Sentinel request limit representing "unlimited".
pub const UNLIMITED_REQUESTS: i64 = 1_000_000_000;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tariff {
    pub id: Uuid,
    pub name: String,
    pub requests_limit: i64,
    /// Price per month in whole currency units.
    pub price: i64,
    pub is_hidden: bool,
}

impl Tariff {
    pub fn is_free(&self) -> bool {
        self.price == 0
    }
}

#[derive(Clone)]
pub struct TariffStore {
    pool: PgPool,
}

impl TariffStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> BillingResult<Tariff> {
        let tariff: Option<Tariff> = sqlx::query_as(
            "SELECT id, name, requests_limit, price, is_hidden FROM tariffs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        tariff.ok_or(BillingError::TariffNotFound(id))
    }

    /// The downgrade target for expired subscriptions: the zero-price plan.
    pub async fn free_tariff(&self) -> BillingResult<Tariff> {
        let tariff: Option<Tariff> = sqlx::query_as(
            "SELECT id, name, requests_limit, price, is_hidden FROM tariffs \
             WHERE price = 0 ORDER BY created_at LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        tariff.ok_or_else(|| BillingError::Internal("no free tariff configured".to_string()))
    }
}
