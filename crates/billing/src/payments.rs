//! Payment records and their store.
//!
//! Payments are an append-only audit trail: rows are created PENDING at
//! checkout time, mutated only by the validate path, and never deleted.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use subkassa_shared::{PaymentStatus, PaymentSystem, UnknownPaymentSystem};

/// Freshness window for the pending-payment gate and the scheduler sweep.
pub const PENDING_WINDOW_HOURS: i64 = 24;

const PAYMENT_COLUMNS: &str = "id, order_id, provider_payment_id, user_id, chat_id, tariff_id, \
     payment_system, amount, original_price, discount, month_count, status, is_final, \
     settled_at, grace_used, payment_url, form_html, payer_address, currency, created_at, paid_at";

/// One monetization attempt.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    /// Internally generated, stable correlation key (also the wallet label).
    pub order_id: String,
    /// Assigned by the provider after creation; absent for providers that
    /// identify transactions by our order id.
    pub provider_payment_id: Option<String>,
    pub user_id: i64,
    pub chat_id: Option<i64>,
    pub tariff_id: Uuid,
    pub payment_system: String,
    /// Charged total, post-discount.
    pub amount: i64,
    pub original_price: i64,
    pub discount: i64,
    pub month_count: i32,
    pub status: String,
    pub is_final: bool,
    pub settled_at: Option<OffsetDateTime>,
    /// Whether the one-shot re-check of a canceled payment has been spent.
    pub grace_used: bool,
    pub payment_url: Option<String>,
    pub form_html: Option<String>,
    pub payer_address: Option<String>,
    pub currency: Option<String>,
    pub created_at: OffsetDateTime,
    pub paid_at: Option<OffsetDateTime>,
}

impl Payment {
    pub fn system(&self) -> Result<PaymentSystem, UnknownPaymentSystem> {
        self.payment_system.parse()
    }

    /// Stored status. Unparseable values are treated as PENDING so a bad row
    /// can never flip entitlement one way or the other.
    pub fn status(&self) -> PaymentStatus {
        self.status.parse().unwrap_or(PaymentStatus::Pending)
    }
}

/// Fields of a payment row known before persistence.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: String,
    pub provider_payment_id: Option<String>,
    pub user_id: i64,
    pub chat_id: Option<i64>,
    pub tariff_id: Uuid,
    pub payment_system: PaymentSystem,
    pub amount: i64,
    pub original_price: i64,
    pub discount: i64,
    pub month_count: i32,
    pub payment_url: Option<String>,
    pub form_html: Option<String>,
    pub payer_address: Option<String>,
    pub currency: Option<String>,
}

#[derive(Clone)]
pub struct PaymentStore {
    pool: PgPool,
}

impl PaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, new: NewPayment) -> BillingResult<Payment> {
        let payment: Payment = sqlx::query_as(&format!(
            r#"
            INSERT INTO payments (
                order_id, provider_payment_id, user_id, chat_id, tariff_id,
                payment_system, amount, original_price, discount, month_count,
                status, is_final, payment_url, form_html, payer_address, currency
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', FALSE, $11, $12, $13, $14)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(&new.order_id)
        .bind(&new.provider_payment_id)
        .bind(new.user_id)
        .bind(new.chat_id)
        .bind(new.tariff_id)
        .bind(new.payment_system.as_str())
        .bind(new.amount)
        .bind(new.original_price)
        .bind(new.discount)
        .bind(new.month_count)
        .bind(&new.payment_url)
        .bind(&new.form_html)
        .bind(&new.payer_address)
        .bind(&new.currency)
        .fetch_one(&self.pool)
        .await?;

        Ok(payment)
    }

    /// A live pending payment for the user younger than the freshness window,
    /// if any. This is the coarse idempotency gate of the create path.
    pub async fn find_fresh_pending(&self, user_id: i64) -> BillingResult<Option<Payment>> {
        let payment: Option<Payment> = sqlx::query_as(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS} FROM payments
            WHERE user_id = $1
              AND status = 'pending'
              AND NOT is_final
              AND created_at > NOW() - make_interval(hours => $2)
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .bind(PENDING_WINDOW_HOURS as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    pub async fn find_by_provider_id(&self, provider_id: &str) -> BillingResult<Option<Payment>> {
        let payment: Option<Payment> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider_payment_id = $1"
        ))
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    pub async fn find_by_order_id(&self, order_id: &str) -> BillingResult<Option<Payment>> {
        let payment: Option<Payment> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    /// All payments the scheduler should still be polling.
    pub async fn list_pending(&self) -> BillingResult<Vec<Payment>> {
        let payments: Vec<Payment> = sqlx::query_as(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS} FROM payments
            WHERE status = 'pending'
              AND NOT is_final
              AND created_at > NOW() - make_interval(hours => $1)
            ORDER BY created_at
            "#
        ))
        .bind(PENDING_WINDOW_HOURS as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    /// Clear `is_final` on a canceled payment to allow exactly one more
    /// check, spending the grace marker so it can never be reopened twice.
    /// Returns false if the row was not an unspent final canceled payment.
    pub async fn reopen_canceled(&self, id: Uuid) -> BillingResult<bool> {
        let rows = sqlx::query(
            "UPDATE payments SET is_final = FALSE, grace_used = TRUE \
             WHERE id = $1 AND status = 'canceled' AND is_final AND NOT grace_used",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    /// Atomically claim the right to apply entitlement for this payment.
    ///
    /// Only one caller ever observes `true`; a concurrent validate (poll vs.
    /// webhook, or two scheduler ticks) loses the conditional update and must
    /// skip entitlement application.
    pub async fn claim_settlement(&self, id: Uuid) -> BillingResult<bool> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE payments SET settled_at = NOW()
            WHERE id = $1 AND settled_at IS NULL AND NOT is_final
            RETURNING id
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    /// Hand a settlement claim back after entitlement application failed,
    /// so the next validate can claim again. Final rows are never released.
    pub async fn release_claim(&self, id: Uuid) -> BillingResult<()> {
        sqlx::query("UPDATE payments SET settled_at = NULL WHERE id = $1 AND NOT is_final")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Write a terminal status. PAID also stamps `paid_at`.
    pub async fn finalize(&self, id: Uuid, status: PaymentStatus) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2,
                is_final = TRUE,
                paid_at = CASE WHEN $2 = 'paid' THEN NOW() ELSE paid_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a non-terminal transition. Callers must skip this when the
    /// status did not change to avoid redundant writes under frequent polling.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        is_final: bool,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE payments SET status = $2, is_final = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(is_final)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record the provider-assigned id once it becomes known (wallet
    /// notifications carry it only at settlement time).
    pub async fn set_provider_id(&self, id: Uuid, provider_id: &str) -> BillingResult<()> {
        sqlx::query(
            "UPDATE payments SET provider_payment_id = $2 \
             WHERE id = $1 AND provider_payment_id IS NULL",
        )
        .bind(id)
        .bind(provider_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
