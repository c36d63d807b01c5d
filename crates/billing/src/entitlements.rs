//! User entitlement records: current tariff, subscription window, usage.
//!
//! Mutated exclusively by successful payment reconciliation and by the
//! expiry sweep; the chat UI and the API gateway only read.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dates::{add_months, end_of_day, start_of_day};
use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    /// Opaque rotateable credential; the API key is derived from it.
    pub token: Uuid,
    pub tariff_id: Uuid,
    pub subscription_start: Option<OffsetDateTime>,
    /// None = perpetual (the free tariff has no window).
    pub subscription_end: Option<OffsetDateTime>,
    pub requests_used: i64,
    pub chat_id: Option<i64>,
    pub expiry_warned: bool,
}

impl User {
    /// Whether the subscription window is still running at `now`. The end
    /// date is end-of-day aligned, so "expires today" is still active.
    pub fn has_active_window(&self, now: OffsetDateTime) -> bool {
        self.subscription_end.map(|end| end >= now).unwrap_or(false)
    }
}

/// What a confirmed payment does to the entitlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Same tariff, window still active: push the end date out, leave the
    /// usage counters untouched.
    Extend { new_end: OffsetDateTime },
    /// Different tariff or no active window: fresh entitlement starting
    /// today, usage reset.
    Activate {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },
}

/// Decide how a paid payment lands on the user's entitlement.
pub fn plan_disposition(
    user: &User,
    payment_tariff: Uuid,
    months: i32,
    now: OffsetDateTime,
) -> Disposition {
    match user.subscription_end {
        Some(end) if user.tariff_id == payment_tariff && end >= now => Disposition::Extend {
            new_end: end_of_day(add_months(end, months)),
        },
        _ => Disposition::Activate {
            start: start_of_day(now),
            end: end_of_day(add_months(now, months)),
        },
    }
}

const USER_COLUMNS: &str = "id, token, tariff_id, subscription_start, subscription_end, \
     requests_used, chat_id, expiry_warned";

#[derive(Clone)]
pub struct EntitlementStore {
    pool: PgPool,
}

impl EntitlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, user_id: i64) -> BillingResult<Option<User>> {
        let user: Option<User> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(user)
    }

    pub async fn require(&self, user_id: i64) -> BillingResult<User> {
        self.get(user_id)
            .await?
            .ok_or(BillingError::UserNotFound(user_id))
    }

    /// Idempotent chat-id backfill for users created before the chat was
    /// known.
    pub async fn ensure_chat_id(&self, user_id: i64, chat_id: i64) -> BillingResult<()> {
        sqlx::query("UPDATE users SET chat_id = $2 WHERE id = $1 AND chat_id IS NULL")
            .bind(user_id)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Apply a settlement disposition in one logical update.
    pub async fn apply_disposition(
        &self,
        user_id: i64,
        payment_tariff: Uuid,
        disposition: &Disposition,
    ) -> BillingResult<()> {
        match disposition {
            Disposition::Extend { new_end } => {
                sqlx::query(
                    "UPDATE users SET subscription_end = $2, expiry_warned = FALSE WHERE id = $1",
                )
                .bind(user_id)
                .bind(new_end)
                .execute(&self.pool)
                .await?;
            }
            Disposition::Activate { start, end } => {
                sqlx::query(
                    r#"
                    UPDATE users
                    SET tariff_id = $2,
                        subscription_start = $3,
                        subscription_end = $4,
                        requests_used = 0,
                        expiry_warned = FALSE
                    WHERE id = $1
                    "#,
                )
                .bind(user_id)
                .bind(payment_tariff)
                .bind(start)
                .bind(end)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    pub async fn set_token(&self, user_id: i64, token: Uuid) -> BillingResult<()> {
        sqlx::query("UPDATE users SET token = $2 WHERE id = $1")
            .bind(user_id)
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Users on a paid tariff whose window has closed.
    pub async fn list_expired(&self) -> BillingResult<Vec<User>> {
        let users: Vec<User> = sqlx::query_as(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users u
            WHERE u.subscription_end IS NOT NULL
              AND u.subscription_end <= NOW()
              AND EXISTS (SELECT 1 FROM tariffs t WHERE t.id = u.tariff_id AND t.price > 0)
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    /// Users on a paid tariff ending within `days` who have not been warned.
    pub async fn list_expiring(&self, days: i32) -> BillingResult<Vec<User>> {
        let users: Vec<User> = sqlx::query_as(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users u
            WHERE u.subscription_end IS NOT NULL
              AND u.subscription_end > NOW()
              AND u.subscription_end <= NOW() + make_interval(days => $1)
              AND NOT u.expiry_warned
              AND EXISTS (SELECT 1 FROM tariffs t WHERE t.id = u.tariff_id AND t.price > 0)
            "#
        ))
        .bind(days)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    /// Expiry downgrade: back to the free tariff, window cleared, usage and
    /// warn flag reset.
    pub async fn downgrade_to_free(&self, user_id: i64, free_tariff: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET tariff_id = $2,
                subscription_start = NULL,
                subscription_end = NULL,
                requests_used = 0,
                expiry_warned = FALSE
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(free_tariff)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn mark_warned(&self, user_id: i64) -> BillingResult<()> {
        sqlx::query("UPDATE users SET expiry_warned = TRUE WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
