//! Billing error types.

use crate::providers::ProviderError;
use subkassa_shared::UnknownPaymentSystem;

/// Result alias used throughout the billing crate.
pub type BillingResult<T> = Result<T, BillingError>;

/// Error taxonomy of the reconciliation engine.
///
/// Domain errors propagate to the caller for user messaging and are never
/// retried automatically. Adapter errors are transient infrastructure
/// failures: propagated at creation time, swallowed into a PENDING outcome at
/// validation time. Cache errors never block settlement of a payment.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    // --- Domain errors (expected, user-facing) ---
    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Tariff not found: {0}")]
    TariffNotFound(uuid::Uuid),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("User {0} already has a pending payment")]
    PendingPaymentExists(i64),

    #[error("Downgrade not allowed: {detail}")]
    DowngradeNotAllowed { detail: String },

    #[error("Invalid month count: {0}")]
    InvalidMonthCount(i32),

    #[error(transparent)]
    UnsupportedPaymentSystem(#[from] UnknownPaymentSystem),

    // --- Infrastructure errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    // --- Webhook trust errors ---
    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook field cross-check failed: {0}")]
    WebhookMismatch(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether this error should be shown to the end user as-is.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            BillingError::UserNotFound(_)
                | BillingError::TariffNotFound(_)
                | BillingError::PaymentNotFound(_)
                | BillingError::PendingPaymentExists(_)
                | BillingError::DowngradeNotAllowed { .. }
                | BillingError::InvalidMonthCount(_)
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<redis::RedisError> for BillingError {
    fn from(e: redis::RedisError) -> Self {
        BillingError::Cache(e.to_string())
    }
}
