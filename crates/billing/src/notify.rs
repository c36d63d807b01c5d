//! Outbound user notifications.
//!
//! Delivery is best-effort: reconciliation never fails because a message
//! could not be sent. Callers warn-log errors and move on.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::BillingResult;

#[derive(Debug, Clone)]
pub enum BillingEvent {
    PaymentConfirmed {
        tariff_name: String,
        active_until: OffsetDateTime,
    },
    PaymentFailed {
        order_id: String,
    },
    SubscriptionExpired {
        tariff_name: String,
    },
    ExpiryWarning {
        tariff_name: String,
        ends_at: OffsetDateTime,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, chat_id: i64, event: BillingEvent) -> BillingResult<()>;
}

/// Stand-in transport that records events in the log. The chat frontend
/// swaps in its own implementation.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, chat_id: i64, event: BillingEvent) -> BillingResult<()> {
        tracing::info!(chat_id = %chat_id, event = ?event, "billing notification");
        Ok(())
    }
}
