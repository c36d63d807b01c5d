//! The reconciliation engine.
//!
//! Two entry points: `create_payment` (checkout) and `validate_payment`
//! (scheduler poll / webhook settlement). Validation is idempotent against
//! repeated invocation with the same terminal outcome; entitlement is applied
//! at most once per payment via a conditional settlement claim.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use subkassa_shared::{PaymentStatus, PaymentSystem};

use crate::entitlements::{plan_disposition, Disposition, EntitlementStore};
use crate::error::{BillingError, BillingResult};
use crate::notify::{BillingEvent, Notifier};
use crate::payments::{NewPayment, Payment, PaymentStore};
use crate::proration::{price_checkout, CurrentPlan};
use crate::providers::{PaymentRequest, ProviderRegistry, TransactionRef};
use crate::sessions::SessionStore;
use crate::tariffs::TariffStore;
use crate::usage_cache::{plan_resync, UsageCache};

const CURRENCY: &str = "RUB";

/// What to do with a payment entering the validate path, given its stored
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    /// Terminal and settled; never query the provider again.
    AlreadyFinal { is_paid: bool },
    /// CANCELED/final: reopen for exactly one more check.
    GraceRecheck,
    /// Live payment, poll normally.
    Poll,
}

pub(crate) fn resolve_entry(status: PaymentStatus, is_final: bool, grace_used: bool) -> Entry {
    if !is_final {
        return Entry::Poll;
    }
    match status {
        PaymentStatus::Canceled if !grace_used => Entry::GraceRecheck,
        other => Entry::AlreadyFinal {
            is_paid: other == PaymentStatus::Paid,
        },
    }
}

/// Fold a poll result into the stored state machine. An adapter error is
/// "we do not know": the payment stays PENDING and non-final so the next
/// tick retries.
pub(crate) fn poll_outcome(polled: Option<PaymentStatus>) -> (PaymentStatus, bool) {
    match polled {
        Some(status) => (status, status.is_terminal()),
        None => (PaymentStatus::Pending, false),
    }
}

/// What the settlement path does with the claim after the entitlement
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimOutcome {
    /// Claim held and entitlement landed: stamp the payment PAID/final.
    Finalize,
    /// Claim held but entitlement failed: hand the claim back so the next
    /// validate retries, instead of finding it spent and skipping the grant.
    Release,
    /// Claim lost to a concurrent validate; the holder finalizes, never the
    /// loser.
    Defer,
}

pub(crate) fn claim_outcome(claimed: bool, granted: bool) -> ClaimOutcome {
    match (claimed, granted) {
        (false, _) => ClaimOutcome::Defer,
        (true, true) => ClaimOutcome::Finalize,
        (true, false) => ClaimOutcome::Release,
    }
}

/// Checkout parameters as the chat frontend hands them over.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub user_id: i64,
    pub chat_id: Option<i64>,
    pub tariff_id: Uuid,
    pub months: i32,
    pub system: PaymentSystem,
    pub email: Option<String>,
}

pub struct PaymentService {
    payments: PaymentStore,
    tariffs: TariffStore,
    entitlements: EntitlementStore,
    cache: UsageCache,
    sessions: SessionStore,
    providers: Arc<ProviderRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl PaymentService {
    pub fn new(
        payments: PaymentStore,
        tariffs: TariffStore,
        entitlements: EntitlementStore,
        cache: UsageCache,
        sessions: SessionStore,
        providers: Arc<ProviderRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            payments,
            tariffs,
            entitlements,
            cache,
            sessions,
            providers,
            notifier,
        }
    }

    // ------------------------------------------------------------------
    // Create path
    // ------------------------------------------------------------------

    /// Create a payment intent and persist a PENDING payment row.
    ///
    /// No entitlement is granted here; that happens only when validation
    /// confirms the payment.
    pub async fn create_payment(&self, checkout: Checkout) -> BillingResult<Payment> {
        if let Some(existing) = self.payments.find_fresh_pending(checkout.user_id).await? {
            tracing::info!(
                user_id = %checkout.user_id,
                order_id = %existing.order_id,
                "checkout rejected: live pending payment exists"
            );
            return Err(BillingError::PendingPaymentExists(checkout.user_id));
        }

        let user = self.entitlements.require(checkout.user_id).await?;
        if user.chat_id.is_none() {
            if let Some(chat_id) = checkout.chat_id {
                self.entitlements.ensure_chat_id(user.id, chat_id).await?;
            }
        }

        let tariff = self.tariffs.get(checkout.tariff_id).await?;
        if tariff.is_free() {
            return Err(BillingError::DowngradeNotAllowed {
                detail: "the free tariff is not purchasable".to_string(),
            });
        }

        let now = OffsetDateTime::now_utc();
        let current = match user.subscription_end {
            Some(end) if user.has_active_window(now) => {
                let current_tariff = self.tariffs.get(user.tariff_id).await?;
                Some(CurrentPlan {
                    tariff_id: current_tariff.id,
                    price: current_tariff.price,
                    ends_at: end,
                })
            }
            _ => None,
        };

        let price = price_checkout(&tariff, checkout.months, current.as_ref(), now)?;

        let order_id = Uuid::new_v4().to_string();
        let request = PaymentRequest {
            order_id: order_id.clone(),
            amount: price.total,
            currency: CURRENCY,
            description: format!("{} subscription, {} month(s)", tariff.name, checkout.months),
            email: checkout.email.clone(),
        };

        let provider = self.providers.provider(checkout.system);
        let echo = provider.create_payment(&request).await?;

        let payment = self
            .payments
            .insert(NewPayment {
                order_id,
                provider_payment_id: echo.provider_id,
                user_id: checkout.user_id,
                chat_id: checkout.chat_id.or(user.chat_id),
                tariff_id: tariff.id,
                payment_system: checkout.system,
                amount: price.total,
                original_price: price.original_price,
                discount: price.discount,
                month_count: checkout.months,
                payment_url: echo.url,
                form_html: echo.form_html,
                payer_address: echo.payer_address,
                currency: echo.currency,
            })
            .await?;

        // The checkout flow is complete; a stale session must not leak into
        // the next purchase.
        if let Err(e) = self.sessions.clear(checkout.user_id).await {
            tracing::warn!(user_id = %checkout.user_id, error = %e, "session clear failed");
        }

        tracing::info!(
            user_id = %payment.user_id,
            order_id = %payment.order_id,
            payment_system = %payment.payment_system,
            amount = payment.amount,
            discount = payment.discount,
            "payment created"
        );

        Ok(payment)
    }

    // ------------------------------------------------------------------
    // Validate path
    // ------------------------------------------------------------------

    pub async fn validate_by_provider_id(&self, provider_id: &str) -> BillingResult<bool> {
        let payment = self
            .payments
            .find_by_provider_id(provider_id)
            .await?
            .ok_or_else(|| BillingError::PaymentNotFound(provider_id.to_string()))?;
        self.validate_payment(&payment).await
    }

    pub async fn validate_by_order_id(&self, order_id: &str) -> BillingResult<bool> {
        let payment = self
            .payments
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| BillingError::PaymentNotFound(order_id.to_string()))?;
        self.validate_payment(&payment).await
    }

    /// Re-check one payment against its provider and reconcile stores.
    /// Returns whether the payment is (now) PAID.
    pub async fn validate_payment(&self, payment: &Payment) -> BillingResult<bool> {
        match resolve_entry(payment.status(), payment.is_final, payment.grace_used) {
            Entry::AlreadyFinal { is_paid } => return Ok(is_paid),
            Entry::GraceRecheck => {
                // One late-settlement check for canceled payments. Losing the
                // conditional update means another validate spent the check
                // already; the stored state stands.
                if !self.payments.reopen_canceled(payment.id).await? {
                    return Ok(false);
                }
                tracing::info!(order_id = %payment.order_id, "grace re-check of canceled payment");
            }
            Entry::Poll => {}
        }

        let system = payment.system()?;
        let provider = self.providers.provider(system);
        let txn = TransactionRef {
            provider_id: payment.provider_payment_id.as_deref(),
            order_id: &payment.order_id,
        };

        let polled = match provider.validate_transaction(&txn).await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(
                    order_id = %payment.order_id,
                    payment_system = %payment.payment_system,
                    error = %e,
                    "validate poll failed, keeping payment pending"
                );
                None
            }
        };

        let (status, is_final) = poll_outcome(polled);

        if status == PaymentStatus::Paid {
            self.settle(payment).await?;
            return Ok(true);
        }

        if status != payment.status() || is_final != payment.is_final {
            self.payments
                .update_status(payment.id, status, is_final)
                .await?;
            tracing::info!(
                order_id = %payment.order_id,
                status = %status,
                is_final,
                "payment transitioned"
            );

            if is_final {
                self.notify_best_effort(
                    payment.chat_id,
                    BillingEvent::PaymentFailed {
                        order_id: payment.order_id.clone(),
                    },
                )
                .await;
            }
        }

        Ok(false)
    }

    /// Operator confirmation for offline (cash) payments: settle without a
    /// provider poll.
    pub async fn settle_manual(&self, order_id: &str) -> BillingResult<()> {
        let payment = self
            .payments
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| BillingError::PaymentNotFound(order_id.to_string()))?;

        if payment.is_final {
            return Ok(());
        }

        self.settle(&payment).await
    }

    /// Confirmed-payment settlement: entitlement, cache resync, finalize,
    /// notify. Entitlement application is guarded by the settlement claim so
    /// concurrent validates (poll vs. webhook) apply it at most once. The
    /// claim holder alone finalizes; if entitlement fails it releases the
    /// claim so the next validate retries the grant.
    async fn settle(&self, payment: &Payment) -> BillingResult<()> {
        let claimed = self.payments.claim_settlement(payment.id).await?;
        let grant = if claimed {
            self.grant_entitlement(payment).await
        } else {
            Ok(())
        };

        match claim_outcome(claimed, grant.is_ok()) {
            ClaimOutcome::Defer => {
                tracing::info!(
                    order_id = %payment.order_id,
                    "settlement claimed elsewhere, deferring to the claim holder"
                );
                Ok(())
            }
            ClaimOutcome::Release => {
                if let Err(e) = self.payments.release_claim(payment.id).await {
                    tracing::error!(
                        order_id = %payment.order_id,
                        error = %e,
                        "claim release failed, payment needs operator review"
                    );
                }
                grant
            }
            ClaimOutcome::Finalize => {
                self.payments.finalize(payment.id, PaymentStatus::Paid).await?;
                tracing::info!(
                    user_id = %payment.user_id,
                    order_id = %payment.order_id,
                    amount = payment.amount,
                    "payment settled"
                );
                Ok(())
            }
        }
    }

    /// The claimed half of settlement: apply the entitlement disposition,
    /// resync the usage cache, and notify the user.
    async fn grant_entitlement(&self, payment: &Payment) -> BillingResult<()> {
        let user = self.entitlements.require(payment.user_id).await?;
        let tariff_changed = user.tariff_id != payment.tariff_id;

        // Read the gateway's view of remaining quota before invalidating;
        // the soft resync below needs it.
        let prior_remaining = match self.cache.read_remaining(user.token).await {
            Ok(remaining) => remaining,
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "quota read failed");
                None
            }
        };
        if let Err(e) = self.cache.invalidate(user.token).await {
            tracing::warn!(user_id = %user.id, error = %e, "quota invalidation failed");
        }

        let now = OffsetDateTime::now_utc();
        let disposition = plan_disposition(&user, payment.tariff_id, payment.month_count, now);
        self.entitlements
            .apply_disposition(user.id, payment.tariff_id, &disposition)
            .await?;

        let tariff = self.tariffs.get(payment.tariff_id).await?;
        if let Some(limit) = plan_resync(tariff_changed, prior_remaining, tariff.requests_limit) {
            if let Err(e) = self.cache.force_set(user.token, limit).await {
                tracing::warn!(user_id = %user.id, error = %e, "quota resync failed");
            }
        }

        let active_until = match disposition {
            Disposition::Extend { new_end } => new_end,
            Disposition::Activate { end, .. } => end,
        };
        self.notify_best_effort(
            payment.chat_id.or(user.chat_id),
            BillingEvent::PaymentConfirmed {
                tariff_name: tariff.name,
                active_until,
            },
        )
        .await;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Token rotation
    // ------------------------------------------------------------------

    /// Issue a fresh credential and carry the cached quota across so the
    /// rotation does not grant a fresh allowance.
    pub async fn rotate_token(&self, user_id: i64) -> BillingResult<Uuid> {
        let user = self.entitlements.require(user_id).await?;
        let new_token = Uuid::new_v4();

        self.entitlements.set_token(user_id, new_token).await?;
        if let Err(e) = self.cache.transfer(user.token, new_token).await {
            tracing::warn!(user_id = %user_id, error = %e, "quota transfer failed");
        }

        tracing::info!(user_id = %user_id, "token rotated");
        Ok(new_token)
    }

    async fn notify_best_effort(&self, chat_id: Option<i64>, event: BillingEvent) {
        let Some(chat_id) = chat_id else { return };
        if let Err(e) = self.notifier.notify(chat_id, event).await {
            tracing::warn!(chat_id = %chat_id, error = %e, "notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_payments_are_polled() {
        assert_eq!(resolve_entry(PaymentStatus::Pending, false, false), Entry::Poll);
        assert_eq!(resolve_entry(PaymentStatus::Canceled, false, true), Entry::Poll);
    }

    #[test]
    fn paid_final_short_circuits_true() {
        assert_eq!(
            resolve_entry(PaymentStatus::Paid, true, false),
            Entry::AlreadyFinal { is_paid: true }
        );
    }

    #[test]
    fn failed_final_short_circuits_false() {
        assert_eq!(
            resolve_entry(PaymentStatus::Failed, true, false),
            Entry::AlreadyFinal { is_paid: false }
        );
    }

    #[test]
    fn canceled_final_gets_one_grace_recheck() {
        assert_eq!(
            resolve_entry(PaymentStatus::Canceled, true, false),
            Entry::GraceRecheck
        );
    }

    #[test]
    fn spent_grace_recheck_never_reopens() {
        assert_eq!(
            resolve_entry(PaymentStatus::Canceled, true, true),
            Entry::AlreadyFinal { is_paid: false }
        );
    }

    #[test]
    fn adapter_error_folds_to_pending_nonfinal() {
        assert_eq!(poll_outcome(None), (PaymentStatus::Pending, false));
    }

    #[test]
    fn entitlement_failure_releases_the_claim() {
        // A transient store error after a won claim must give the claim back;
        // otherwise the next sweep would find it spent, skip the grant, and
        // the user would pay without receiving the subscription.
        assert_eq!(claim_outcome(true, false), ClaimOutcome::Release);
    }

    #[test]
    fn lost_claim_never_finalizes() {
        // Only the claim holder finalizes. If the loser stamped the row
        // final, a holder that later failed could no longer release its
        // claim for a retry.
        assert_eq!(claim_outcome(false, true), ClaimOutcome::Defer);
        assert_eq!(claim_outcome(false, false), ClaimOutcome::Defer);
    }

    #[test]
    fn granted_claim_finalizes() {
        assert_eq!(claim_outcome(true, true), ClaimOutcome::Finalize);
    }

    #[test]
    fn terminal_polls_become_final() {
        assert_eq!(poll_outcome(Some(PaymentStatus::Paid)), (PaymentStatus::Paid, true));
        assert_eq!(
            poll_outcome(Some(PaymentStatus::Canceled)),
            (PaymentStatus::Canceled, true)
        );
        assert_eq!(
            poll_outcome(Some(PaymentStatus::Pending)),
            (PaymentStatus::Pending, false)
        );
    }
}
