//! Cash / manual settlement.
//!
//! No upstream API exists: an operator confirms receipt out of band and the
//! engine's manual settlement path finalizes the payment. From the adapter's
//! point of view a cash payment is pending until then.

use async_trait::async_trait;
use subkassa_shared::PaymentStatus;

use super::{PaymentProvider, PaymentRequest, ProviderError, ProviderPaymentRef, TransactionRef};

#[derive(Default)]
pub struct CashProvider;

impl CashProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentProvider for CashProvider {
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<ProviderPaymentRef, ProviderError> {
        tracing::info!(
            order_id = %request.order_id,
            amount = request.amount,
            "Cash payment registered, awaiting operator confirmation"
        );

        Ok(ProviderPaymentRef {
            provider_id: Some(request.order_id.clone()),
            currency: Some(request.currency.to_string()),
            ..ProviderPaymentRef::default()
        })
    }

    async fn validate_transaction(
        &self,
        _txn: &TransactionRef<'_>,
    ) -> Result<PaymentStatus, ProviderError> {
        Ok(PaymentStatus::Pending)
    }
}
