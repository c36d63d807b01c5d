//! Bank-card acquirer A.
//!
//! Registers an order and receives back an HTML payment form blob which is
//! persisted and served to the user verbatim. Order state is a numeric code.
//! Outbound calls are retried on transient failures; exhausted retries
//! propagate as an error, never as a FAILED status.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use subkassa_shared::PaymentStatus;

use super::{
    PaymentProvider, PaymentRequest, ProviderError, ProviderPaymentRef, RetryPolicy,
    TransactionRef,
};

#[derive(Debug, Clone)]
pub struct CardAConfig {
    pub base_url: String,
    pub merchant_login: String,
    pub merchant_password: String,
}

impl CardAConfig {
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: std::env::var("CARD_A_API_URL")
                .unwrap_or_else(|_| "https://acquiring-a.example/payment/rest".to_string()),
            merchant_login: std::env::var("CARD_A_LOGIN").unwrap_or_default(),
            merchant_password: std::env::var("CARD_A_PASSWORD").unwrap_or_default(),
        })
    }
}

pub struct CardAProvider {
    config: CardAConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "formHtml", default)]
    form_html: Option<String>,
    #[serde(rename = "formUrl", default)]
    form_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderStatusResponse {
    #[serde(rename = "orderStatus")]
    order_status: i32,
}

impl CardAProvider {
    pub fn new(config: CardAConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            config,
            client,
            retry: RetryPolicy::standard(),
        })
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(CardAConfig::from_env()?)
    }

    /// Numeric order states: 0 registered, 1 pre-authorized, 2 deposited,
    /// 3 authorization reversed, 4 refunded, 6 declined. Unknown codes stay
    /// PENDING.
    fn map_status(code: i32) -> PaymentStatus {
        match code {
            2 => PaymentStatus::Paid,
            0 | 1 => PaymentStatus::Pending,
            3 | 4 => PaymentStatus::Canceled,
            6 => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    async fn register_once(
        &self,
        request: &PaymentRequest,
    ) -> Result<RegisterResponse, ProviderError> {
        let url = format!("{}/register.do", self.config.base_url);
        let amount_minor = (request.amount * 100).to_string();
        let response = self
            .client
            .post(&url)
            .form(&[
                ("userName", self.config.merchant_login.as_str()),
                ("password", self.config.merchant_password.as_str()),
                ("orderNumber", request.order_id.as_str()),
                ("amount", amount_minor.as_str()),
                ("description", request.description.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                code: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    async fn status_once(&self, provider_id: &str) -> Result<OrderStatusResponse, ProviderError> {
        let url = format!("{}/getOrderStatus.do", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("userName", self.config.merchant_login.as_str()),
                ("password", self.config.merchant_password.as_str()),
                ("orderId", provider_id),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                code: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl PaymentProvider for CardAProvider {
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<ProviderPaymentRef, ProviderError> {
        let registered = self.retry.run(|| self.register_once(request)).await?;

        Ok(ProviderPaymentRef {
            provider_id: Some(registered.order_id),
            url: registered.form_url,
            form_html: registered.form_html,
            payer_address: None,
            currency: Some(request.currency.to_string()),
        })
    }

    async fn validate_transaction(
        &self,
        txn: &TransactionRef<'_>,
    ) -> Result<PaymentStatus, ProviderError> {
        let provider_id = txn.provider_id.ok_or(ProviderError::MissingTransactionId)?;
        let status = self.retry.run(|| self.status_once(provider_id)).await?;
        Ok(Self::map_status(status.order_status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_known_codes() {
        assert_eq!(CardAProvider::map_status(2), PaymentStatus::Paid);
        assert_eq!(CardAProvider::map_status(0), PaymentStatus::Pending);
        assert_eq!(CardAProvider::map_status(1), PaymentStatus::Pending);
        assert_eq!(CardAProvider::map_status(3), PaymentStatus::Canceled);
        assert_eq!(CardAProvider::map_status(4), PaymentStatus::Canceled);
        assert_eq!(CardAProvider::map_status(6), PaymentStatus::Failed);
    }

    #[test]
    fn unknown_codes_stay_pending() {
        assert_eq!(CardAProvider::map_status(99), PaymentStatus::Pending);
        assert_eq!(CardAProvider::map_status(-1), PaymentStatus::Pending);
    }
}
