//! Crypto invoice processor adapter.
//!
//! JSON API: `POST /invoice/create` returns an invoice id plus a hosted pay
//! link; `GET /invoice/info` reports the invoice status.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use subkassa_shared::PaymentStatus;

use super::{PaymentProvider, PaymentRequest, ProviderError, ProviderPaymentRef, TransactionRef};

#[derive(Debug, Clone)]
pub struct CryptoConfig {
    pub base_url: String,
    pub api_key: String,
    pub shop_id: String,
}

impl CryptoConfig {
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: std::env::var("CRYPTO_API_URL")
                .unwrap_or_else(|_| "https://api.cryptopay.example".to_string()),
            api_key: std::env::var("CRYPTO_API_KEY").unwrap_or_default(),
            shop_id: std::env::var("CRYPTO_SHOP_ID").unwrap_or_default(),
        })
    }
}

pub struct CryptoProvider {
    config: CryptoConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CreateInvoiceResponse {
    uuid: String,
    link: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceInfoResponse {
    status: String,
}

impl CryptoProvider {
    pub fn new(config: CryptoConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(CryptoConfig::from_env()?)
    }

    /// Native invoice statuses. Anything unrecognized stays PENDING.
    fn map_status(native: &str) -> PaymentStatus {
        match native {
            "paid" | "overpaid" => PaymentStatus::Paid,
            "created" | "partial" => PaymentStatus::Pending,
            "canceled" | "expired" => PaymentStatus::Canceled,
            _ => PaymentStatus::Pending,
        }
    }
}

#[async_trait]
impl PaymentProvider for CryptoProvider {
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<ProviderPaymentRef, ProviderError> {
        let url = format!("{}/invoice/create", self.config.base_url);
        let body = serde_json::json!({
            "shop_id": self.config.shop_id,
            "amount": request.amount,
            "currency": request.currency,
            "order_id": request.order_id,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                code: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let invoice: CreateInvoiceResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok(ProviderPaymentRef {
            provider_id: Some(invoice.uuid),
            url: Some(invoice.link),
            form_html: None,
            payer_address: invoice.address,
            currency: invoice.currency,
        })
    }

    async fn validate_transaction(
        &self,
        txn: &TransactionRef<'_>,
    ) -> Result<PaymentStatus, ProviderError> {
        let invoice_id = txn.provider_id.ok_or(ProviderError::MissingTransactionId)?;

        let url = format!("{}/invoice/info", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .query(&[("uuid", invoice_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                code: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let info: InvoiceInfoResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok(Self::map_status(&info.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_conservative() {
        assert_eq!(CryptoProvider::map_status("paid"), PaymentStatus::Paid);
        assert_eq!(CryptoProvider::map_status("overpaid"), PaymentStatus::Paid);
        assert_eq!(
            CryptoProvider::map_status("expired"),
            PaymentStatus::Canceled
        );
        assert_eq!(
            CryptoProvider::map_status("created"),
            PaymentStatus::Pending
        );
        // Unknown vocabulary must never create or destroy entitlement.
        assert_eq!(
            CryptoProvider::map_status("settling_v2"),
            PaymentStatus::Pending
        );
    }
}
