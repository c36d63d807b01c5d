//! Bank-card acquirer B.
//!
//! JSON init/state API with a hosted payment page. Statuses are uppercase
//! words. Shares the same retry schedule as acquirer A.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use subkassa_shared::PaymentStatus;

use super::{
    PaymentProvider, PaymentRequest, ProviderError, ProviderPaymentRef, RetryPolicy,
    TransactionRef,
};

#[derive(Debug, Clone)]
pub struct CardBConfig {
    pub base_url: String,
    pub terminal_key: String,
}

impl CardBConfig {
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: std::env::var("CARD_B_API_URL")
                .unwrap_or_else(|_| "https://acquiring-b.example/v2".to_string()),
            terminal_key: std::env::var("CARD_B_TERMINAL_KEY").unwrap_or_default(),
        })
    }
}

pub struct CardBProvider {
    config: CardBConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct InitResponse {
    #[serde(rename = "PaymentId")]
    payment_id: String,
    #[serde(rename = "PaymentURL", default)]
    payment_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    #[serde(rename = "Status")]
    status: String,
}

impl CardBProvider {
    pub fn new(config: CardBConfig) -> Result<Self, ProviderError> {
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
        Self::new(CardBConfig::from_env()?)
    }

    fn map_status(native: &str) -> PaymentStatus {
        match native {
            "CONFIRMED" => PaymentStatus::Paid,
            "NEW" | "FORM_SHOWED" | "AUTHORIZING" | "AUTHORIZED" => PaymentStatus::Pending,
            "REJECTED" | "AUTH_FAIL" => PaymentStatus::Failed,
            "CANCELED" | "REVERSED" | "REFUNDED" | "DEADLINE_EXPIRED" => PaymentStatus::Canceled,
            _ => PaymentStatus::Pending,
        }
    }

    async fn init_once(&self, request: &PaymentRequest) -> Result<InitResponse, ProviderError> {
        let url = format!("{}/Init", self.config.base_url);
        let body = serde_json::json!({
            "TerminalKey": self.config.terminal_key,
            "Amount": request.amount * 100,
            "OrderId": request.order_id,
            "Description": request.description,
            "DATA": { "Email": request.email },
        });

        let response = self.client.post(&url).json(&body).send().await?;

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

    async fn state_once(&self, provider_id: &str) -> Result<StateResponse, ProviderError> {
        let url = format!("{}/GetState", self.config.base_url);
        let body = serde_json::json!({
            "TerminalKey": self.config.terminal_key,
            "PaymentId": provider_id,
        });

        let response = self.client.post(&url).json(&body).send().await?;

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
impl PaymentProvider for CardBProvider {
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<ProviderPaymentRef, ProviderError> {
        let init = self.retry.run(|| self.init_once(request)).await?;

        Ok(ProviderPaymentRef {
            provider_id: Some(init.payment_id),
            url: init.payment_url,
            form_html: None,
            payer_address: None,
            currency: Some(request.currency.to_string()),
        })
    }

    async fn validate_transaction(
        &self,
        txn: &TransactionRef<'_>,
    ) -> Result<PaymentStatus, ProviderError> {
        let provider_id = txn.provider_id.ok_or(ProviderError::MissingTransactionId)?;
        let state = self.retry.run(|| self.state_once(provider_id)).await?;
        Ok(Self::map_status(&state.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(CardBProvider::map_status("CONFIRMED"), PaymentStatus::Paid);
        assert_eq!(CardBProvider::map_status("NEW"), PaymentStatus::Pending);
        assert_eq!(
            CardBProvider::map_status("AUTHORIZED"),
            PaymentStatus::Pending
        );
        assert_eq!(CardBProvider::map_status("REJECTED"), PaymentStatus::Failed);
        assert_eq!(
            CardBProvider::map_status("REFUNDED"),
            PaymentStatus::Canceled
        );
        assert_eq!(
            CardBProvider::map_status("3DS_CHECKING"),
            PaymentStatus::Pending
        );
    }
}
