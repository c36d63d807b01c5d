//! E-wallet adapter.
//!
//! The wallet settles via asynchronous webhook notifications rather than
//! polling, so `create_payment` only builds the hosted quickpay URL (no
//! upstream call, the wallet assigns its operation id at settlement time) and
//! `validate_transaction` looks operations up by label — our order id.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use subkassa_shared::PaymentStatus;

use super::{PaymentProvider, PaymentRequest, ProviderError, ProviderPaymentRef, TransactionRef};

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub base_url: String,
    pub access_token: String,
    /// Wallet account that receives the funds.
    pub receiver: String,
    /// Shared secret for notification signatures.
    pub notification_secret: String,
}

impl WalletConfig {
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: std::env::var("WALLET_API_URL")
                .unwrap_or_else(|_| "https://wallet.example/api".to_string()),
            access_token: std::env::var("WALLET_ACCESS_TOKEN").unwrap_or_default(),
            receiver: std::env::var("WALLET_RECEIVER").unwrap_or_default(),
            notification_secret: std::env::var("WALLET_NOTIFICATION_SECRET").unwrap_or_default(),
        })
    }
}

pub struct WalletProvider {
    config: WalletConfig,
    client: reqwest::Client,
}

/// Operation details as returned by the wallet API. The webhook handler
/// cross-checks these against the notification before trusting it.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletOperation {
    pub operation_id: String,
    pub status: String,
    pub amount: f64,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationHistory {
    #[serde(default)]
    operations: Vec<WalletOperation>,
}

impl WalletProvider {
    pub fn new(config: WalletConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(WalletConfig::from_env()?)
    }

    pub fn notification_secret(&self) -> &str {
        &self.config.notification_secret
    }

    fn map_status(native: &str) -> PaymentStatus {
        match native {
            "success" => PaymentStatus::Paid,
            "refused" => PaymentStatus::Failed,
            "in_progress" => PaymentStatus::Pending,
            _ => PaymentStatus::Pending,
        }
    }

    /// Fetch full operation details by the wallet's operation id. Used by
    /// the webhook handler for the mandatory cross-check.
    pub async fn operation_details(
        &self,
        operation_id: &str,
    ) -> Result<WalletOperation, ProviderError> {
        let url = format!("{}/operation-details", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .form(&[("operation_id", operation_id)])
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

    /// Find the most recent incoming operation carrying our label.
    async fn operation_by_label(
        &self,
        label: &str,
    ) -> Result<Option<WalletOperation>, ProviderError> {
        let url = format!("{}/operation-history", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .form(&[("label", label), ("records", "5")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                code: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let history: OperationHistory = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok(history
            .operations
            .into_iter()
            .find(|op| op.label.as_deref() == Some(label)))
    }
}

#[async_trait]
impl PaymentProvider for WalletProvider {
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<ProviderPaymentRef, ProviderError> {
        // Hosted quickpay form; the label ties the incoming transfer back to
        // our payment row.
        let url = format!(
            "{}/quickpay?receiver={}&quickpay-form=shop&targets={}&sum={}&label={}",
            self.config.base_url,
            self.config.receiver,
            urlencoding::encode(&request.description),
            request.amount,
            request.order_id,
        );

        Ok(ProviderPaymentRef {
            provider_id: None,
            url: Some(url),
            form_html: None,
            payer_address: None,
            currency: Some(request.currency.to_string()),
        })
    }

    async fn validate_transaction(
        &self,
        txn: &TransactionRef<'_>,
    ) -> Result<PaymentStatus, ProviderError> {
        match self.operation_by_label(txn.order_id).await? {
            Some(op) => Ok(Self::map_status(&op.status)),
            // No operation yet: the transfer has not happened.
            None => Ok(PaymentStatus::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(WalletProvider::map_status("success"), PaymentStatus::Paid);
        assert_eq!(WalletProvider::map_status("refused"), PaymentStatus::Failed);
        assert_eq!(
            WalletProvider::map_status("in_progress"),
            PaymentStatus::Pending
        );
        assert_eq!(
            WalletProvider::map_status("hold_v3"),
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn quickpay_url_escapes_the_target() {
        #![allow(clippy::unwrap_used)]

        let provider = WalletProvider::new(WalletConfig {
            base_url: "https://wallet.example/api".to_string(),
            access_token: String::new(),
            receiver: "41001000040".to_string(),
            notification_secret: String::new(),
        })
        .unwrap();

        let echo = provider
            .create_payment(&PaymentRequest {
                order_id: "order-1".to_string(),
                amount: 300,
                currency: "RUB",
                description: "plan A subscription, 1 month(s)".to_string(),
                email: None,
            })
            .await
            .unwrap();

        let url = echo.url.unwrap();
        assert!(url.contains("targets=plan%20A%20subscription%2C%201%20month%28s%29"));
        assert!(url.contains("label=order-1"));
    }
}
