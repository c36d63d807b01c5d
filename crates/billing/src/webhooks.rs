//! Inbound wallet payment notifications.
//!
//! The wallet pushes a JSON notification when a transfer lands.
//! Trust is established in two steps: the sha1 signature over a fixed
//! field concatenation, then a cross-check of the notification fields
//! against the operation details fetched from the wallet API. Only after
//! both pass does the payment enter normal reconciliation.

use serde::Deserialize;
use sha1::{Digest, Sha1};

use crate::error::{BillingError, BillingResult};
use crate::providers::wallet::WalletOperation;

#[derive(Debug, Clone, Deserialize)]
pub struct WalletNotification {
    pub notification_type: String,
    pub operation_id: String,
    pub amount: String,
    pub currency: String,
    pub datetime: String,
    pub sender: String,
    /// "true" when the transfer is protection-coded and not yet redeemable.
    pub codepro: String,
    /// Our order id, set when the quickpay link was built.
    #[serde(default)]
    pub label: String,
    pub sha1_hash: String,
}

impl WalletNotification {
    /// Field order is fixed by the wallet's notification contract.
    fn signature_string(&self, secret: &str) -> String {
        format!(
            "{}&{}&{}&{}&{}&{}&{}&{}&{}",
            self.notification_type,
            self.operation_id,
            self.amount,
            self.currency,
            self.datetime,
            self.sender,
            self.codepro,
            secret,
            self.label,
        )
    }

    pub fn verify_signature(&self, secret: &str) -> BillingResult<()> {
        let digest = Sha1::digest(self.signature_string(secret).as_bytes());
        if hex::encode(digest) == self.sha1_hash.to_lowercase() {
            Ok(())
        } else {
            Err(BillingError::WebhookSignatureInvalid)
        }
    }

    /// Verify the notification matches what the wallet API says about the
    /// operation. A valid signature alone is not enough: replayed or
    /// tampered notifications must not settle a payment.
    pub fn cross_check(&self, op: &WalletOperation) -> BillingResult<()> {
        if op.label.as_deref() != Some(self.label.as_str()) {
            return Err(BillingError::WebhookMismatch(format!(
                "label {:?} != {:?}",
                op.label, self.label
            )));
        }
        if op.sender.as_deref() != Some(self.sender.as_str()) {
            return Err(BillingError::WebhookMismatch(format!(
                "sender {:?} != {:?}",
                op.sender, self.sender
            )));
        }
        let claimed: f64 = self
            .amount
            .parse()
            .map_err(|_| BillingError::WebhookMismatch(format!("bad amount {:?}", self.amount)))?;
        if (op.amount - claimed).abs() > 0.01 {
            return Err(BillingError::WebhookMismatch(format!(
                "amount {} != {}",
                op.amount, claimed
            )));
        }
        Ok(())
    }

    /// Protection-coded transfers cannot be redeemed automatically.
    pub fn is_code_protected(&self) -> bool {
        self.codepro == "true"
    }
}
