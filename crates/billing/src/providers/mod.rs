//! Payment provider adapters.
//!
//! Each adapter is a pure translation layer to one vendor wire format and
//! owns no business state. The shared contract is two operations: create a
//! payment intent and poll a transaction's status. Every adapter maps its
//! native status vocabulary into [`PaymentStatus`] with an explicit
//! default-to-PENDING rule for anything unrecognized.

pub mod card_a;
pub mod card_b;
pub mod cash;
pub mod crypto;
pub mod retry;
pub mod wallet;

pub use card_a::CardAProvider;
pub use card_b::CardBProvider;
pub use cash::CashProvider;
pub use crypto::CryptoProvider;
pub use retry::RetryPolicy;
pub use wallet::WalletProvider;

use async_trait::async_trait;
use subkassa_shared::{PaymentStatus, PaymentSystem};

/// Transport-level adapter failure.
///
/// Deliberately distinct from a FAILED payment status: exhausted retries and
/// timeouts mean "we do not know", never "the payment failed". On ambiguous
/// creation failures (timeout) the caller must not assume the payment was NOT
/// created upstream.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("provider response is malformed: {0}")]
    Malformed(String),

    #[error("payment has no provider transaction id yet")]
    MissingTransactionId,
}

impl ProviderError {
    /// Whether a retry with the same input could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::Status { code, .. } => *code >= 500 || *code == 429,
            ProviderError::Malformed(_) | ProviderError::MissingTransactionId => false,
        }
    }
}

/// What the engine hands an adapter at creation time.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Internal correlation key; providers that support it echo this back
    /// (the wallet uses it as the notification label).
    pub order_id: String,
    /// Total to charge, post-discount, whole currency units.
    pub amount: i64,
    pub currency: &'static str,
    pub description: String,
    pub email: Option<String>,
}

/// Provider-specific echo of a created payment intent.
#[derive(Debug, Clone, Default)]
pub struct ProviderPaymentRef {
    /// Provider-assigned transaction id, when the provider assigns one at
    /// creation time.
    pub provider_id: Option<String>,
    /// URL to pay, for providers with a hosted page.
    pub url: Option<String>,
    /// HTML form blob, for the acquirer that returns one; persisted and
    /// served verbatim.
    pub form_html: Option<String>,
    /// Payer address, for the crypto processor.
    pub payer_address: Option<String>,
    pub currency: Option<String>,
}

/// Identifies the transaction to poll. Most providers key on their own
/// transaction id; the wallet keys on our order id (the label).
#[derive(Debug, Clone)]
pub struct TransactionRef<'a> {
    pub provider_id: Option<&'a str>,
    pub order_id: &'a str,
}

/// Uniform contract over the heterogeneous processors.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a payment intent upstream.
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<ProviderPaymentRef, ProviderError>;

    /// Poll the current status of a transaction, mapped into the shared
    /// vocabulary. Unknown native statuses map to PENDING.
    async fn validate_transaction(
        &self,
        txn: &TransactionRef<'_>,
    ) -> Result<PaymentStatus, ProviderError>;
}

/// Strategy table mapping a payment system to its adapter.
///
/// Total over the closed [`PaymentSystem`] enumeration; an unsupported system
/// can only arise earlier, when parsing a stored string back into the enum.
pub struct ProviderRegistry {
    crypto: CryptoProvider,
    wallet: WalletProvider,
    card_a: CardAProvider,
    card_b: CardBProvider,
    cash: CashProvider,
}

impl ProviderRegistry {
    pub fn new(
        crypto: CryptoProvider,
        wallet: WalletProvider,
        card_a: CardAProvider,
        card_b: CardBProvider,
        cash: CashProvider,
    ) -> Self {
        Self {
            crypto,
            wallet,
            card_a,
            card_b,
            cash,
        }
    }

    /// Build every adapter from environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self::new(
            CryptoProvider::from_env()?,
            WalletProvider::from_env()?,
            CardAProvider::from_env()?,
            CardBProvider::from_env()?,
            CashProvider::new(),
        ))
    }

    pub fn provider(&self, system: PaymentSystem) -> &dyn PaymentProvider {
        match system {
            PaymentSystem::Crypto => &self.crypto,
            PaymentSystem::Wallet => &self.wallet,
            PaymentSystem::CardA => &self.card_a,
            PaymentSystem::CardB => &self.card_b,
            PaymentSystem::Cash => &self.cash,
        }
    }

    /// The wallet adapter, for webhook handling that needs its
    /// operation-details endpoint directly.
    pub fn wallet(&self) -> &WalletProvider {
        &self.wallet
    }
}
