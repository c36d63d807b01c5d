#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared domain types for subkassa.
//!
//! Holds the closed payment-system and payment-status enumerations plus the
//! token/API-key credential codec. Everything here is pure and infrastructure
//! free so both the billing engine and the API surface can depend on it.

pub mod apikey;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of supported payment processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSystem {
    /// Crypto invoice processor.
    Crypto,
    /// E-wallet, settled via asynchronous webhook notifications.
    Wallet,
    /// Bank-card acquirer A (HTML payment form).
    CardA,
    /// Bank-card acquirer B (hosted payment page).
    CardB,
    /// Cash / manual settlement by an operator.
    Cash,
}

impl PaymentSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSystem::Crypto => "crypto",
            PaymentSystem::Wallet => "wallet",
            PaymentSystem::CardA => "card_a",
            PaymentSystem::CardB => "card_b",
            PaymentSystem::Cash => "cash",
        }
    }

    pub const ALL: [PaymentSystem; 5] = [
        PaymentSystem::Crypto,
        PaymentSystem::Wallet,
        PaymentSystem::CardA,
        PaymentSystem::CardB,
        PaymentSystem::Cash,
    ];
}

impl fmt::Display for PaymentSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raised when a stored payment-system string no longer parses.
/// Should be unreachable while the enumeration stays closed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown payment system: {0}")]
pub struct UnknownPaymentSystem(pub String);

impl FromStr for PaymentSystem {
    type Err = UnknownPaymentSystem;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crypto" => Ok(PaymentSystem::Crypto),
            "wallet" => Ok(PaymentSystem::Wallet),
            "card_a" => Ok(PaymentSystem::CardA),
            "card_b" => Ok(PaymentSystem::CardB),
            "cash" => Ok(PaymentSystem::Cash),
            other => Err(UnknownPaymentSystem(other.to_string())),
        }
    }
}

/// Shared payment status vocabulary every adapter maps into.
///
/// Adapters must map unrecognized native statuses to `Pending` — unknown
/// input never creates or destroys entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
        }
    }

    /// Whether this status ends the payment lifecycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown payment status: {0}")]
pub struct UnknownPaymentStatus(pub String);

impl FromStr for PaymentStatus {
    type Err = UnknownPaymentStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "canceled" => Ok(PaymentStatus::Canceled),
            other => Err(UnknownPaymentStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_system_round_trips() {
        for system in PaymentSystem::ALL {
            assert_eq!(system.as_str().parse::<PaymentSystem>().unwrap(), system);
        }
    }

    #[test]
    fn unknown_payment_system_rejected() {
        assert!("paypal".parse::<PaymentSystem>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Canceled.is_terminal());
    }
}
