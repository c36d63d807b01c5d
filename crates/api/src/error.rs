//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use subkassa_billing::{BillingError, ProviderError};

pub struct ApiError(pub BillingError);

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        ApiError(e)
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        ApiError(BillingError::Provider(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self.0 {
            // Trust failures get a deliberately uninformative response; the
            // details go to the audit log only.
            BillingError::WebhookSignatureInvalid | BillingError::WebhookMismatch(_) => {
                tracing::warn!(error = %self.0, "webhook rejected");
                (StatusCode::BAD_REQUEST, "invalid").into_response()
            }
            BillingError::PaymentNotFound(_) => {
                (StatusCode::NOT_FOUND, "payment not found").into_response()
            }
            e if e.is_domain() => (StatusCode::BAD_REQUEST, self.0.to_string()).into_response(),
            _ => {
                tracing::error!(error = %self.0, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}
