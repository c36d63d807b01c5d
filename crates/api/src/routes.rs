//! HTTP routes: the wallet notification endpoint and the hosted payment form.

use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use subkassa_billing::{BillingError, WalletNotification};

use crate::error::ApiError;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/wallet", post(wallet_webhook))
        .route("/payments/{order_id}/form", get(payment_form))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Wallet payment notification.
///
/// Signature first, then the operation-details cross-check, and only then
/// does the payment enter normal validation. Any trust failure mutates
/// nothing and returns a generic rejection.
async fn wallet_webhook(
    State(state): State<AppState>,
    Json(notification): Json<WalletNotification>,
) -> Result<&'static str, ApiError> {
    let wallet = state.billing.providers.wallet();

    notification.verify_signature(wallet.notification_secret())?;

    if notification.is_code_protected() {
        // Cannot be redeemed automatically; the transfer will re-notify once
        // the protection code is entered.
        tracing::warn!(
            operation_id = %notification.operation_id,
            "ignoring protection-coded transfer"
        );
        return Ok("ok");
    }

    let operation = wallet.operation_details(&notification.operation_id).await?;
    notification.cross_check(&operation)?;

    let payment = state
        .billing
        .payments
        .find_by_order_id(&notification.label)
        .await?
        .ok_or_else(|| BillingError::PaymentNotFound(notification.label.clone()))?;

    // The wallet assigns its operation id only at settlement time.
    state
        .billing
        .payments
        .set_provider_id(payment.id, &notification.operation_id)
        .await?;

    let is_paid = state.billing.engine.validate_by_order_id(&payment.order_id).await?;
    tracing::info!(
        order_id = %payment.order_id,
        operation_id = %notification.operation_id,
        is_paid,
        "wallet notification processed"
    );

    Ok("ok")
}

/// Serve the acquirer's stored card form, or redirect to the hosted payment
/// page for providers that have one.
async fn payment_form(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Response, ApiError> {
    let payment = state
        .billing
        .payments
        .find_by_order_id(&order_id)
        .await?
        .ok_or(BillingError::PaymentNotFound(order_id))?;

    if let Some(form_html) = payment.form_html {
        return Ok(Html(form_html).into_response());
    }
    if let Some(url) = payment.payment_url {
        return Ok(Redirect::temporary(&url).into_response());
    }

    Err(ApiError(BillingError::PaymentNotFound(payment.order_id)))
}
