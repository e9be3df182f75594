use crate::{
    errors::ServiceError,
    handlers::common::{created_response, success_response},
    services::{checkout::CheckoutInput, orders::OrderResponse},
    AppState,
};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Routes for order creation and synchronous payment completion.
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_order))
        .route("/paypal/capture", post(capture_paypal))
        .route("/verify", post(verify_payment))
}

/// POST /api/v1/checkout
///
/// Turns the session's cart into an order and starts the payment. Input
/// validation, stock and price verification errors come back as structured
/// error bodies before any charge is attempted.
async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CheckoutInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state.services.checkout.checkout(payload).await?;
    Ok(created_response(outcome))
}

#[derive(Debug, Deserialize)]
pub struct CapturePayPalRequest {
    pub order_reference: String,
    pub provider_order_id: String,
}

/// POST /api/v1/checkout/paypal/capture
///
/// Redirect-completion callback: the shopper approved the wallet payment and
/// came back; capture it and settle the order.
async fn capture_paypal(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CapturePayPalRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .checkout
        .capture_paypal(&payload.order_reference, &payload.provider_order_id)
        .await?;

    let (order, items) = state.services.orders.get_with_items(&order.reference).await?;
    Ok(success_response(OrderResponse::from_model(order, items)))
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub order_reference: String,
    pub payment_intent_id: String,
}

/// POST /api/v1/checkout/verify
///
/// Client-side poll after confirming a card intent. Applies the gateway's
/// authoritative answer; an unsettled charge leaves the order pending.
async fn verify_payment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .checkout
        .verify_card_payment(&payload.order_reference, &payload.payment_intent_id)
        .await?;

    let (order, items) = state.services.orders.get_with_items(&order.reference).await?;
    Ok(success_response(OrderResponse::from_model(order, items)))
}
