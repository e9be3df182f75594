use crate::{
    errors::ServiceError,
    services::webhooks::{GatewayProvider, WebhookAck},
    AppState,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::info;

/// Route for asynchronous gateway notifications.
pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new().route("/payments/:provider", post(payment_webhook))
}

/// POST /api/v1/webhooks/payments/{provider}
///
/// Raw body plus provider signature headers. 2xx is returned only after the
/// event verified and applied idempotently; signature failures return 401 so
/// the provider retries, and forbidden transitions 409 so they surface on the
/// provider's dashboard instead of being silently swallowed.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let provider = GatewayProvider::from_path(&provider)
        .ok_or_else(|| ServiceError::NotFound(format!("Unknown payment provider {}", provider)))?;

    let ack = state
        .services
        .webhooks
        .handle(provider, &headers, &body)
        .await?;

    match ack {
        WebhookAck::Applied => {}
        WebhookAck::Replayed => info!(provider = ?provider, "Acknowledged webhook replay"),
        WebhookAck::Ignored => info!(provider = ?provider, "Acknowledged unhandled webhook type"),
    }

    Ok((StatusCode::OK, "ok"))
}
