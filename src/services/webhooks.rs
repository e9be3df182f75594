use crate::{
    config::AppConfig,
    entities::PaymentStatus,
    errors::ServiceError,
    services::orders::OrderService,
};
use hmac::{Hmac, Mac};
use http::HeaderMap;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Which provider a webhook claims to come from; selects the shared secret and
/// the payload dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayProvider {
    Stripe,
    Paypal,
}

impl GatewayProvider {
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "stripe" => Some(Self::Stripe),
            "paypal" => Some(Self::Paypal),
            _ => None,
        }
    }
}

/// Result of an accepted webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAck {
    /// The event transitioned the order
    Applied,
    /// The event had already been applied; acknowledged as a no-op
    Replayed,
    /// Recognized envelope, event type we do not act on
    Ignored,
}

/// A gateway notification after signature verification and schema validation.
/// Unrecognized shapes are rejected rather than best-effort parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    PaymentConfirmed {
        transaction_id: String,
        order_reference: String,
    },
    PaymentFailed {
        transaction_id: String,
        order_reference: String,
        reason: Option<String>,
    },
    Refunded {
        transaction_id: String,
        order_reference: String,
    },
}

/// Verifies authenticity of asynchronous gateway notifications and applies
/// them to order aggregates exactly once.
///
/// Gateways are treated as adversarial, unordered senders: every transition is
/// guarded by the order state machine independent of delivery order, and
/// duplicate deliveries are acknowledged without a second application.
#[derive(Clone)]
pub struct WebhookReconciler {
    orders: Arc<OrderService>,
    config: Arc<AppConfig>,
}

impl WebhookReconciler {
    pub fn new(orders: Arc<OrderService>, config: Arc<AppConfig>) -> Self {
        Self { orders, config }
    }

    /// Full pipeline for one delivery: verify signature, parse, apply.
    #[instrument(skip(self, headers, payload))]
    pub async fn handle(
        &self,
        provider: GatewayProvider,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> Result<WebhookAck, ServiceError> {
        let secret = match provider {
            GatewayProvider::Stripe => self.config.stripe.webhook_secret.as_deref(),
            GatewayProvider::Paypal => self.config.paypal.webhook_secret.as_deref(),
        }
        .ok_or_else(|| {
            ServiceError::InternalError(format!("No webhook secret configured for {:?}", provider))
        })?;

        if !verify_signature(headers, payload, secret, self.config.webhook_tolerance_secs) {
            warn!(provider = ?provider, "Webhook signature verification failed");
            return Err(ServiceError::InvalidSignature);
        }

        match parse_event(provider, payload)? {
            Some(event) => self.apply(event).await,
            None => Ok(WebhookAck::Ignored),
        }
    }

    /// Applies a verified event through the order state machine.
    pub async fn apply(&self, event: GatewayEvent) -> Result<WebhookAck, ServiceError> {
        match event {
            GatewayEvent::PaymentConfirmed {
                transaction_id,
                order_reference,
            } => {
                let order = self.orders.get_by_reference(&order_reference).await?;
                match order.payment_status {
                    PaymentStatus::Paid => {
                        if order.gateway_transaction_id.as_deref() == Some(&transaction_id) {
                            info!(reference = %order_reference, "Replayed payment confirmation");
                            Ok(WebhookAck::Replayed)
                        } else {
                            // A second, distinct charge confirming an already
                            // paid order means money moved twice somewhere
                            Err(ServiceError::InvalidTransition(format!(
                                "order {} is already paid by a different charge",
                                order_reference
                            )))
                        }
                    }
                    PaymentStatus::Pending | PaymentStatus::Unpaid => {
                        match self.orders.mark_paid(&order, &transaction_id).await {
                            Ok(_) => Ok(WebhookAck::Applied),
                            Err(ServiceError::ConcurrentModification(_)) => {
                                // A concurrent duplicate won the race; resolve
                                // against the fresh row
                                let fresh =
                                    self.orders.get_by_reference(&order_reference).await?;
                                if fresh.payment_status == PaymentStatus::Paid
                                    && fresh.gateway_transaction_id.as_deref()
                                        == Some(&transaction_id)
                                {
                                    Ok(WebhookAck::Replayed)
                                } else {
                                    Err(ServiceError::InvalidTransition(format!(
                                        "payment {} -> paid",
                                        fresh.payment_status
                                    )))
                                }
                            }
                            Err(e) => Err(e),
                        }
                    }
                    other => Err(ServiceError::InvalidTransition(format!(
                        "payment {} -> paid",
                        other
                    ))),
                }
            }

            GatewayEvent::PaymentFailed {
                transaction_id,
                order_reference,
                reason,
            } => {
                let order = self.orders.get_by_reference(&order_reference).await?;
                match order.payment_status {
                    PaymentStatus::Failed => {
                        info!(reference = %order_reference, "Replayed payment failure");
                        Ok(WebhookAck::Replayed)
                    }
                    PaymentStatus::Pending | PaymentStatus::Unpaid => {
                        match self
                            .orders
                            .mark_failed(&order, Some(&transaction_id), reason)
                            .await
                        {
                            Ok(_) => Ok(WebhookAck::Applied),
                            Err(ServiceError::ConcurrentModification(_)) => {
                                let fresh =
                                    self.orders.get_by_reference(&order_reference).await?;
                                if fresh.payment_status == PaymentStatus::Failed {
                                    Ok(WebhookAck::Replayed)
                                } else {
                                    Err(ServiceError::InvalidTransition(format!(
                                        "payment {} -> failed",
                                        fresh.payment_status
                                    )))
                                }
                            }
                            Err(e) => Err(e),
                        }
                    }
                    // A failure report must never demote a settled order
                    other => Err(ServiceError::InvalidTransition(format!(
                        "payment {} -> failed",
                        other
                    ))),
                }
            }

            GatewayEvent::Refunded {
                transaction_id,
                order_reference,
            } => {
                let order = self.orders.get_by_reference(&order_reference).await?;
                match order.payment_status {
                    PaymentStatus::Refunded => {
                        info!(reference = %order_reference, "Replayed refund");
                        Ok(WebhookAck::Replayed)
                    }
                    PaymentStatus::Paid => {
                        self.orders.mark_refunded(&order, &transaction_id).await?;
                        Ok(WebhookAck::Applied)
                    }
                    other => Err(ServiceError::InvalidTransition(format!(
                        "payment {} -> refunded",
                        other
                    ))),
                }
            }
        }
    }
}

/// Verifies the delivery signature.
///
/// Primary scheme: `x-timestamp` + `x-signature` headers carrying hex HMAC-SHA256
/// over `"{timestamp}.{body}"`, with a bounded timestamp tolerance. A
/// `Stripe-Signature` header (`t=...,v1=...`) is accepted with the same signed
/// payload shape. Comparison is constant-time.
pub fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    if let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) {
        if let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) {
            if !timestamp_within_tolerance(ts, tolerance_secs) {
                return false;
            }
            return signature_matches(ts, payload, secret, sig);
        }
    }

    if let Some(header) = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok()) {
        let mut ts = "";
        let mut v1 = "";
        for part in header.split(',') {
            let mut it = part.split('=');
            match (it.next(), it.next()) {
                (Some("t"), Some(val)) => ts = val,
                (Some("v1"), Some(val)) => v1 = val,
                _ => {}
            }
        }
        if !ts.is_empty() && !v1.is_empty() {
            if !timestamp_within_tolerance(ts, tolerance_secs) {
                return false;
            }
            return signature_matches(ts, payload, secret, v1);
        }
    }

    false
}

fn timestamp_within_tolerance(ts: &str, tolerance_secs: u64) -> bool {
    match ts.parse::<i64>() {
        Ok(ts) => {
            let now = chrono::Utc::now().timestamp();
            (now - ts).unsigned_abs() <= tolerance_secs
        }
        Err(_) => false,
    }
}

fn signature_matches(ts: &str, payload: &[u8], secret: &str, provided: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, provided)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

// Provider payload dialects. Only the fields the reconciler acts on are
// modeled; an envelope that parses but carries an event type we do not handle
// maps to `None` (acknowledged, no effect).

#[derive(Debug, Deserialize)]
struct StripeEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeData,
}

#[derive(Debug, Deserialize)]
struct StripeData {
    object: StripeObject,
}

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    last_payment_error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PayPalEnvelope {
    event_type: String,
    resource: PayPalResource,
}

#[derive(Debug, Deserialize)]
struct PayPalResource {
    id: String,
    #[serde(default)]
    custom_id: Option<String>,
}

/// Parses a raw payload into a `GatewayEvent`. `Ok(None)` means a valid
/// envelope whose event type is not acted upon.
pub fn parse_event(
    provider: GatewayProvider,
    payload: &[u8],
) -> Result<Option<GatewayEvent>, ServiceError> {
    match provider {
        GatewayProvider::Stripe => {
            let envelope: StripeEnvelope = serde_json::from_slice(payload)
                .map_err(|e| ServiceError::InvalidInput(format!("Malformed webhook payload: {}", e)))?;

            let object = envelope.data.object;
            let order_reference = object.metadata.get("order_reference").cloned();

            match envelope.event_type.as_str() {
                "payment_intent.succeeded" => {
                    let order_reference = order_reference.ok_or_else(missing_reference)?;
                    Ok(Some(GatewayEvent::PaymentConfirmed {
                        transaction_id: object.id,
                        order_reference,
                    }))
                }
                "payment_intent.payment_failed" => {
                    let order_reference = order_reference.ok_or_else(missing_reference)?;
                    Ok(Some(GatewayEvent::PaymentFailed {
                        transaction_id: object.id,
                        order_reference,
                        reason: object.last_payment_error.map(|e| e.to_string()),
                    }))
                }
                "charge.refunded" => {
                    let order_reference = order_reference.ok_or_else(missing_reference)?;
                    Ok(Some(GatewayEvent::Refunded {
                        // Refund notifications reference the original intent
                        transaction_id: object.payment_intent.unwrap_or(object.id),
                        order_reference,
                    }))
                }
                other => {
                    info!("Unhandled card webhook type: {}", other);
                    Ok(None)
                }
            }
        }

        GatewayProvider::Paypal => {
            let envelope: PayPalEnvelope = serde_json::from_slice(payload)
                .map_err(|e| ServiceError::InvalidInput(format!("Malformed webhook payload: {}", e)))?;

            let resource = envelope.resource;
            let order_reference = resource.custom_id.clone();

            match envelope.event_type.as_str() {
                "PAYMENT.CAPTURE.COMPLETED" => {
                    let order_reference = order_reference.ok_or_else(missing_reference)?;
                    Ok(Some(GatewayEvent::PaymentConfirmed {
                        transaction_id: resource.id,
                        order_reference,
                    }))
                }
                "PAYMENT.CAPTURE.DENIED" => {
                    let order_reference = order_reference.ok_or_else(missing_reference)?;
                    Ok(Some(GatewayEvent::PaymentFailed {
                        transaction_id: resource.id,
                        order_reference,
                        reason: None,
                    }))
                }
                "PAYMENT.CAPTURE.REFUNDED" => {
                    let order_reference = order_reference.ok_or_else(missing_reference)?;
                    Ok(Some(GatewayEvent::Refunded {
                        transaction_id: resource.id,
                        order_reference,
                    }))
                }
                other => {
                    info!("Unhandled wallet webhook type: {}", other);
                    Ok(None)
                }
            }
        }
    }
}

fn missing_reference() -> ServiceError {
    ServiceError::InvalidInput("Webhook payload carries no order reference".to_string())
}
