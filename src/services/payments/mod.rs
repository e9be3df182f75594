pub mod paypal;
pub mod stripe;

use crate::{config::AppConfig, entities::PaymentMethod, errors::ServiceError};
use rand::Rng;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use paypal::PayPalGateway;
pub use stripe::StripeGateway;

/// What the adapter needs to start a charge. `amount` is always the
/// server-canonical total from the pricing engine; `order_reference` doubles
/// as the idempotency key and is embedded in gateway metadata so the webhook
/// can look the order up without trusting a client-supplied id.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub order_reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub customer_email: String,
}

/// Handoff material returned by intent creation.
#[derive(Debug, Clone)]
pub struct GatewayIntent {
    pub transaction_id: String,
    /// Card flows: secret the client uses to complete the charge
    pub client_secret: Option<String>,
    /// Redirect flows: where to send the shopper for approval
    pub approval_url: Option<String>,
}

/// Authoritative answer from a synchronous confirmation.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Succeeded { transaction_id: String },
    Failed { reason: String },
    /// The gateway has not settled yet; the order stays pending for the
    /// webhook reconciler.
    Pending,
}

/// Uniform interface over the heterogeneous providers.
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Starts a charge for the canonical amount. Safe to retry: the order
    /// reference is passed as an idempotency key.
    async fn create_intent(&self, request: &ChargeRequest) -> Result<GatewayIntent, ServiceError>;

    /// Asks the provider for the authoritative state of a charge. Never
    /// retried on ambiguity: an unclear answer leaves the order pending.
    async fn confirm(&self, transaction_id: &str) -> Result<ChargeOutcome, ServiceError>;

    /// Refunds a settled charge.
    async fn refund(
        &self,
        transaction_id: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<(), ServiceError>;
}

/// Dispatches a payment method to its gateway. Offline methods (cash on
/// delivery, bank transfer) have no gateway: `gateway_for` returns `None` and
/// the orchestrator records the order as unpaid without any network call.
#[derive(Clone)]
pub struct PaymentProcessor {
    card: Arc<StripeGateway>,
    wallet: Arc<PayPalGateway>,
}

impl PaymentProcessor {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            card: Arc::new(StripeGateway::new(config.stripe.clone())),
            wallet: Arc::new(PayPalGateway::new(config.paypal.clone())),
        }
    }

    pub fn gateway_for(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentGateway>> {
        match method {
            PaymentMethod::Card => Some(self.card.clone()),
            PaymentMethod::Paypal => Some(self.wallet.clone()),
            PaymentMethod::CashOnDelivery | PaymentMethod::BankTransfer => None,
        }
    }
}

/// Converts a decimal major-unit amount into the integer minor units most
/// gateway APIs expect.
pub(crate) fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InternalError(format!("Amount {} out of range for gateway", amount))
        })
}

/// Retries an idempotent gateway call a bounded number of times with
/// exponential backoff and jitter. Only transient `GatewayError`s are retried;
/// every other failure surfaces immediately.
pub(crate) async fn with_retry<T, F, Fut>(
    operation: &str,
    max_attempts: u32,
    mut call: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(ServiceError::GatewayError(reason)) if attempt < max_attempts => {
                let jitter = rand::thread_rng().gen_range(0..100);
                let backoff = Duration::from_millis(200 * 2u64.pow(attempt - 1) + jitter);
                warn!(
                    operation = operation,
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Gateway call failed, retrying: {}",
                    reason
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
