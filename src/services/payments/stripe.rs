use super::{to_minor_units, with_retry, ChargeOutcome, ChargeRequest, GatewayIntent, PaymentGateway};
use crate::{config::StripeConfig, errors::ServiceError};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::instrument;

/// Card-network intent gateway.
///
/// The order reference rides along twice: as the `Idempotency-Key` header so a
/// retried create cannot produce a second charge, and in intent metadata so
/// the webhook reconciler can resolve the order without trusting the caller.
pub struct StripeGateway {
    http: reqwest::Client,
    config: StripeConfig,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    client_secret: Option<String>,
    status: String,
    #[serde(default)]
    last_payment_error: Option<serde_json::Value>,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn try_create_intent(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayIntent, ServiceError> {
        let amount = to_minor_units(request.amount)?;
        let url = format!("{}/v1/payment_intents", self.config.api_base);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", &request.order_reference)
            .form(&[
                ("amount", amount.to_string()),
                ("currency", request.currency.to_lowercase()),
                ("metadata[order_reference]", request.order_reference.clone()),
                ("receipt_email", request.customer_email.clone()),
                (
                    "description",
                    format!("Order {}", request.order_reference),
                ),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("card gateway unreachable: {}", e)))?;

        let intent = read_intent(response).await?;

        Ok(GatewayIntent {
            transaction_id: intent.id,
            client_secret: intent.client_secret,
            approval_url: None,
        })
    }
}

#[async_trait::async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(order_reference = %request.order_reference))]
    async fn create_intent(&self, request: &ChargeRequest) -> Result<GatewayIntent, ServiceError> {
        with_retry("stripe.create_intent", 3, || self.try_create_intent(request)).await
    }

    #[instrument(skip(self))]
    async fn confirm(&self, transaction_id: &str) -> Result<ChargeOutcome, ServiceError> {
        let url = format!(
            "{}/v1/payment_intents/{}",
            self.config.api_base, transaction_id
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("card gateway unreachable: {}", e)))?;

        let intent = read_intent(response).await?;

        Ok(match intent.status.as_str() {
            "succeeded" => ChargeOutcome::Succeeded {
                transaction_id: intent.id,
            },
            "canceled" => ChargeOutcome::Failed {
                reason: intent
                    .last_payment_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "payment canceled".to_string()),
            },
            // requires_action / processing / requires_payment_method:
            // not settled yet, keep the order pending
            _ => ChargeOutcome::Pending,
        })
    }

    #[instrument(skip(self))]
    async fn refund(
        &self,
        transaction_id: &str,
        amount: Decimal,
        _currency: &str,
    ) -> Result<(), ServiceError> {
        let url = format!("{}/v1/refunds", self.config.api_base);
        let amount = to_minor_units(amount)?;

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .form(&[
                ("payment_intent", transaction_id.to_string()),
                ("amount", amount.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("card gateway unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(gateway_error(response).await);
        }

        Ok(())
    }
}

async fn read_intent(response: reqwest::Response) -> Result<PaymentIntent, ServiceError> {
    if !response.status().is_success() {
        return Err(gateway_error(response).await);
    }

    response
        .json::<PaymentIntent>()
        .await
        .map_err(|e| ServiceError::GatewayError(format!("malformed card gateway response: {}", e)))
}

async fn gateway_error(response: reqwest::Response) -> ServiceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    ServiceError::GatewayError(format!("card gateway returned {}: {}", status, excerpt))
}
