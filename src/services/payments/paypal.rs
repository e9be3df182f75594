use super::{with_retry, ChargeOutcome, ChargeRequest, GatewayIntent, PaymentGateway};
use crate::{config::PayPalConfig, errors::ServiceError};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

/// Redirect-wallet gateway.
///
/// Creating an intent yields an approval URL the shopper is sent to; the flow
/// completes when the redirect returns and `confirm` (a capture) is issued.
/// The order reference is carried in `custom_id` so webhook deliveries can be
/// mapped back without a client-supplied order id.
pub struct PayPalGateway {
    http: reqwest::Client,
    config: PayPalConfig,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct WalletOrder {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    links: Vec<WalletLink>,
    #[serde(default)]
    purchase_units: Vec<WalletPurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct WalletLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct WalletPurchaseUnit {
    #[serde(default)]
    payments: Option<WalletPayments>,
}

#[derive(Debug, Deserialize)]
struct WalletPayments {
    #[serde(default)]
    captures: Vec<WalletCapture>,
}

#[derive(Debug, Deserialize)]
struct WalletCapture {
    id: String,
}

impl PayPalGateway {
    pub fn new(config: PayPalConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let url = format!("{}/v1/oauth2/token", self.config.api_base);

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| {
                ServiceError::GatewayError(format!("wallet gateway unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(gateway_error(response).await);
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            ServiceError::GatewayError(format!("malformed wallet token response: {}", e))
        })?;

        Ok(token.access_token)
    }

    async fn try_create_intent(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayIntent, ServiceError> {
        let token = self.access_token().await?;
        let url = format!("{}/v2/checkout/orders", self.config.api_base);

        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.order_reference,
                "custom_id": request.order_reference,
                "amount": {
                    "currency_code": request.currency,
                    "value": request.amount.to_string(),
                },
            }],
            "application_context": {
                "return_url": format!(
                    "{}?order_ref={}",
                    self.config.return_url, request.order_reference
                ),
                "cancel_url": format!(
                    "{}?order_ref={}",
                    self.config.cancel_url, request.order_reference
                ),
            },
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .header("PayPal-Request-Id", &request.order_reference)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ServiceError::GatewayError(format!("wallet gateway unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(gateway_error(response).await);
        }

        let order: WalletOrder = response.json().await.map_err(|e| {
            ServiceError::GatewayError(format!("malformed wallet order response: {}", e))
        })?;

        let approval_url = order
            .links
            .iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href.clone())
            .ok_or_else(|| {
                ServiceError::GatewayError("wallet order carried no approval link".to_string())
            })?;

        Ok(GatewayIntent {
            transaction_id: order.id,
            client_secret: None,
            approval_url: Some(approval_url),
        })
    }
}

#[async_trait::async_trait]
impl PaymentGateway for PayPalGateway {
    #[instrument(skip(self, request), fields(order_reference = %request.order_reference))]
    async fn create_intent(&self, request: &ChargeRequest) -> Result<GatewayIntent, ServiceError> {
        with_retry("paypal.create_intent", 3, || self.try_create_intent(request)).await
    }

    /// Captures an approved wallet order. Ambiguity is not retried: anything
    /// other than a definitive answer leaves the order pending.
    #[instrument(skip(self))]
    async fn confirm(&self, transaction_id: &str) -> Result<ChargeOutcome, ServiceError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/v2/checkout/orders/{}/capture",
            self.config.api_base, transaction_id
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| {
                ServiceError::GatewayError(format!("wallet gateway unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(gateway_error(response).await);
        }

        let order: WalletOrder = response.json().await.map_err(|e| {
            ServiceError::GatewayError(format!("malformed wallet capture response: {}", e))
        })?;

        Ok(match order.status.as_deref() {
            Some("COMPLETED") => {
                // Prefer the capture id: webhooks reference it, not the order id
                let capture_id = order
                    .purchase_units
                    .iter()
                    .filter_map(|unit| unit.payments.as_ref())
                    .flat_map(|payments| payments.captures.iter())
                    .map(|capture| capture.id.clone())
                    .next()
                    .unwrap_or(order.id);
                ChargeOutcome::Succeeded {
                    transaction_id: capture_id,
                }
            }
            Some("DECLINED") | Some("VOIDED") => ChargeOutcome::Failed {
                reason: format!("wallet capture {}", order.status.unwrap_or_default()),
            },
            _ => ChargeOutcome::Pending,
        })
    }

    #[instrument(skip(self))]
    async fn refund(
        &self,
        transaction_id: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<(), ServiceError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/v2/payments/captures/{}/refund",
            self.config.api_base, transaction_id
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&json!({
                "amount": {
                    "value": amount.to_string(),
                    "currency_code": currency,
                }
            }))
            .send()
            .await
            .map_err(|e| {
                ServiceError::GatewayError(format!("wallet gateway unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(gateway_error(response).await);
        }

        Ok(())
    }
}

async fn gateway_error(response: reqwest::Response) -> ServiceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    ServiceError::GatewayError(format!("wallet gateway returned {}: {}", status, excerpt))
}
