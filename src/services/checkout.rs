use crate::{
    config::AppConfig,
    entities::{CartStatus, OrderModel, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        carts::CartService,
        inventory::InventoryService,
        orders::{NewOrder, OrderService},
        payments::{ChargeOutcome, ChargeRequest, PaymentProcessor},
        pricing::PricingService,
    },
};
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Checkout request: customer contact, addresses, method and the total the
/// client believes it is paying. Prices themselves are never inputs.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutInput {
    #[validate(length(min = 1))]
    pub session_id: String,
    pub customer_id: Option<Uuid>,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 3, max = 15))]
    pub phone_number: String,
    #[validate(length(min = 1, max = 72))]
    pub country: String,
    #[validate(length(min = 1, max = 72))]
    pub address: String,
    #[validate(length(min = 1, max = 48))]
    pub city: String,
    #[validate(length(min = 1, max = 10))]
    pub postal_code: String,
    pub delivery_address: Option<String>,
    pub delivery_city: Option<String>,
    pub delivery_postal_code: Option<String>,
    pub payment_method: PaymentMethod,
    /// Client-declared total, verified against the server-computed one
    pub declared_total: Decimal,
}

/// What the caller needs after a successful checkout: the shareable reference
/// and, for client-confirmed methods, the gateway handoff.
#[derive(Debug, Serialize)]
pub struct CheckoutOutcome {
    pub reference: String,
    pub total_price: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    /// Card flows: secret for client-side confirmation
    pub client_secret: Option<String>,
    /// Redirect flows: approval URL to send the shopper to
    pub approval_url: Option<String>,
}

/// The checkout orchestrator.
///
/// Sequences cart -> pricing -> inventory -> order -> gateway. All local-store
/// steps (cart claim, reservations, order insert, cart clear) commit in one
/// transaction; gateway I/O happens strictly after that commit so a slow or
/// failed provider call never holds locks on stock rows.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    config: Arc<AppConfig>,
    carts: Arc<CartService>,
    pricing: Arc<PricingService>,
    inventory: Arc<InventoryService>,
    orders: Arc<OrderService>,
    payments: Arc<PaymentProcessor>,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        config: Arc<AppConfig>,
        carts: Arc<CartService>,
        pricing: Arc<PricingService>,
        inventory: Arc<InventoryService>,
        orders: Arc<OrderService>,
        payments: Arc<PaymentProcessor>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            carts,
            pricing,
            inventory,
            orders,
            payments,
        }
    }

    /// Converts a cart into a durable order and starts the payment.
    #[instrument(skip(self, input), fields(session_id = %input.session_id, payment_method = %input.payment_method))]
    pub async fn checkout(&self, input: CheckoutInput) -> Result<CheckoutOutcome, ServiceError> {
        // 1. Validate before any durable effect: no wasted stock locks
        input
            .validate()
            .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;

        // 2. Load the cart
        let cart = self.carts.get_with_items(&input.session_id).await?;
        if cart.cart.status != CartStatus::Active {
            return Err(ServiceError::CartAlreadyCheckedOut);
        }
        if cart.items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let max_quantity = self.config.checkout.max_line_quantity;
        for item in &cart.items {
            if item.quantity < 1 || item.quantity > max_quantity {
                return Err(ServiceError::InvalidInput(format!(
                    "Quantity for variant {} must be between 1 and {}, got {}",
                    item.variant_id, max_quantity, item.quantity
                )));
            }
        }

        // 3. Server-authoritative pricing, checked against the declared total
        let requested: Vec<(Uuid, i32)> = cart
            .items
            .iter()
            .map(|item| (item.variant_id, item.quantity))
            .collect();
        let priced = self.pricing.price_items(&requested).await?;
        self.pricing
            .verify_declared(priced.total, input.declared_total)?;

        // 4.-5. One transaction: claim the cart, reserve every line, persist
        // the order with its priced snapshot, consume the cart items.
        let txn = self.db.begin().await?;

        self.carts.claim(&txn, cart.cart.id).await?;

        for line in &priced.lines {
            let reserved = self
                .inventory
                .reserve(&txn, line.variant_id, line.quantity)
                .await?;
            if !reserved {
                // Dropping the transaction rolls back the claim and every
                // reservation taken so far; nothing partial survives
                return Err(ServiceError::OutOfStock(line.variant_id.to_string()));
            }
        }

        let order = self
            .orders
            .insert_order(
                &txn,
                NewOrder {
                    customer_id: input.customer_id,
                    email: input.email.clone(),
                    phone_number: input.phone_number.clone(),
                    country: input.country.clone(),
                    address: input.address.clone(),
                    city: input.city.clone(),
                    postal_code: input.postal_code.clone(),
                    delivery_address: input.delivery_address.clone(),
                    delivery_city: input.delivery_city.clone(),
                    delivery_postal_code: input.delivery_postal_code.clone(),
                    payment_method: input.payment_method,
                    currency: self.config.checkout.currency.clone(),
                    shipping_cost: priced.shipping_cost,
                    total_price: priced.total,
                    lines: priced.lines.clone(),
                },
            )
            .await?;

        self.carts.clear_items(&txn, cart.cart.id).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderCreated(order.id)).await;
        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                cart_id: cart.cart.id,
                order_id: order.id,
            })
            .await;

        info!(reference = %order.reference, total = %order.total_price, "Order created");

        // 6.-7. Gateway invocation, with the canonical amount only
        let gateway = match self.payments.gateway_for(input.payment_method) {
            Some(gateway) => gateway,
            None => {
                // Offline method: no charge exists, order stays unpaid
                return Ok(outcome_for(&order, None, None));
            }
        };

        // 6. Re-price immediately before charging: closes the window for
        // drift between snapshot and charge (time-of-check/time-of-use)
        let repriced_total = self.pricing.reprice_total(&requested).await?;
        if (repriced_total - order.total_price).abs() > self.config.checkout.price_epsilon {
            self.fail_order_after_commit(&order, "catalog price drifted before charge")
                .await;
            return Err(ServiceError::PriceMismatch {
                expected: repriced_total,
                declared: order.total_price,
            });
        }

        let charge = ChargeRequest {
            order_reference: order.reference.clone(),
            amount: order.total_price,
            currency: order.currency.clone(),
            customer_email: order.email.clone(),
        };

        match gateway.create_intent(&charge).await {
            Ok(intent) => {
                self.orders
                    .attach_gateway_handoff(
                        order.id,
                        &intent.transaction_id,
                        intent.client_secret.as_deref(),
                        intent.approval_url.as_deref(),
                    )
                    .await?;

                Ok(outcome_for(
                    &order,
                    intent.client_secret,
                    intent.approval_url,
                ))
            }
            // 8. A failed charge start must not leave a dangling pending
            // order holding stock
            Err(e) => {
                self.fail_order_after_commit(&order, "gateway rejected intent creation")
                    .await;
                Err(e)
            }
        }
    }

    /// Redirect-completion callback for the wallet flow: captures the approved
    /// order and settles the aggregate with the gateway's authoritative answer.
    #[instrument(skip(self))]
    pub async fn capture_paypal(
        &self,
        reference: &str,
        provider_order_id: &str,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.orders.get_by_reference(reference).await?;

        if order.payment_method != PaymentMethod::Paypal {
            return Err(ServiceError::InvalidInput(format!(
                "Order {} is not a wallet order",
                reference
            )));
        }
        if order.gateway_transaction_id.as_deref() != Some(provider_order_id) {
            return Err(ServiceError::InvalidInput(
                "Provider order id does not match this order".to_string(),
            ));
        }
        if order.payment_status == PaymentStatus::Paid {
            return Ok(order);
        }

        let gateway = self
            .payments
            .gateway_for(PaymentMethod::Paypal)
            .ok_or_else(|| ServiceError::InternalError("Wallet gateway missing".to_string()))?;

        self.settle(&order, gateway.confirm(provider_order_id).await?)
            .await
    }

    /// Synchronous card-payment verification (client poll after confirming the
    /// intent). Applies the gateway's authoritative answer; ambiguity leaves
    /// the order pending for the webhook reconciler.
    #[instrument(skip(self))]
    pub async fn verify_card_payment(
        &self,
        reference: &str,
        payment_intent_id: &str,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.orders.get_by_reference(reference).await?;

        if order.payment_method != PaymentMethod::Card {
            return Err(ServiceError::InvalidInput(format!(
                "Order {} is not a card order",
                reference
            )));
        }
        if order.gateway_transaction_id.as_deref() != Some(payment_intent_id) {
            return Err(ServiceError::InvalidInput(
                "Payment intent does not match this order".to_string(),
            ));
        }
        if order.payment_status == PaymentStatus::Paid {
            return Ok(order);
        }

        let gateway = self
            .payments
            .gateway_for(PaymentMethod::Card)
            .ok_or_else(|| ServiceError::InternalError("Card gateway missing".to_string()))?;

        self.settle(&order, gateway.confirm(payment_intent_id).await?)
            .await
    }

    async fn settle(
        &self,
        order: &OrderModel,
        outcome: ChargeOutcome,
    ) -> Result<OrderModel, ServiceError> {
        match outcome {
            ChargeOutcome::Succeeded { transaction_id } => {
                self.orders.mark_paid(order, &transaction_id).await
            }
            ChargeOutcome::Failed { reason } => {
                self.orders.mark_failed(order, None, Some(reason)).await
            }
            // Not settled: never guessed into paid, the reconciler or the
            // timeout sweep resolves it
            ChargeOutcome::Pending => {
                warn!(reference = %order.reference, "Gateway has not settled the charge yet");
                Ok(order.clone())
            }
        }
    }

    async fn fail_order_after_commit(&self, order: &OrderModel, reason: &str) {
        match self
            .orders
            .mark_failed(order, None, Some(reason.to_string()))
            .await
        {
            Ok(_) => {}
            Err(e) => {
                // The order row exists and is pending; the timeout sweep will
                // reap it if nothing else resolves it first
                error!(reference = %order.reference, error = %e, "Could not fail order after gateway error");
            }
        }
    }
}

fn outcome_for(
    order: &OrderModel,
    client_secret: Option<String>,
    approval_url: Option<String>,
) -> CheckoutOutcome {
    CheckoutOutcome {
        reference: order.reference.clone(),
        total_price: order.total_price,
        currency: order.currency.clone(),
        payment_method: order.payment_method,
        payment_status: order.payment_status,
        client_secret,
        approval_url,
    }
}
