pub mod carts;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod webhooks;

use crate::{
    config::AppConfig,
    events::EventSender,
    services::{
        carts::CartService,
        checkout::CheckoutService,
        inventory::InventoryService,
        orders::OrderService,
        payments::PaymentProcessor,
        pricing::PricingService,
        webhooks::WebhookReconciler,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Aggregated services used by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub pricing: Arc<PricingService>,
    pub inventory: Arc<InventoryService>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub webhooks: Arc<WebhookReconciler>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        config: Arc<AppConfig>,
    ) -> Self {
        let payments = Arc::new(PaymentProcessor::from_config(&config));
        Self::with_payments(db, event_sender, config, payments)
    }

    /// Wires the service graph around an explicit payment processor; tests
    /// point this at fake gateway endpoints.
    pub fn with_payments(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        config: Arc<AppConfig>,
        payments: Arc<PaymentProcessor>,
    ) -> Self {
        let carts = Arc::new(CartService::new(
            db.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let pricing = Arc::new(PricingService::new(db.clone(), config.clone()));
        let inventory = Arc::new(InventoryService::new(db.clone(), event_sender.clone()));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            inventory.clone(),
            config.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender,
            config.clone(),
            carts.clone(),
            pricing.clone(),
            inventory.clone(),
            orders.clone(),
            payments,
        ));
        let webhooks = Arc::new(WebhookReconciler::new(orders.clone(), config));

        Self {
            carts,
            pricing,
            inventory,
            orders,
            checkout,
            webhooks,
        }
    }
}
