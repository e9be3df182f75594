//! Shared harness for integration tests: a tempfile-backed SQLite database
//! with migrations applied, the full service graph, and catalog seeding
//! helpers.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set, TransactionTrait};
use sha2::Sha256;
use storefront_api::{
    config::AppConfig,
    db,
    entities::{product, product_variant, variant_stock, OrderModel, PaymentMethod},
    events::{process_events, EventSender},
    handlers::AppServices,
    services::{checkout::CheckoutInput, orders::NewOrder, pricing::PricedLine},
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_storefront_test";
pub const PAYPAL_WEBHOOK_SECRET: &str = "whsec_wallet_test";

type HmacSha256 = Hmac<Sha256>;

/// Test application context with a fresh database per test.
pub struct TestCtx {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub services: AppServices,
    _event_task: tokio::task::JoinHandle<()>,
    _tmp: tempfile::TempDir,
}

impl TestCtx {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let db_path = tmp.path().join("storefront_test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let mut cfg = AppConfig::new(url, "127.0.0.1".to_string(), 18080, "test".to_string());
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.stripe.webhook_secret = Some(STRIPE_WEBHOOK_SECRET.to_string());
        cfg.paypal.webhook_secret = Some(PAYPAL_WEBHOOK_SECRET.to_string());
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let (tx, rx) = mpsc::channel(256);
        let event_sender = EventSender::new(tx);
        let event_task = tokio::spawn(process_events(rx));

        let config = Arc::new(cfg);
        let services = AppServices::new(db.clone(), event_sender, config.clone());

        Self {
            db,
            config,
            services,
            _event_task: event_task,
            _tmp: tmp,
        }
    }

    /// Seeds a product with one variant and a stock level; returns the
    /// variant id. `discount_price` flips the product's discount flag on.
    pub async fn seed_variant(
        &self,
        price: Decimal,
        discount_price: Option<Decimal>,
        stock: i32,
    ) -> Uuid {
        let now = Utc::now();
        let product_id = Uuid::new_v4();
        let variant_id = Uuid::new_v4();

        let product = product::ActiveModel {
            id: Set(product_id),
            name: Set(format!("Product {}", &product_id.simple().to_string()[..8])),
            slug: Set(format!("product-{}", product_id.simple())),
            price: Set(price),
            discount: Set(discount_price.is_some()),
            discount_price: Set(discount_price),
            available: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        product.insert(&*self.db).await.expect("seed product");

        let variant = product_variant::ActiveModel {
            id: Set(variant_id),
            product_id: Set(product_id),
            slug: Set(format!("variant-{}", variant_id.simple())),
            available: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        variant.insert(&*self.db).await.expect("seed variant");

        let stock_row = variant_stock::ActiveModel {
            variant_id: Set(variant_id),
            quantity: Set(stock),
            low_stock_threshold: Set(0),
            updated_at: Set(now),
        };
        stock_row.insert(&*self.db).await.expect("seed stock");

        variant_id
    }

    /// Creates a cart for the session and fills it with the given lines.
    pub async fn seed_cart(&self, session_id: &str, items: &[(Uuid, i32)]) {
        self.services
            .carts
            .get_or_create(session_id, None)
            .await
            .expect("create cart");
        for &(variant_id, quantity) in items {
            self.services
                .carts
                .upsert_item(session_id, variant_id, quantity)
                .await
                .expect("add cart item");
        }
    }

    /// A valid checkout input for the session; tests override fields as needed.
    pub fn checkout_input(&self, session_id: &str, declared_total: Decimal) -> CheckoutInput {
        CheckoutInput {
            session_id: session_id.to_string(),
            customer_id: None,
            email: "shopper@example.com".to_string(),
            phone_number: "0123456789".to_string(),
            country: "Germany".to_string(),
            address: "Hauptstrasse 1".to_string(),
            city: "Berlin".to_string(),
            postal_code: "10115".to_string(),
            delivery_address: None,
            delivery_city: None,
            delivery_postal_code: None,
            payment_method: PaymentMethod::CashOnDelivery,
            declared_total,
        }
    }

    /// Places an order the way the orchestrator does (reservation + snapshot
    /// insert in one transaction), without the HTTP/cart layers. Gateway
    /// methods come out `pending`, ready for webhook reconciliation.
    pub async fn place_order(
        &self,
        lines: &[(Uuid, i32, Decimal)],
        method: PaymentMethod,
    ) -> OrderModel {
        let txn = self.db.begin().await.expect("begin");

        let mut priced = Vec::with_capacity(lines.len());
        let mut subtotal = Decimal::ZERO;
        for &(variant_id, quantity, unit_price) in lines {
            let reserved = self
                .services
                .inventory
                .reserve(&txn, variant_id, quantity)
                .await
                .expect("reserve");
            assert!(reserved, "test order seeding must not run out of stock");

            let line_total = unit_price * Decimal::from(quantity);
            subtotal += line_total;
            priced.push(PricedLine {
                variant_id,
                quantity,
                unit_price,
                line_total,
            });
        }

        let shipping = dec!(10.00);
        let order = self
            .services
            .orders
            .insert_order(
                &txn,
                NewOrder {
                    customer_id: None,
                    email: "shopper@example.com".to_string(),
                    phone_number: "0123456789".to_string(),
                    country: "Germany".to_string(),
                    address: "Hauptstrasse 1".to_string(),
                    city: "Berlin".to_string(),
                    postal_code: "10115".to_string(),
                    delivery_address: None,
                    delivery_city: None,
                    delivery_postal_code: None,
                    payment_method: method,
                    currency: "EUR".to_string(),
                    shipping_cost: shipping,
                    total_price: subtotal + shipping,
                    lines: priced,
                },
            )
            .await
            .expect("insert order");

        txn.commit().await.expect("commit");
        order
    }

    pub async fn stock_of(&self, variant_id: Uuid) -> i32 {
        self.services
            .inventory
            .available(variant_id)
            .await
            .expect("stock lookup")
            .expect("stock row")
    }
}

/// Signs a payload the way the card gateway does: hex HMAC-SHA256 over
/// `"{timestamp}.{body}"` in `x-timestamp`/`x-signature` headers.
pub fn signed_headers(secret: &str, payload: &[u8]) -> http::HeaderMap {
    let ts = Utc::now().timestamp();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(format!("{}.", ts).as_bytes());
    mac.update(payload);
    let sig = hex::encode(mac.finalize().into_bytes());

    let mut headers = http::HeaderMap::new();
    headers.insert(
        "x-timestamp",
        http::HeaderValue::from_str(&ts.to_string()).unwrap(),
    );
    headers.insert("x-signature", http::HeaderValue::from_str(&sig).unwrap());
    headers
}

pub fn stripe_confirmed_payload(intent_id: &str, reference: &str) -> Vec<u8> {
    serde_json::json!({
        "id": format!("evt_{}", intent_id),
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": intent_id, "metadata": {"order_reference": reference}}}
    })
    .to_string()
    .into_bytes()
}

pub fn stripe_failed_payload(intent_id: &str, reference: &str) -> Vec<u8> {
    serde_json::json!({
        "id": format!("evt_{}", intent_id),
        "type": "payment_intent.payment_failed",
        "data": {"object": {
            "id": intent_id,
            "metadata": {"order_reference": reference},
            "last_payment_error": {"message": "card declined"}
        }}
    })
    .to_string()
    .into_bytes()
}

pub fn stripe_refund_payload(intent_id: &str, reference: &str) -> Vec<u8> {
    serde_json::json!({
        "id": format!("evt_re_{}", intent_id),
        "type": "charge.refunded",
        "data": {"object": {
            "id": format!("ch_{}", intent_id),
            "payment_intent": intent_id,
            "metadata": {"order_reference": reference}
        }}
    })
    .to_string()
    .into_bytes()
}

pub fn paypal_capture_payload(capture_id: &str, reference: &str) -> Vec<u8> {
    serde_json::json!({
        "id": format!("WH-{}", capture_id),
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource": {"id": capture_id, "custom_id": reference}
    })
    .to_string()
    .into_bytes()
}
