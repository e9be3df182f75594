use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Checkout and pricing policy knobs.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutConfig {
    /// ISO 4217 currency for all orders in this deployment
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Flat shipping cost added to every order
    #[serde(default = "default_shipping_base_cost")]
    pub shipping_base_cost: Decimal,

    /// Orders at or above this subtotal ship free
    #[serde(default)]
    pub free_shipping_threshold: Option<Decimal>,

    /// Tolerated divergence between declared and computed totals
    #[serde(default = "default_price_epsilon")]
    pub price_epsilon: Decimal,

    /// Largest quantity accepted for a single line item
    #[serde(default = "default_max_line_quantity")]
    pub max_line_quantity: i32,

    /// Minutes a pending order may wait for gateway resolution before the sweep fails it
    #[serde(default = "default_pending_timeout_mins")]
    pub pending_timeout_mins: i64,

    /// Minutes after payment during which a paid order may still be cancelled
    #[serde(default = "default_cancellation_window_mins")]
    pub cancellation_window_mins: i64,

    /// Days of inactivity after which a cart is purged
    #[serde(default = "default_cart_expiry_days")]
    pub cart_expiry_days: i64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            shipping_base_cost: default_shipping_base_cost(),
            free_shipping_threshold: None,
            price_epsilon: default_price_epsilon(),
            max_line_quantity: default_max_line_quantity(),
            pending_timeout_mins: default_pending_timeout_mins(),
            cancellation_window_mins: default_cancellation_window_mins(),
            cart_expiry_days: default_cart_expiry_days(),
        }
    }
}

/// Card-intent gateway credentials.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StripeConfig {
    #[serde(default)]
    pub secret_key: String,

    /// Shared secret for webhook signature verification
    #[serde(default)]
    pub webhook_secret: Option<String>,

    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            api_base: default_stripe_api_base(),
        }
    }
}

/// Redirect-wallet gateway credentials.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PayPalConfig {
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Shared secret for webhook signature verification
    #[serde(default)]
    pub webhook_secret: Option<String>,

    #[serde(default = "default_paypal_api_base")]
    pub api_base: String,

    /// Where the wallet redirects the shopper after approval
    #[serde(default = "default_paypal_return_url")]
    pub return_url: String,

    #[serde(default = "default_paypal_cancel_url")]
    pub cancel_url: String,
}

impl Default for PayPalConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            webhook_secret: None,
            api_base: default_paypal_api_base(),
            return_url: default_paypal_return_url(),
            cancel_url: default_paypal_cancel_url(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,

    /// Checkout and pricing policy
    #[serde(default)]
    pub checkout: CheckoutConfig,

    /// Card-intent gateway
    #[serde(default)]
    pub stripe: StripeConfig,

    /// Redirect-wallet gateway
    #[serde(default)]
    pub paypal: PayPalConfig,
}

fn default_currency() -> String {
    "EUR".to_string()
}
fn default_shipping_base_cost() -> Decimal {
    dec!(10.00)
}
fn default_price_epsilon() -> Decimal {
    dec!(0.01)
}
fn default_max_line_quantity() -> i32 {
    999
}
fn default_pending_timeout_mins() -> i64 {
    30
}
fn default_cancellation_window_mins() -> i64 {
    30
}
fn default_cart_expiry_days() -> i64 {
    8
}
fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}
fn default_paypal_api_base() -> String {
    "https://api-m.paypal.com".to_string()
}
fn default_paypal_return_url() -> String {
    "http://localhost:3000/payment/paypal/success".to_string()
}
fn default_paypal_cancel_url() -> String {
    "http://localhost:3000/payment/paypal/cancel".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_webhook_tolerance_secs() -> u64 {
    300
}

impl AppConfig {
    /// Programmatic constructor, used by tests and tooling.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            request_timeout_secs: default_request_timeout_secs(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
            checkout: CheckoutConfig::default(),
            stripe: StripeConfig::default(),
            paypal: PayPalConfig::default(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Loads configuration from config files and `APP__`-prefixed environment
/// variables, in that order of precedence.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let cfg: AppConfig = config.try_deserialize()?;
    cfg.validate()?;

    Ok(cfg)
}

/// Initializes the tracing subscriber. Honors `RUST_LOG` when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=info", level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programmatic_config_carries_policy_defaults() {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18080,
            "test".to_string(),
        );
        assert_eq!(cfg.checkout.currency, "EUR");
        assert_eq!(cfg.checkout.shipping_base_cost, dec!(10.00));
        assert_eq!(cfg.checkout.max_line_quantity, 999);
        assert_eq!(cfg.checkout.pending_timeout_mins, 30);
        assert!(!cfg.is_production());
    }

    #[test]
    fn checkout_config_validates_currency_length() {
        let mut cfg = CheckoutConfig::default();
        cfg.currency = "EURO".to_string();
        assert!(cfg.validate().is_err());
    }
}
