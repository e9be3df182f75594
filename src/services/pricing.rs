use crate::{
    config::AppConfig,
    entities::{Product, ProductVariant, VariantStock},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// One priced order line, derived entirely from catalog state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub variant_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Server-computed totals for a set of line items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
}

/// The pricing engine. Inputs are variant ids and quantities only; client
/// supplied prices or totals are never an input. Totals are recomputed both at
/// order creation and again immediately before the gateway charge.
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    /// Prices the given (variant, quantity) pairs from current catalog state.
    ///
    /// Fails with `UnknownVariant` when a variant or its product no longer
    /// exists, and `VariantUnavailable` when the variant is disabled or has
    /// zero stock.
    #[instrument(skip(self))]
    pub async fn price_items(&self, items: &[(Uuid, i32)]) -> Result<PricedCart, ServiceError> {
        self.price_with(items, true).await
    }

    /// Reprices a set of lines for the pre-charge verification pass. Stock is
    /// not re-checked here: the caller already holds the reservation, so the
    /// available quantity may legitimately be zero. Only price drift matters.
    pub async fn reprice_total(&self, items: &[(Uuid, i32)]) -> Result<Decimal, ServiceError> {
        Ok(self.price_with(items, false).await?.total)
    }

    async fn price_with(
        &self,
        items: &[(Uuid, i32)],
        check_stock: bool,
    ) -> Result<PricedCart, ServiceError> {
        let mut lines = Vec::with_capacity(items.len());
        let mut subtotal = Decimal::ZERO;

        for &(variant_id, quantity) in items {
            let variant = ProductVariant::find_by_id(variant_id)
                .one(&*self.db)
                .await?
                .ok_or(ServiceError::UnknownVariant(variant_id))?;

            if !variant.available {
                return Err(ServiceError::VariantUnavailable(variant_id));
            }

            let product = Product::find_by_id(variant.product_id)
                .one(&*self.db)
                .await?
                .ok_or(ServiceError::UnknownVariant(variant_id))?;

            if !product.available {
                return Err(ServiceError::VariantUnavailable(variant_id));
            }

            if check_stock {
                let stock = VariantStock::find_by_id(variant_id).one(&*self.db).await?;
                if stock.map(|s| s.quantity).unwrap_or(0) <= 0 {
                    return Err(ServiceError::VariantUnavailable(variant_id));
                }
            }

            let unit_price = product.effective_price();
            let line_total = unit_price * Decimal::from(quantity);
            subtotal += line_total;

            lines.push(PricedLine {
                variant_id,
                quantity,
                unit_price,
                line_total,
            });
        }

        let shipping_cost = shipping_for(&self.config, subtotal);

        Ok(PricedCart {
            lines,
            subtotal,
            shipping_cost,
            total: subtotal + shipping_cost,
        })
    }

    /// Rejects a checkout whose client-declared total diverges from the
    /// server-computed one beyond the configured epsilon.
    pub fn verify_declared(&self, computed: Decimal, declared: Decimal) -> Result<(), ServiceError> {
        if (computed - declared).abs() > self.config.checkout.price_epsilon {
            return Err(ServiceError::PriceMismatch {
                expected: computed,
                declared,
            });
        }
        Ok(())
    }
}

/// Shipping policy: flat base rate, waived at or above the free-shipping
/// threshold when one is configured.
fn shipping_for(config: &AppConfig, subtotal: Decimal) -> Decimal {
    if let Some(threshold) = config.checkout.free_shipping_threshold {
        if subtotal >= threshold {
            return Decimal::ZERO;
        }
    }
    config.checkout.shipping_base_cost
}
