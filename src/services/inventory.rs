use crate::{
    entities::{order_item, variant_stock, OrderItem, VariantStock},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// The inventory ledger.
///
/// Reservation is a single conditional decrement against the stock row; the
/// check and the write are one statement, so concurrent reservations can never
/// jointly take the quantity negative. Release is an unconditional addition
/// back. No other component writes `variant_stock`.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Attempts to reserve `quantity` units of a variant on the given
    /// connection (a transaction during checkout, so a failed sibling line
    /// rolls this decrement back).
    ///
    /// Returns `Ok(false)` when stock is insufficient; the quantity row is
    /// untouched in that case.
    #[instrument(skip(self, conn))]
    pub async fn reserve<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidInput(format!(
                "Reservation quantity must be positive, got {}",
                quantity
            )));
        }

        let result = VariantStock::update_many()
            .col_expr(
                variant_stock::Column::Quantity,
                Expr::col(variant_stock::Column::Quantity).sub(quantity),
            )
            .col_expr(variant_stock::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(variant_stock::Column::VariantId.eq(variant_id))
            .filter(variant_stock::Column::Quantity.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected != 1 {
            return Ok(false);
        }

        // Advisory signal for the replenishment collaborator
        if let Some(row) = VariantStock::find_by_id(variant_id).one(conn).await? {
            if row.low_stock_threshold > 0 && row.quantity <= row.low_stock_threshold {
                warn!(variant_id = %variant_id, remaining = row.quantity, "Variant stock is low");
                self.event_sender
                    .send_or_log(Event::LowStock {
                        variant_id,
                        remaining: row.quantity,
                    })
                    .await;
            }
        }

        Ok(true)
    }

    /// Returns `quantity` units of a variant to the pool. Used on checkout
    /// failure, order cancellation, payment failure and the stale-pending
    /// sweep. Best-effort idempotent at the caller level: callers only invoke
    /// it once per held reservation.
    #[instrument(skip(self, conn))]
    pub async fn release<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidInput(format!(
                "Release quantity must be positive, got {}",
                quantity
            )));
        }

        let result = VariantStock::update_many()
            .col_expr(
                variant_stock::Column::Quantity,
                Expr::col(variant_stock::Column::Quantity).add(quantity),
            )
            .col_expr(variant_stock::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(variant_stock::Column::VariantId.eq(variant_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            // Variant was removed from the catalog while an order held stock
            warn!(variant_id = %variant_id, "Release found no stock row");
        }

        Ok(())
    }

    /// Releases every line of an order's priced snapshot. Runs on the caller's
    /// connection so the release commits atomically with the order's own
    /// transition to `failed`/`cancelled`.
    #[instrument(skip(self, conn))]
    pub async fn release_order_lines<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let lines = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;

        for line in lines {
            self.release(conn, line.variant_id, line.quantity).await?;
        }

        Ok(())
    }

    /// Current available quantity for a variant, `None` when no stock row exists.
    pub async fn available(&self, variant_id: Uuid) -> Result<Option<i32>, ServiceError> {
        Ok(VariantStock::find_by_id(variant_id)
            .one(&*self.db)
            .await?
            .map(|row| row.quantity))
    }

    /// Sets the absolute stock level for a variant, creating the row when
    /// missing. Seeding/receiving interface for the catalog collaborator.
    #[instrument(skip(self))]
    pub async fn set_level(&self, variant_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::InvalidInput(
                "Stock level cannot be negative".to_string(),
            ));
        }

        let result = VariantStock::update_many()
            .col_expr(variant_stock::Column::Quantity, Expr::value(quantity))
            .col_expr(variant_stock::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(variant_stock::Column::VariantId.eq(variant_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            let row = variant_stock::ActiveModel {
                variant_id: Set(variant_id),
                quantity: Set(quantity),
                low_stock_threshold: Set(0),
                updated_at: Set(Utc::now()),
            };
            row.insert(&*self.db).await?;
        }

        Ok(())
    }
}
