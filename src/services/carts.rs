use crate::{
    config::AppConfig,
    entities::{cart, cart_item, Cart, CartItem, CartModel, CartStatus, ProductVariant},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{Duration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, ModelTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// A cart together with its line items.
#[derive(Debug, Clone)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<cart_item::Model>,
}

/// The cart store. Carts are keyed by storefront session id and hold line
/// items until checkout consumes them. Everything here is plain CRUD plus two
/// lifecycle operations: the atomic checkout claim and the expiry purge.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    config: Arc<AppConfig>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Returns the active cart for a session, creating one when none exists.
    #[instrument(skip(self))]
    pub async fn get_or_create(
        &self,
        session_id: &str,
        customer_id: Option<Uuid>,
    ) -> Result<CartModel, ServiceError> {
        if session_id.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Session id must not be empty".to_string(),
            ));
        }

        if let Some(existing) = Cart::find()
            .filter(cart::Column::SessionId.eq(session_id))
            .one(&*self.db)
            .await?
        {
            if existing.status == CartStatus::Active {
                return Ok(existing);
            }
            // A consumed cart still holds the session (it is what turns a
            // double-submit into CartAlreadyCheckedOut). The session shopping
            // again retires that tombstone in favor of a fresh cart.
            self.clear_items(&*self.db, existing.id).await?;
            existing.delete(&*self.db).await?;
        }

        let cart_id = Uuid::new_v4();
        let now = Utc::now();
        let new_cart = cart::ActiveModel {
            id: Set(cart_id),
            session_id: Set(session_id.to_string()),
            customer_id: Set(customer_id),
            status: Set(CartStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = new_cart.insert(&*self.db).await?;
        self.event_sender.send_or_log(Event::CartCreated(cart_id)).await;

        info!(cart_id = %cart_id, "Created cart");
        Ok(created)
    }

    /// Loads the session's cart together with its items, whatever its status.
    /// Callers that require an active cart check the status themselves (the
    /// orchestrator distinguishes "no cart" from "cart already consumed").
    pub async fn get_with_items(&self, session_id: &str) -> Result<CartWithItems, ServiceError> {
        let cart = Cart::find()
            .filter(cart::Column::SessionId.eq(session_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart for session {}", session_id)))?;

        let items = cart.find_related(CartItem).all(&*self.db).await?;

        Ok(CartWithItems { cart, items })
    }

    /// Creates or replaces the line for a variant with an absolute quantity.
    #[instrument(skip(self))]
    pub async fn upsert_item(
        &self,
        session_id: &str,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        let max = self.config.checkout.max_line_quantity;
        if quantity < 1 || quantity > max {
            return Err(ServiceError::InvalidInput(format!(
                "Quantity must be between 1 and {}, got {}",
                max, quantity
            )));
        }

        let cart = self.active_cart(session_id).await?;

        ProductVariant::find_by_id(variant_id)
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::UnknownVariant(variant_id))?;

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(variant_id))
            .one(&*self.db)
            .await?;

        let now = Utc::now();
        match existing {
            Some(item) => {
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(quantity);
                item.updated_at = Set(now);
                item.update(&*self.db).await?;
            }
            None => {
                let item = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    variant_id: Set(variant_id),
                    quantity: Set(quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                item.insert(&*self.db).await?;
            }
        }

        self.touch(cart.id).await?;
        self.event_sender
            .send_or_log(Event::CartItemUpserted {
                cart_id: cart.id,
                variant_id,
            })
            .await;

        self.get_with_items(session_id).await
    }

    /// Removes the line for a variant from the session's cart.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        session_id: &str,
        variant_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        let cart = self.active_cart(session_id).await?;

        let item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(variant_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart item for variant {}", variant_id))
            })?;

        item.delete(&*self.db).await?;
        self.touch(cart.id).await?;
        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                variant_id,
            })
            .await;

        self.get_with_items(session_id).await
    }

    /// Empties the session's cart.
    #[instrument(skip(self))]
    pub async fn clear(&self, session_id: &str) -> Result<(), ServiceError> {
        let cart = self.active_cart(session_id).await?;

        self.clear_items(&*self.db, cart.id).await?;
        self.touch(cart.id).await?;
        self.event_sender.send_or_log(Event::CartCleared(cart.id)).await;

        Ok(())
    }

    /// Deletes all items of a cart on the given connection. Used by `clear`
    /// and by the checkout transaction after the priced snapshot is taken.
    pub async fn clear_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<(), ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// Atomically claims a cart for checkout: `active -> checked_out`,
    /// conditional on the cart still being active. Exactly one of any number
    /// of concurrent claimants succeeds; the rest observe
    /// `CartAlreadyCheckedOut`.
    pub async fn claim<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = Cart::update_many()
            .col_expr(cart::Column::Status, Expr::value(CartStatus::CheckedOut))
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(cart_id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::CartAlreadyCheckedOut);
        }

        Ok(())
    }

    /// Purges carts that have seen no activity for the configured expiry
    /// window. Invoked by the housekeeping scheduler.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - Duration::days(self.config.checkout.cart_expiry_days);

        let stale = Cart::find()
            .filter(cart::Column::UpdatedAt.lt(cutoff))
            .all(&*self.db)
            .await?;

        let mut purged = 0u64;
        for cart in stale {
            self.clear_items(&*self.db, cart.id).await?;
            cart.delete(&*self.db).await?;
            purged += 1;
        }

        if purged > 0 {
            info!(purged = purged, "Purged expired carts");
            self.event_sender
                .send_or_log(Event::CartsPurged { count: purged })
                .await;
        }

        Ok(purged)
    }

    async fn active_cart(&self, session_id: &str) -> Result<CartModel, ServiceError> {
        let cart = Cart::find()
            .filter(cart::Column::SessionId.eq(session_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart for session {}", session_id)))?;

        if cart.status != CartStatus::Active {
            return Err(ServiceError::CartAlreadyCheckedOut);
        }

        Ok(cart)
    }

    async fn touch(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        Cart::update_many()
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(cart_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
