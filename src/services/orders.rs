use crate::{
    config::AppConfig,
    entities::{
        order, order_item, FulfillmentStatus, Order, OrderItemModel, OrderModel, PaymentMethod,
        PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{inventory::InventoryService, pricing::PricedLine},
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Input for persisting a new order with its priced snapshot.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: Option<Uuid>,
    pub email: String,
    pub phone_number: String,
    pub country: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub delivery_address: Option<String>,
    pub delivery_city: Option<String>,
    pub delivery_postal_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub currency: String,
    pub shipping_cost: Decimal,
    pub total_price: Decimal,
    pub lines: Vec<PricedLine>,
}

/// Externally-safe order representation. Internal ids and gateway handoff
/// material never appear here.
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub reference: String,
    pub email: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub currency: String,
    pub shipping_cost: Decimal,
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub variant_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl OrderResponse {
    pub fn from_model(order: OrderModel, items: Vec<OrderItemModel>) -> Self {
        Self {
            reference: order.reference,
            email: order.email,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            fulfillment_status: order.fulfillment_status,
            currency: order.currency,
            shipping_cost: order.shipping_cost,
            total_price: order.total_price,
            created_at: order.created_at,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    variant_id: item.variant_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    line_total: item.line_total,
                })
                .collect(),
        }
    }
}

/// The order aggregate. Owns every write to `payment_status` and
/// `fulfillment_status`: all transitions are applied as conditional versioned
/// updates, so concurrent or replayed attempts against the same order cannot
/// interleave into an inconsistent state.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    inventory: Arc<InventoryService>,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        inventory: Arc<InventoryService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            inventory,
            config,
        }
    }

    /// Persists an order and its snapshot lines on the caller's connection
    /// (the checkout transaction), in `pending` state for gateway methods and
    /// `unpaid` for offline ones.
    #[instrument(skip(self, conn, new_order), fields(email = %new_order.email))]
    pub async fn insert_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        new_order: NewOrder,
    ) -> Result<OrderModel, ServiceError> {
        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let initial_status = if new_order.payment_method.is_offline() {
            PaymentStatus::Unpaid
        } else {
            PaymentStatus::Pending
        };

        let model = order::ActiveModel {
            id: Set(order_id),
            reference: Set(order::generate_reference()),
            customer_id: Set(new_order.customer_id),
            email: Set(new_order.email),
            phone_number: Set(new_order.phone_number),
            country: Set(new_order.country),
            address: Set(new_order.address),
            city: Set(new_order.city),
            postal_code: Set(new_order.postal_code),
            delivery_address: Set(new_order.delivery_address),
            delivery_city: Set(new_order.delivery_city),
            delivery_postal_code: Set(new_order.delivery_postal_code),
            payment_method: Set(new_order.payment_method),
            payment_status: Set(initial_status),
            fulfillment_status: Set(FulfillmentStatus::Placed),
            currency: Set(new_order.currency),
            shipping_cost: Set(new_order.shipping_cost),
            total_price: Set(new_order.total_price),
            gateway_transaction_id: Set(None),
            gateway_client_secret: Set(None),
            gateway_approval_url: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let order = model.insert(conn).await?;

        for line in &new_order.lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                variant_id: Set(line.variant_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.line_total),
            };
            item.insert(conn).await?;
        }

        info!(order_id = %order_id, reference = %order.reference, "Order persisted");
        Ok(order)
    }

    /// Loads an order by its externally-visible reference.
    pub async fn get_by_reference(&self, reference: &str) -> Result<OrderModel, ServiceError> {
        Order::find()
            .filter(order::Column::Reference.eq(reference))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {}", reference)))
    }

    /// Loads an order and its immutable snapshot lines.
    pub async fn get_with_items(
        &self,
        reference: &str,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let order = self.get_by_reference(reference).await?;
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;
        Ok((order, items))
    }

    /// Customer order history, newest first.
    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::CustomerId.eq(Some(customer_id)))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    /// Records the gateway handoff (transaction id plus client secret or
    /// approval URL) after intent creation. Not a status transition.
    pub async fn attach_gateway_handoff(
        &self,
        order_id: Uuid,
        transaction_id: &str,
        client_secret: Option<&str>,
        approval_url: Option<&str>,
    ) -> Result<(), ServiceError> {
        Order::update_many()
            .col_expr(
                order::Column::GatewayTransactionId,
                Expr::value(Some(transaction_id.to_string())),
            )
            .col_expr(
                order::Column::GatewayClientSecret,
                Expr::value(client_secret.map(|s| s.to_string())),
            )
            .col_expr(
                order::Column::GatewayApprovalUrl,
                Expr::value(approval_url.map(|s| s.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// `pending|unpaid -> paid`. Applied exactly once; a lost race surfaces as
    /// `ConcurrentModification` for the caller to resolve against fresh state.
    #[instrument(skip(self, order), fields(reference = %order.reference))]
    pub async fn mark_paid(
        &self,
        order: &OrderModel,
        transaction_id: &str,
    ) -> Result<OrderModel, ServiceError> {
        self.apply_payment_transition(
            &*self.db,
            order,
            PaymentStatus::Paid,
            Some(transaction_id),
        )
        .await?;

        self.event_sender
            .send_or_log(Event::OrderPaid {
                order_id: order.id,
                transaction_id: transaction_id.to_string(),
            })
            .await;

        self.get_by_reference(&order.reference).await
    }

    /// `pending|unpaid -> failed`, releasing the order's reserved stock in the
    /// same transaction as the transition.
    #[instrument(skip(self, order), fields(reference = %order.reference))]
    pub async fn mark_failed(
        &self,
        order: &OrderModel,
        transaction_id: Option<&str>,
        reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;
        self.apply_payment_transition(&txn, order, PaymentStatus::Failed, transaction_id)
            .await?;
        self.inventory.release_order_lines(&txn, order.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderPaymentFailed {
                order_id: order.id,
                reason,
            })
            .await;

        self.get_by_reference(&order.reference).await
    }

    /// `paid -> refunded`. Money-only: fulfillment and stock are untouched;
    /// a refunded order can still have been delivered.
    #[instrument(skip(self, order), fields(reference = %order.reference))]
    pub async fn mark_refunded(
        &self,
        order: &OrderModel,
        refund_transaction_id: &str,
    ) -> Result<OrderModel, ServiceError> {
        self.apply_payment_transition(&*self.db, order, PaymentStatus::Refunded, None)
            .await?;

        self.event_sender
            .send_or_log(Event::OrderRefunded {
                order_id: order.id,
                transaction_id: refund_transaction_id.to_string(),
            })
            .await;

        self.get_by_reference(&order.reference).await
    }

    /// Advances the fulfillment axis one step. Cancellation goes through
    /// `cancel`, which owns the payment-side policy.
    #[instrument(skip(self))]
    pub async fn update_fulfillment(
        &self,
        reference: &str,
        target: FulfillmentStatus,
    ) -> Result<OrderModel, ServiceError> {
        if target == FulfillmentStatus::Cancelled {
            return self.cancel(reference).await;
        }

        let order = self.get_by_reference(reference).await?;
        if !order.fulfillment_status.can_transition_to(target) {
            return Err(ServiceError::InvalidTransition(format!(
                "fulfillment {} -> {}",
                order.fulfillment_status, target
            )));
        }

        let result = Order::update_many()
            .col_expr(order::Column::FulfillmentStatus, Expr::value(target))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order.id));
        }

        self.event_sender
            .send_or_log(Event::OrderFulfillmentChanged {
                order_id: order.id,
                old_status: order.fulfillment_status.to_string(),
                new_status: target.to_string(),
            })
            .await;

        self.get_by_reference(reference).await
    }

    /// Cancels an order. Allowed from `placed`/`processing` while payment is
    /// not yet `paid`, or within the configured window after payment. Releases
    /// reserved stock; a pending charge is failed so a late gateway success
    /// cannot resurrect the order.
    #[instrument(skip(self))]
    pub async fn cancel(&self, reference: &str) -> Result<OrderModel, ServiceError> {
        let order = self.get_by_reference(reference).await?;

        if !order
            .fulfillment_status
            .can_transition_to(FulfillmentStatus::Cancelled)
        {
            return Err(ServiceError::InvalidTransition(format!(
                "fulfillment {} -> cancelled",
                order.fulfillment_status
            )));
        }

        let (fail_payment, release_stock) = match order.payment_status {
            PaymentStatus::Unpaid => (true, true),
            PaymentStatus::Pending => (true, true),
            PaymentStatus::Paid => {
                let paid_at = order.updated_at.unwrap_or(order.created_at);
                let window = Duration::minutes(self.config.checkout.cancellation_window_mins);
                if Utc::now() - paid_at > window {
                    return Err(ServiceError::InvalidTransition(
                        "cancellation window for a paid order has closed".to_string(),
                    ));
                }
                (false, true)
            }
            // Stock already released when the payment failed
            PaymentStatus::Failed => (false, false),
            PaymentStatus::Refunded => {
                return Err(ServiceError::InvalidTransition(
                    "refunded orders cannot be cancelled".to_string(),
                ));
            }
        };

        let txn = self.db.begin().await?;

        let result = Order::update_many()
            .col_expr(
                order::Column::FulfillmentStatus,
                Expr::value(FulfillmentStatus::Cancelled),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order.id));
        }

        if fail_payment {
            // Version advanced by one just above
            let mut current = order.clone();
            current.version += 1;
            self.apply_payment_transition(&txn, &current, PaymentStatus::Failed, None)
                .await?;
        }

        if release_stock {
            self.inventory.release_order_lines(&txn, order.id).await?;
        }

        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderCancelled(order.id)).await;

        self.get_by_reference(reference).await
    }

    /// Fails every order still `pending` past the configured timeout and
    /// returns its stock. The backstop against indefinitely-held reservations
    /// from abandoned payment flows; invoked by the housekeeping scheduler.
    #[instrument(skip(self))]
    pub async fn expire_stale_pending(&self) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - Duration::minutes(self.config.checkout.pending_timeout_mins);

        let stale = Order::find()
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .filter(order::Column::CreatedAt.lt(cutoff))
            .all(&*self.db)
            .await?;

        let mut expired = 0u64;
        for order in stale {
            let txn = self.db.begin().await?;
            match self
                .apply_payment_transition(&txn, &order, PaymentStatus::Failed, None)
                .await
            {
                Ok(()) => {
                    self.inventory.release_order_lines(&txn, order.id).await?;
                    txn.commit().await?;
                    expired += 1;
                    info!(reference = %order.reference, "Expired stale pending order");
                }
                Err(ServiceError::ConcurrentModification(_)) => {
                    // A webhook settled this order while the sweep was running
                    warn!(reference = %order.reference, "Skipping order settled during sweep");
                }
                Err(e) => return Err(e),
            }
        }

        if expired > 0 {
            self.event_sender
                .send_or_log(Event::StalePendingOrdersExpired {
                    count: expired,
                    cutoff,
                })
                .await;
        }

        Ok(expired)
    }

    /// Sum of the order's snapshot lines. `total_price` must always equal this
    /// plus `shipping_cost`.
    pub async fn line_total_sum(&self, order_id: Uuid) -> Result<Decimal, ServiceError> {
        let lines = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok(lines.iter().map(|l| l.line_total).sum())
    }

    /// Applies a guarded payment transition as one conditional update: the
    /// state-machine check runs in code, the write is fenced on (id, version,
    /// current status) so exactly one of any concurrent applications wins.
    async fn apply_payment_transition<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &OrderModel,
        target: PaymentStatus,
        transaction_id: Option<&str>,
    ) -> Result<(), ServiceError> {
        if !order.payment_status.can_transition_to(target) {
            return Err(ServiceError::InvalidTransition(format!(
                "payment {} -> {}",
                order.payment_status, target
            )));
        }

        let mut update = Order::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(target))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .filter(order::Column::PaymentStatus.eq(order.payment_status));

        if let Some(txn_id) = transaction_id {
            update = update.col_expr(
                order::Column::GatewayTransactionId,
                Expr::value(Some(txn_id.to_string())),
            );
        }

        let result = update.exec(conn).await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order.id));
        }

        Ok(())
    }
}
