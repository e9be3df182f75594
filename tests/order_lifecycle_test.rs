//! Integration tests for the order aggregate's lifecycle: the stale-pending
//! sweep, fulfillment progression, cancellation policy and cart expiry.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestCtx;
use rust_decimal_macros::dec;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use storefront_api::{
    entities::{cart, order, Cart, FulfillmentStatus, Order, PaymentMethod, PaymentStatus},
    errors::ServiceError,
};

async fn age_order(ctx: &TestCtx, reference: &str, minutes: i64) {
    Order::update_many()
        .col_expr(
            order::Column::CreatedAt,
            Expr::value(Utc::now() - Duration::minutes(minutes)),
        )
        .filter(order::Column::Reference.eq(reference))
        .exec(&*ctx.db)
        .await
        .expect("age order");
}

#[tokio::test]
async fn scenario_d_stale_pending_orders_fail_and_stock_returns() {
    let ctx = TestCtx::new().await;
    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;
    let order = ctx
        .place_order(&[(variant, 3, dec!(10.00))], PaymentMethod::Card)
        .await;
    assert_eq!(ctx.stock_of(variant).await, 2);

    // No webhook ever arrives; the order ages past the 30 minute timeout
    age_order(&ctx, &order.reference, 45).await;

    let expired = ctx.services.orders.expire_stale_pending().await.unwrap();
    assert_eq!(expired, 1);

    let fresh = ctx
        .services
        .orders
        .get_by_reference(&order.reference)
        .await
        .unwrap();
    assert_eq!(fresh.payment_status, PaymentStatus::Failed);
    assert_eq!(ctx.stock_of(variant).await, 5, "reserved stock is available again");
}

#[tokio::test]
async fn sweep_leaves_fresh_pending_orders_alone() {
    let ctx = TestCtx::new().await;
    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;
    let order = ctx
        .place_order(&[(variant, 1, dec!(10.00))], PaymentMethod::Card)
        .await;

    let expired = ctx.services.orders.expire_stale_pending().await.unwrap();
    assert_eq!(expired, 0);

    let fresh = ctx
        .services
        .orders
        .get_by_reference(&order.reference)
        .await
        .unwrap();
    assert_eq!(fresh.payment_status, PaymentStatus::Pending);
    assert_eq!(ctx.stock_of(variant).await, 4);
}

#[tokio::test]
async fn sweep_does_not_touch_settled_orders() {
    let ctx = TestCtx::new().await;
    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;
    let order = ctx
        .place_order(&[(variant, 1, dec!(10.00))], PaymentMethod::Card)
        .await;

    let paid = ctx.services.orders.mark_paid(&order, "pi_settled").await.unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);

    age_order(&ctx, &order.reference, 120).await;

    let expired = ctx.services.orders.expire_stale_pending().await.unwrap();
    assert_eq!(expired, 0);

    let fresh = ctx
        .services
        .orders
        .get_by_reference(&order.reference)
        .await
        .unwrap();
    assert_eq!(fresh.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn fulfillment_progresses_one_step_at_a_time() {
    let ctx = TestCtx::new().await;
    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;
    let order = ctx
        .place_order(&[(variant, 1, dec!(10.00))], PaymentMethod::Card)
        .await;
    ctx.services.orders.mark_paid(&order, "pi_ship").await.unwrap();

    // Skipping processing is forbidden
    let err = ctx
        .services
        .orders
        .update_fulfillment(&order.reference, FulfillmentStatus::Shipped)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));

    for status in [
        FulfillmentStatus::Processing,
        FulfillmentStatus::Shipped,
        FulfillmentStatus::Delivered,
    ] {
        let updated = ctx
            .services
            .orders
            .update_fulfillment(&order.reference, status)
            .await
            .unwrap();
        assert_eq!(updated.fulfillment_status, status);
    }

    // Terminal: no further movement
    let err = ctx
        .services
        .orders
        .update_fulfillment(&order.reference, FulfillmentStatus::Processing)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn cancelling_a_pending_order_fails_the_charge_and_restocks() {
    let ctx = TestCtx::new().await;
    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;
    let order = ctx
        .place_order(&[(variant, 2, dec!(10.00))], PaymentMethod::Card)
        .await;
    assert_eq!(ctx.stock_of(variant).await, 3);

    let cancelled = ctx.services.orders.cancel(&order.reference).await.unwrap();
    assert_eq!(cancelled.fulfillment_status, FulfillmentStatus::Cancelled);
    // A late gateway success cannot resurrect a cancelled order
    assert_eq!(cancelled.payment_status, PaymentStatus::Failed);
    assert_eq!(ctx.stock_of(variant).await, 5);
}

#[tokio::test]
async fn paid_order_cancels_only_within_the_window() {
    let ctx = TestCtx::new().await;
    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;

    // Within the window: allowed, stock returns, payment stays paid
    let order = ctx
        .place_order(&[(variant, 1, dec!(10.00))], PaymentMethod::Card)
        .await;
    let paid = ctx.services.orders.mark_paid(&order, "pi_win").await.unwrap();
    let cancelled = ctx.services.orders.cancel(&paid.reference).await.unwrap();
    assert_eq!(cancelled.fulfillment_status, FulfillmentStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Paid);
    assert_eq!(ctx.stock_of(variant).await, 5);

    // Past the window: refused
    let order = ctx
        .place_order(&[(variant, 1, dec!(10.00))], PaymentMethod::Card)
        .await;
    ctx.services.orders.mark_paid(&order, "pi_late").await.unwrap();
    Order::update_many()
        .col_expr(
            order::Column::UpdatedAt,
            Expr::value(Utc::now() - Duration::minutes(90)),
        )
        .filter(order::Column::Reference.eq(order.reference.as_str()))
        .exec(&*ctx.db)
        .await
        .unwrap();

    let err = ctx.services.orders.cancel(&order.reference).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn shipped_orders_cannot_be_cancelled() {
    let ctx = TestCtx::new().await;
    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;
    let order = ctx
        .place_order(&[(variant, 1, dec!(10.00))], PaymentMethod::Card)
        .await;
    ctx.services.orders.mark_paid(&order, "pi_shipped").await.unwrap();
    ctx.services
        .orders
        .update_fulfillment(&order.reference, FulfillmentStatus::Processing)
        .await
        .unwrap();
    ctx.services
        .orders
        .update_fulfillment(&order.reference, FulfillmentStatus::Shipped)
        .await
        .unwrap();

    let err = ctx.services.orders.cancel(&order.reference).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn refund_only_moves_paid_orders() {
    let ctx = TestCtx::new().await;
    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;
    let order = ctx
        .place_order(&[(variant, 1, dec!(10.00))], PaymentMethod::Card)
        .await;

    let err = ctx
        .services
        .orders
        .mark_refunded(&order, "re_early")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));

    let paid = ctx.services.orders.mark_paid(&order, "pi_refund").await.unwrap();
    let refunded = ctx
        .services
        .orders
        .mark_refunded(&paid, "re_ok")
        .await
        .unwrap();
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn offline_orders_start_unpaid_and_settle_later() {
    let ctx = TestCtx::new().await;
    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;
    let order = ctx
        .place_order(&[(variant, 1, dec!(10.00))], PaymentMethod::CashOnDelivery)
        .await;

    assert_eq!(order.payment_status, PaymentStatus::Unpaid);

    // Driver collects the cash on delivery; ops records the settlement
    let paid = ctx
        .services
        .orders
        .mark_paid(&order, "cod-receipt-1")
        .await
        .unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn customer_history_lists_newest_first() {
    let ctx = TestCtx::new().await;
    let variant = ctx.seed_variant(dec!(10.00), None, 20).await;
    let customer = uuid::Uuid::new_v4();

    let mut references = Vec::new();
    for minutes_ago in [30i64, 20, 10] {
        let order = ctx
            .place_order(&[(variant, 1, dec!(10.00))], PaymentMethod::Card)
            .await;
        Order::update_many()
            .col_expr(order::Column::CustomerId, Expr::value(Some(customer)))
            .col_expr(
                order::Column::CreatedAt,
                Expr::value(Utc::now() - Duration::minutes(minutes_ago)),
            )
            .filter(order::Column::Reference.eq(order.reference.as_str()))
            .exec(&*ctx.db)
            .await
            .unwrap();
        references.push(order.reference);
    }

    let (orders, total) = ctx
        .services
        .orders
        .list_for_customer(customer, 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 3);
    let listed: Vec<&str> = orders.iter().map(|o| o.reference.as_str()).collect();
    let newest_first: Vec<&str> = references.iter().rev().map(String::as_str).collect();
    assert_eq!(listed, newest_first);
}

#[tokio::test]
async fn expired_carts_are_purged_by_the_sweep() {
    let ctx = TestCtx::new().await;
    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;

    ctx.seed_cart("sess-stale", &[(variant, 1)]).await;
    ctx.seed_cart("sess-fresh", &[(variant, 1)]).await;

    // 9 days idle, past the 8 day expiry
    Cart::update_many()
        .col_expr(
            cart::Column::UpdatedAt,
            Expr::value(Utc::now() - Duration::days(9)),
        )
        .filter(cart::Column::SessionId.eq("sess-stale"))
        .exec(&*ctx.db)
        .await
        .unwrap();

    let purged = ctx.services.carts.purge_expired().await.unwrap();
    assert_eq!(purged, 1);

    assert_eq!(
        Cart::find().count(&*ctx.db).await.unwrap(),
        1,
        "only the fresh cart survives"
    );
    assert!(ctx.services.carts.get_with_items("sess-fresh").await.is_ok());
    assert!(ctx.services.carts.get_with_items("sess-stale").await.is_err());
}
