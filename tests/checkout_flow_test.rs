//! Integration tests for the checkout orchestrator: pricing verification,
//! atomicity of the cart claim + reservations + order snapshot, and the
//! failure paths that must leave no partial state behind.

mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use common::TestCtx;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use storefront_api::{
    entities::{cart, cart_item, Cart, CartStatus, FulfillmentStatus, Order, PaymentStatus},
    errors::ServiceError,
};
use uuid::Uuid;

#[tokio::test]
async fn scenario_a_checkout_totals_match_server_computation() {
    let ctx = TestCtx::new().await;

    // 2 units at 10.00 and 1 unit at 5.00, flat shipping 10.00 -> 35.00
    let variant_a = ctx.seed_variant(dec!(10.00), None, 10).await;
    let variant_b = ctx.seed_variant(dec!(5.00), None, 10).await;
    ctx.seed_cart("sess-a", &[(variant_a, 2), (variant_b, 1)]).await;

    let outcome = ctx
        .services
        .checkout
        .checkout(ctx.checkout_input("sess-a", dec!(35.00)))
        .await
        .expect("checkout should succeed");

    assert_eq!(outcome.total_price, dec!(35.00));
    assert_eq!(outcome.payment_status, PaymentStatus::Unpaid);

    let (order, items) = ctx
        .services
        .orders
        .get_with_items(&outcome.reference)
        .await
        .unwrap();
    assert_eq!(order.shipping_cost, dec!(10.00));
    assert_eq!(order.fulfillment_status, FulfillmentStatus::Placed);
    assert_eq!(items.len(), 2);

    // Stock was reserved
    assert_eq!(ctx.stock_of(variant_a).await, 8);
    assert_eq!(ctx.stock_of(variant_b).await, 9);

    // Cart was consumed: claimed and emptied
    let cart_row = Cart::find()
        .filter(cart::Column::SessionId.eq("sess-a"))
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cart_row.status, CartStatus::CheckedOut);
    let remaining_items = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_row.id))
        .count(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(remaining_items, 0);
}

#[tokio::test]
async fn scenario_a_price_mismatch_rejected_before_any_side_effect() {
    let ctx = TestCtx::new().await;

    let variant_a = ctx.seed_variant(dec!(10.00), None, 10).await;
    let variant_b = ctx.seed_variant(dec!(5.00), None, 10).await;
    ctx.seed_cart("sess-b", &[(variant_a, 2), (variant_b, 1)]).await;

    let err = ctx
        .services
        .checkout
        .checkout(ctx.checkout_input("sess-b", dec!(30.00)))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::PriceMismatch { expected, declared } if expected == dec!(35.00) && declared == dec!(30.00)
    );

    // No order, no reservation, cart untouched
    assert_eq!(Order::find().count(&*ctx.db).await.unwrap(), 0);
    assert_eq!(ctx.stock_of(variant_a).await, 10);
    assert_eq!(ctx.stock_of(variant_b).await, 10);

    let cart_row = Cart::find()
        .filter(cart::Column::SessionId.eq("sess-b"))
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cart_row.status, CartStatus::Active);
}

#[tokio::test]
async fn discounted_unit_price_flows_into_the_snapshot() {
    let ctx = TestCtx::new().await;

    let variant = ctx.seed_variant(dec!(20.00), Some(dec!(15.00)), 5).await;
    ctx.seed_cart("sess-disc", &[(variant, 2)]).await;

    // 2 * 15.00 + 10.00 shipping
    let outcome = ctx
        .services
        .checkout
        .checkout(ctx.checkout_input("sess-disc", dec!(40.00)))
        .await
        .expect("discounted checkout");

    let (_, items) = ctx
        .services
        .orders
        .get_with_items(&outcome.reference)
        .await
        .unwrap();
    assert_eq!(items[0].unit_price, dec!(15.00));
    assert_eq!(items[0].line_total, dec!(30.00));
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let ctx = TestCtx::new().await;
    ctx.seed_cart("sess-empty", &[]).await;

    let err = ctx
        .services
        .checkout
        .checkout(ctx.checkout_input("sess-empty", dec!(10.00)))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::EmptyCart);
}

#[tokio::test]
async fn malformed_customer_input_fails_before_reservation() {
    let ctx = TestCtx::new().await;

    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;
    ctx.seed_cart("sess-bad-email", &[(variant, 1)]).await;

    let mut input = ctx.checkout_input("sess-bad-email", dec!(20.00));
    input.email = "not-an-email".to_string();

    let err = ctx.services.checkout.checkout(input).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidInput(_));
    assert_eq!(ctx.stock_of(variant).await, 5);
}

#[tokio::test]
async fn cart_quantity_bounds_are_enforced() {
    let ctx = TestCtx::new().await;
    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;
    ctx.seed_cart("sess-bounds", &[]).await;

    let zero = ctx
        .services
        .carts
        .upsert_item("sess-bounds", variant, 0)
        .await
        .unwrap_err();
    assert_matches!(zero, ServiceError::InvalidInput(_));

    // 1000 exceeds the 999 cap: rejected, not clamped
    let over = ctx
        .services
        .carts
        .upsert_item("sess-bounds", variant, 1000)
        .await
        .unwrap_err();
    assert_matches!(over, ServiceError::InvalidInput(_));

    assert!(ctx
        .services
        .carts
        .upsert_item("sess-bounds", variant, 999)
        .await
        .is_ok());
}

#[tokio::test]
async fn oversized_line_smuggled_into_the_cart_is_rejected_before_reservation() {
    let ctx = TestCtx::new().await;

    let variant = ctx.seed_variant(dec!(1.00), None, 2000).await;
    ctx.seed_cart("sess-smuggle", &[]).await;

    // Write the row directly, bypassing the cart service's own cap
    let cart_row = Cart::find()
        .filter(cart::Column::SessionId.eq("sess-smuggle"))
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    let now = Utc::now();
    cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        cart_id: Set(cart_row.id),
        variant_id: Set(variant),
        quantity: Set(1000),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*ctx.db)
    .await
    .unwrap();

    let err = ctx
        .services
        .checkout
        .checkout(ctx.checkout_input("sess-smuggle", dec!(1010.00)))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InvalidInput(_));
    assert_eq!(ctx.stock_of(variant).await, 2000);
}

#[tokio::test]
async fn scenario_b_double_submit_creates_exactly_one_order() {
    let ctx = TestCtx::new().await;

    let variant = ctx.seed_variant(dec!(10.00), None, 10).await;
    ctx.seed_cart("sess-race", &[(variant, 1)]).await;

    let first = ctx
        .services
        .checkout
        .checkout(ctx.checkout_input("sess-race", dec!(20.00)));
    let second = ctx
        .services
        .checkout
        .checkout(ctx.checkout_input("sess-race", dec!(20.00)));

    let (r1, r2) = tokio::join!(first, second);

    let successes = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one concurrent checkout may succeed");

    let failure = if r1.is_err() { r1.unwrap_err() } else { r2.unwrap_err() };
    assert_matches!(failure, ServiceError::CartAlreadyCheckedOut);

    assert_eq!(Order::find().count(&*ctx.db).await.unwrap(), 1);
    assert_eq!(ctx.stock_of(variant).await, 9);
}

#[tokio::test]
async fn failed_reservation_rolls_back_every_sibling_line() {
    let ctx = TestCtx::new().await;

    let plenty = ctx.seed_variant(dec!(10.00), None, 5).await;
    let scarce = ctx.seed_variant(dec!(5.00), None, 1).await;
    ctx.seed_cart("sess-oos", &[(plenty, 2), (scarce, 2)]).await;

    let err = ctx
        .services
        .checkout
        .checkout(ctx.checkout_input("sess-oos", dec!(40.00)))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::OutOfStock(ref v) if v == &scarce.to_string());

    // No partial reservation survives, the cart claim rolled back too
    assert_eq!(ctx.stock_of(plenty).await, 5);
    assert_eq!(ctx.stock_of(scarce).await, 1);
    assert_eq!(Order::find().count(&*ctx.db).await.unwrap(), 0);

    let cart_row = Cart::find()
        .filter(cart::Column::SessionId.eq("sess-oos"))
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cart_row.status, CartStatus::Active);
}

#[tokio::test]
async fn order_total_always_equals_snapshot_sum_plus_shipping() {
    let ctx = TestCtx::new().await;

    let variant_a = ctx.seed_variant(dec!(12.49), None, 10).await;
    let variant_b = ctx.seed_variant(dec!(99.90), Some(dec!(79.90)), 10).await;
    ctx.seed_cart("sess-roundtrip", &[(variant_a, 3), (variant_b, 2)]).await;

    // 3 * 12.49 + 2 * 79.90 + 10.00
    let outcome = ctx
        .services
        .checkout
        .checkout(ctx.checkout_input("sess-roundtrip", dec!(207.27)))
        .await
        .expect("checkout");

    let order = ctx
        .services
        .orders
        .get_by_reference(&outcome.reference)
        .await
        .unwrap();
    let line_sum = ctx.services.orders.line_total_sum(order.id).await.unwrap();

    assert_eq!(order.total_price, line_sum + order.shipping_cost);
}

#[tokio::test]
async fn unknown_variant_in_cart_fails_checkout() {
    let ctx = TestCtx::new().await;

    let variant = ctx.seed_variant(dec!(10.00), None, 5).await;
    ctx.seed_cart("sess-unknown", &[(variant, 1)]).await;

    // Variant vanishes from the catalog after it was added to the cart
    storefront_api::entities::VariantStock::delete_by_id(variant)
        .exec(&*ctx.db)
        .await
        .unwrap();
    storefront_api::entities::ProductVariant::delete_by_id(variant)
        .exec(&*ctx.db)
        .await
        .unwrap();

    let err = ctx
        .services
        .checkout
        .checkout(ctx.checkout_input("sess-unknown", dec!(20.00)))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::UnknownVariant(v) if v == variant);
}

#[tokio::test]
async fn zero_stock_variant_is_unavailable_at_pricing_time() {
    let ctx = TestCtx::new().await;

    let variant = ctx.seed_variant(dec!(10.00), None, 0).await;
    ctx.seed_cart("sess-zero", &[(variant, 1)]).await;

    let err = ctx
        .services
        .checkout
        .checkout(ctx.checkout_input("sess-zero", dec!(20.00)))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::VariantUnavailable(v) if v == variant);
}
