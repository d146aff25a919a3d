mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;

use storefront_core::{
    entities::{LedgerReason, OrderStatus},
    services::cart::AddItemInput,
    ServiceError,
};

use common::{
    assert_ledger_replays, checkout_input, customer, guest, ledger_entries, seed_variant,
    set_price, setup, stock_of,
};

fn add(variant: &storefront_core::entities::ProductVariantModel, quantity: i32) -> AddItemInput {
    AddItemInput {
        product_id: variant.product_id,
        variant_id: variant.id,
        quantity,
    }
}

#[tokio::test]
async fn checkout_debits_stock_and_freezes_totals() {
    let app = setup().await;
    let variant = seed_variant(&app, dec!(10.00), 5).await;
    let identity = customer();

    app.services
        .carts
        .for_identity(&identity)
        .add_item(&identity, add(&variant, 5))
        .await
        .unwrap();

    let order = app
        .services
        .orders
        .create_order(&identity, checkout_input())
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.customer_id, identity.customer_id());
    // $50 subtotal hits the free shipping threshold; 8% tax applies.
    assert_eq!(order.subtotal, dec!(50.00));
    assert_eq!(order.shipping_amount, dec!(0));
    assert_eq!(order.tax_amount, dec!(4.00));
    assert_eq!(order.total_amount, dec!(54.00));
    assert_eq!(order.currency, "USD");

    assert_eq!(stock_of(&app, variant.id).await, 0);
    let entries = ledger_entries(&app, variant.id).await;
    let sale = entries.last().unwrap();
    assert_eq!(sale.reason, LedgerReason::Sale);
    assert_eq!(sale.delta, -5);
    assert_eq!(sale.quantity_after, 0);
    assert_eq!(sale.reference_type.as_deref(), Some("order_item"));
    assert_ledger_replays(&app, variant.id).await;
}

#[tokio::test]
async fn checkout_clears_the_cart() {
    let app = setup().await;
    let variant = seed_variant(&app, dec!(10.00), 5).await;
    let identity = guest();

    app.services
        .carts
        .for_identity(&identity)
        .add_item(&identity, add(&variant, 1))
        .await
        .unwrap();
    app.services
        .orders
        .create_order(&identity, checkout_input())
        .await
        .unwrap();

    let view = app
        .services
        .carts
        .for_identity(&identity)
        .get(&identity)
        .await
        .unwrap();
    assert!(view.is_empty());
}

#[tokio::test]
async fn checkout_of_an_empty_cart_is_rejected() {
    let app = setup().await;
    let identity = customer();

    let err = app
        .services
        .orders
        .create_order(&identity, checkout_input())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::EmptyCart);
}

#[tokio::test]
async fn one_bad_line_rejects_the_whole_checkout_and_touches_nothing() {
    let app = setup().await;
    let plenty = seed_variant(&app, dec!(10.00), 10).await;
    let scarce = seed_variant(&app, dec!(20.00), 3).await;
    let identity = customer();
    let store = app.services.carts.for_identity(&identity);

    store.add_item(&identity, add(&plenty, 2)).await.unwrap();
    store.add_item(&identity, add(&scarce, 3)).await.unwrap();

    // Stock moves between add and checkout.
    app.services
        .ledger
        .adjust(
            scarce.id,
            -2,
            LedgerReason::ManualAdjustment,
            storefront_core::services::stock_ledger::Actor::System,
        )
        .await
        .unwrap();

    let err = app
        .services
        .orders
        .create_order(&identity, checkout_input())
        .await
        .unwrap_err();

    // Only the scarce line is named.
    match err {
        ServiceError::InvalidCartItems(lines) => {
            assert_eq!(lines.len(), 1);
            assert_eq!(lines[0].variant_id, scarce.id);
            assert_eq!(lines[0].requested, 3);
            assert_eq!(lines[0].available, 1);
        }
        other => panic!("expected InvalidCartItems, got {:?}", other),
    }

    // No order was written and no stock moved.
    let (orders, total) = app.services.orders.list_orders(None, 1, 10).await.unwrap();
    assert!(orders.is_empty());
    assert_eq!(total, 0);
    assert_eq!(stock_of(&app, plenty.id).await, 10);
    assert_eq!(stock_of(&app, scarce.id).await, 1);

    // The cart survives for the buyer to fix.
    assert_eq!(store.get(&identity).await.unwrap().lines.len(), 2);
}

#[tokio::test]
async fn order_totals_survive_later_price_changes() {
    let app = setup().await;
    let variant = seed_variant(&app, dec!(10.00), 10).await;
    let identity = customer();

    app.services
        .carts
        .for_identity(&identity)
        .add_item(&identity, add(&variant, 2))
        .await
        .unwrap();
    let order = app
        .services
        .orders
        .create_order(&identity, checkout_input())
        .await
        .unwrap();

    set_price(&app, variant.id, dec!(99.00)).await;

    let reread = app.services.orders.get_order(order.id).await.unwrap();
    assert_eq!(reread.subtotal, dec!(20.00));
    let items = app.services.orders.get_order_items(order.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].unit_price, dec!(10.00));
    assert_eq!(items[0].line_total, dec!(20.00));
}

#[tokio::test]
async fn competing_checkouts_for_the_last_stock_admit_exactly_one() {
    let app = setup().await;
    let variant = seed_variant(&app, dec!(10.00), 3).await;

    let alice = customer();
    let bob = customer();
    app.services
        .carts
        .for_identity(&alice)
        .add_item(&alice, add(&variant, 3))
        .await
        .unwrap();
    app.services
        .carts
        .for_identity(&bob)
        .add_item(&bob, add(&variant, 3))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        app.services.orders.create_order(&alice, checkout_input()),
        app.services.orders.create_order(&bob, checkout_input()),
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1, "exactly one checkout may win the last stock");
    for result in [a, b] {
        if let Err(err) = result {
            assert!(err.is_business_outcome(), "loser failed with {:?}", err);
        }
    }

    assert_eq!(stock_of(&app, variant.id).await, 0);
    assert_ledger_replays(&app, variant.id).await;

    let (orders, total) = app.services.orders.list_orders(None, 1, 10).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(orders.len(), 1);
}

#[tokio::test]
async fn guest_orders_carry_the_session_not_a_customer() {
    let app = setup().await;
    let variant = seed_variant(&app, dec!(10.00), 5).await;
    let identity = guest();

    app.services
        .carts
        .for_identity(&identity)
        .add_item(&identity, add(&variant, 1))
        .await
        .unwrap();
    let order = app
        .services
        .orders
        .create_order(&identity, checkout_input())
        .await
        .unwrap();

    assert_eq!(order.customer_id, None);
    assert_eq!(order.guest_session.as_deref(), identity.guest_session());
    assert!(order.order_number.starts_with("ORD-"));
}

#[tokio::test]
async fn list_orders_filters_by_customer_and_paginates() {
    let app = setup().await;
    let variant = seed_variant(&app, dec!(10.00), 20).await;
    let alice = customer();
    let bob = customer();

    for identity in [&alice, &alice, &bob] {
        app.services
            .carts
            .for_identity(identity)
            .add_item(identity, add(&variant, 1))
            .await
            .unwrap();
        app.services
            .orders
            .create_order(identity, checkout_input())
            .await
            .unwrap();
    }

    let (all, total) = app.services.orders.list_orders(None, 1, 10).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(all.len(), 3);

    let (alices, total) = app
        .services
        .orders
        .list_orders(alice.customer_id(), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert!(alices.iter().all(|o| o.customer_id == alice.customer_id()));

    let (page, _) = app.services.orders.list_orders(None, 2, 2).await.unwrap();
    assert_eq!(page.len(), 1);
}
