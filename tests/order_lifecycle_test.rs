mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use uuid::Uuid;

use storefront_core::{
    entities::{LedgerReason, OrderModel, OrderStatus},
    services::{cart::AddItemInput, stock_ledger::Actor},
    ServiceError,
};

use common::{
    assert_ledger_replays, checkout_input, customer, ledger_entries, seed_variant, setup,
    stock_of, TestApp,
};

async fn place_order(app: &TestApp, variant_stock: i32, quantity: i32) -> (OrderModel, Uuid) {
    let variant = seed_variant(app, dec!(10.00), variant_stock).await;
    let identity = customer();
    app.services
        .carts
        .for_identity(&identity)
        .add_item(
            &identity,
            AddItemInput {
                product_id: variant.product_id,
                variant_id: variant.id,
                quantity,
            },
        )
        .await
        .unwrap();
    let order = app
        .services
        .orders
        .create_order(&identity, checkout_input())
        .await
        .unwrap();
    (order, variant.id)
}

fn admin() -> Actor {
    Actor::Admin(Uuid::new_v4())
}

#[tokio::test]
async fn cancellation_restocks_exactly_once() {
    let app = setup().await;
    let (order, variant_id) = place_order(&app, 5, 5).await;
    assert_eq!(stock_of(&app, variant_id).await, 0);

    let cancelled = app
        .services
        .status
        .transition(order.id, "cancelled", Some("buyer changed mind".into()), admin())
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&app, variant_id).await, 5);

    let entries = ledger_entries(&app, variant_id).await;
    let restock = entries.last().unwrap();
    assert_eq!(restock.reason, LedgerReason::CancellationReturn);
    assert_eq!(restock.delta, 5);
    assert_eq!(restock.quantity_after, 5);

    // Cancelled is terminal; a second cancel must not credit again.
    let err = app
        .services
        .status
        .transition(order.id, "cancelled", None, admin())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::IllegalTransition {
            from: OrderStatus::Cancelled,
            to: OrderStatus::Cancelled,
        }
    );
    assert_eq!(stock_of(&app, variant_id).await, 5);
    assert_eq!(ledger_entries(&app, variant_id).await.len(), entries.len());
    assert_ledger_replays(&app, variant_id).await;
}

#[tokio::test]
async fn refund_requires_processing_or_shipped() {
    let app = setup().await;
    let (order, _) = place_order(&app, 5, 2).await;

    let err = app
        .services
        .status
        .transition(order.id, "refunded", None, admin())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::IllegalTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Refunded,
        }
    );
}

#[tokio::test]
async fn refund_from_processing_restocks_with_refund_reason() {
    let app = setup().await;
    let (order, variant_id) = place_order(&app, 5, 3).await;

    app.services
        .status
        .transition(order.id, "processing", None, admin())
        .await
        .unwrap();
    let refunded = app
        .services
        .status
        .transition(order.id, "refunded", Some("damaged in transit".into()), admin())
        .await
        .unwrap();

    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert_eq!(stock_of(&app, variant_id).await, 5);
    let entries = ledger_entries(&app, variant_id).await;
    assert_eq!(entries.last().unwrap().reason, LedgerReason::RefundReturn);
    assert_ledger_replays(&app, variant_id).await;
}

#[tokio::test]
async fn delivered_orders_cannot_be_cancelled() {
    let app = setup().await;
    let (order, variant_id) = place_order(&app, 5, 2).await;

    app.services
        .status
        .transition(order.id, "delivered", None, admin())
        .await
        .unwrap();
    let err = app
        .services
        .status
        .transition(order.id, "cancelled", None, admin())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::IllegalTransition { .. });
    // Delivered means the stock stays sold.
    assert_eq!(stock_of(&app, variant_id).await, 3);
}

#[tokio::test]
async fn shipped_orders_can_still_be_cancelled_with_restock() {
    let app = setup().await;
    let (order, variant_id) = place_order(&app, 5, 2).await;

    app.services
        .status
        .transition(order.id, "processing", None, admin())
        .await
        .unwrap();
    app.services
        .status
        .transition(order.id, "shipped", None, admin())
        .await
        .unwrap();
    let cancelled = app
        .services
        .status
        .transition(order.id, "cancelled", Some("returned to sender".into()), admin())
        .await
        .unwrap();

    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&app, variant_id).await, 5);
}

#[tokio::test]
async fn carrier_confirmation_may_jump_to_delivered() {
    let app = setup().await;
    let (order, _) = place_order(&app, 5, 1).await;

    let delivered = app
        .services
        .status
        .transition(order.id, "delivered", None, Actor::System)
        .await
        .unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
}

#[tokio::test]
async fn unknown_order_and_unknown_status_are_distinct_errors() {
    let app = setup().await;
    let (order, _) = place_order(&app, 5, 1).await;

    let missing = Uuid::new_v4();
    let err = app
        .services
        .status
        .transition(missing, "processing", None, admin())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::UnknownOrder(id) if id == missing);

    let err = app
        .services
        .status
        .transition(order.id, "teleported", None, admin())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(s) if s == "teleported");

    // The rejected transitions left the order untouched.
    let reread = app.services.orders.get_order(order.id).await.unwrap();
    assert_eq!(reread.status, OrderStatus::Pending);
}

#[tokio::test]
async fn every_transition_appends_to_the_status_trail() {
    let app = setup().await;
    let (order, _) = place_order(&app, 5, 1).await;
    let acting = admin();

    app.services
        .status
        .transition(order.id, "processing", Some("payment captured".into()), acting)
        .await
        .unwrap();
    app.services
        .status
        .transition(order.id, "shipped", None, acting)
        .await
        .unwrap();

    let trail = app.services.status.history(order.id).await.unwrap();
    let statuses: Vec<OrderStatus> = trail.iter().map(|h| h.status).collect();
    assert_eq!(
        statuses,
        vec![
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
        ]
    );
    assert_eq!(trail[0].note.as_deref(), Some("Order created"));
    assert_eq!(trail[1].note.as_deref(), Some("payment captured"));
    assert_eq!(trail[1].actor_kind, "admin");
    assert_eq!(trail[1].actor_id, acting.id());
}

#[tokio::test]
async fn ledger_replays_across_a_full_lifecycle() {
    let app = setup().await;
    let (order, variant_id) = place_order(&app, 10, 4).await;

    app.services
        .status
        .transition(order.id, "processing", None, admin())
        .await
        .unwrap();
    app.services
        .status
        .transition(order.id, "refunded", None, admin())
        .await
        .unwrap();

    // seed +10, sale -4, refund +4
    let entries = ledger_entries(&app, variant_id).await;
    assert_eq!(entries.len(), 3);
    assert_eq!(stock_of(&app, variant_id).await, 10);
    assert_ledger_replays(&app, variant_id).await;
}
