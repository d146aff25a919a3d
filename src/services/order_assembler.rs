//! Converts a cart into an immutable order, atomically with the stock debits.
//!
//! The order insert, its items, the opening status history row and every
//! stock debit run in one transaction. Any failed debit aborts the whole
//! checkout: no order row survives, no stock moves.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        order, order_item, order_status_history, LedgerReason, Order, OrderItem, OrderItemModel,
        OrderModel, OrderStatus,
    },
    errors::{ServiceError, UnavailableLine},
    events::{Event, EventSender},
    services::{
        cart::{CartStores, Identity},
        catalog,
        pricing::{compute_totals, PricedLine, ShippingRule},
        stock_ledger::{Actor, LedgerReference, StockLedger},
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub street: String,
    #[validate(length(min = 1))]
    pub city: String,
    pub state: String,
    #[validate(length(min = 1))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 2))]
    pub country: String,
}

#[derive(Debug, Clone, Validate)]
pub struct CreateOrderInput {
    #[validate]
    pub shipping_address: Address,
    #[validate]
    pub billing_address: Address,
    #[validate(length(min = 1))]
    pub payment_method: String,
}

/// Builds orders out of carts and reads them back.
pub struct OrderAssembler {
    db: Arc<DatabaseConnection>,
    carts: Arc<CartStores>,
    ledger: StockLedger,
    events: EventSender,
    rule: ShippingRule,
    tax_rate: Decimal,
    currency: String,
}

impl OrderAssembler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        carts: Arc<CartStores>,
        ledger: StockLedger,
        events: EventSender,
        rule: ShippingRule,
        tax_rate: Decimal,
        currency: String,
    ) -> Self {
        Self {
            db,
            carts,
            ledger,
            events,
            rule,
            tax_rate,
            currency,
        }
    }

    /// Checks out the identity's cart into a `pending` order.
    ///
    /// Validates every line against the live catalog and stock first, so a
    /// cart with any unsellable line is rejected whole with each offending
    /// line named. Prices are frozen into the order at this moment; later
    /// catalog changes never touch it.
    #[instrument(skip(self, input))]
    pub async fn create_order(
        &self,
        identity: &Identity,
        input: CreateOrderInput,
    ) -> Result<OrderModel, ServiceError> {
        input.validate()?;

        let cart = self.carts.for_identity(identity).get(identity).await?;
        if cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let priced = catalog::price_lines(&*self.db, &cart.lines).await?;
        self.ensure_all_available(&priced).await?;
        let totals = compute_totals(&priced, &self.rule, self.tax_rate);

        let buyer = match identity {
            Identity::Customer(id) => Actor::Customer(*id),
            Identity::Guest(_) => Actor::System,
        };
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = self.db.begin().await?;

        let created = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number()),
            customer_id: Set(identity.customer_id()),
            guest_session: Set(identity.guest_session().map(str::to_string)),
            status: Set(OrderStatus::Pending),
            subtotal: Set(totals.subtotal),
            tax_amount: Set(totals.tax_amount),
            shipping_amount: Set(totals.shipping_amount),
            discount_amount: Set(totals.discount_amount),
            total_amount: Set(totals.total),
            currency: Set(self.currency.clone()),
            payment_method: Set(input.payment_method.clone()),
            shipping_address: Set(serde_json::to_string(&input.shipping_address)
                .map_err(|e| ServiceError::Validation(e.to_string()))?),
            billing_address: Set(serde_json::to_string(&input.billing_address)
                .map_err(|e| ServiceError::Validation(e.to_string()))?),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(OrderStatus::Pending),
            note: Set(Some("Order created".to_string())),
            actor_kind: Set(buyer.kind().to_string()),
            actor_id: Set(buyer.id()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for line in &priced {
            let item_id = Uuid::new_v4();
            order_item::ActiveModel {
                id: Set(item_id),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                variant_id: Set(line.variant_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.line_total()),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;

            // A concurrent checkout may have taken the stock since the
            // pre-check; the guarded debit aborts the transaction then.
            self.ledger
                .debit(
                    &txn,
                    line.variant_id,
                    line.quantity,
                    LedgerReason::Sale,
                    buyer,
                    Some(LedgerReference::order_item(item_id)),
                )
                .await?;
        }

        txn.commit().await?;

        self.carts.for_identity(identity).clear(identity).await?;
        self.events.send_or_log(Event::OrderCreated(order_id)).await;
        info!(%order_id, order_number = %created.order_number, total = %created.total_amount, "Order created");

        Ok(created)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::UnknownOrder(order_id))
    }

    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<OrderItemModel>, ServiceError> {
        // Surface a missing order as such rather than an empty item list.
        self.get_order(order_id).await?;
        Ok(OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }

    /// Orders newest first, optionally narrowed to one customer.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        customer_id: Option<Uuid>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = Order::find().order_by_desc(order::Column::CreatedAt);
        if let Some(customer_id) = customer_id {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }

        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    /// Rejects the checkout if any line exceeds the current stock, naming
    /// every offending line so the buyer can fix them all at once.
    async fn ensure_all_available(&self, lines: &[PricedLine]) -> Result<(), ServiceError> {
        let mut unavailable = Vec::new();
        for line in lines {
            let available = self.ledger.availability(&*self.db, line.variant_id).await?;
            if available < line.quantity {
                unavailable.push(UnavailableLine {
                    product_id: line.product_id,
                    variant_id: line.variant_id,
                    requested: line.quantity,
                    available,
                });
            }
        }

        if !unavailable.is_empty() {
            return Err(ServiceError::InvalidCartItems(unavailable));
        }
        Ok(())
    }
}

/// Human-facing order number: sortable timestamp plus a random suffix.
pub fn generate_order_number() -> String {
    format!(
        "ORD-{}-{:04X}",
        Utc::now().format("%y%m%d%H%M%S"),
        rand::random::<u16>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_have_the_expected_shape() {
        let number = generate_order_number();
        assert!(number.starts_with("ORD-"));
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 12);
        assert_eq!(parts[2].len(), 4);
    }

    #[test]
    fn order_numbers_are_unique_enough() {
        let a = generate_order_number();
        let b = generate_order_number();
        // Same second is likely; the random suffix must still differ.
        assert_ne!(a, b);
    }

    #[test]
    fn address_validation_requires_country_code() {
        let address = Address {
            name: "Jo Buyer".into(),
            street: "1 Main St".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            postal_code: "62701".into(),
            country: "USA".into(),
        };
        assert!(address.validate().is_err());
    }
}
