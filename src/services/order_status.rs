//! Order lifecycle transitions with compensating stock credits.
//!
//! Cancelling or refunding an order returns its stock through the ledger in
//! the same transaction as the status flip, so an observer never sees one
//! without the other.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        order, order_item, order_status_history, LedgerReason, Order, OrderItem, OrderModel,
        OrderStatus, OrderStatusHistory, OrderStatusHistoryModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::stock_ledger::{Actor, LedgerReference, StockLedger},
};

/// True iff `from -> to` is a legal order transition.
///
/// Terminal states accept nothing. `cancelled` is reachable from any live
/// state except `delivered`; `refunded` only from `processing` or `shipped`.
/// `delivered` may be reached from any live state to absorb out-of-band
/// carrier confirmations.
pub fn allowed(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    if from.is_terminal() || from == to {
        return false;
    }
    match to {
        Pending => false,
        Processing => from == Pending,
        Shipped => from == Processing,
        Delivered => true,
        Cancelled => from != Delivered,
        Refunded => matches!(from, Processing | Shipped),
    }
}

pub struct OrderStatusMachine {
    db: Arc<DatabaseConnection>,
    ledger: StockLedger,
    events: EventSender,
}

impl OrderStatusMachine {
    pub fn new(db: Arc<DatabaseConnection>, ledger: StockLedger, events: EventSender) -> Self {
        Self { db, ledger, events }
    }

    /// Moves an order to `new_status`, appending a history row.
    ///
    /// `new_status` arrives as a string from the outside world and is parsed
    /// before anything is touched. Cancellations and refunds credit every
    /// order item back to stock inside the same transaction; because both
    /// target states are terminal and terminal states reject all further
    /// transitions, the credit can never run twice for one order.
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        new_status: &str,
        note: Option<String>,
        actor: Actor,
    ) -> Result<OrderModel, ServiceError> {
        let target = OrderStatus::parse(new_status)
            .ok_or_else(|| ServiceError::InvalidStatus(new_status.to_string()))?;

        let txn = self.db.begin().await?;

        let current = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::UnknownOrder(order_id))?;
        let from = current.status;

        if !allowed(from, target) {
            return Err(ServiceError::IllegalTransition { from, to: target });
        }

        let now = Utc::now();
        let mut active: order::ActiveModel = current.into();
        active.status = Set(target);
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(target),
            note: Set(note),
            actor_kind: Set(actor.kind().to_string()),
            actor_id: Set(actor.id()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        if matches!(target, OrderStatus::Cancelled | OrderStatus::Refunded) {
            let reason = match target {
                OrderStatus::Cancelled => LedgerReason::CancellationReturn,
                _ => LedgerReason::RefundReturn,
            };
            self.restock_items(&txn, order_id, reason, actor).await?;
        }

        txn.commit().await?;

        self.events
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: from,
                new_status: target,
            })
            .await;
        match target {
            OrderStatus::Cancelled => {
                self.events.send_or_log(Event::OrderCancelled(order_id)).await
            }
            OrderStatus::Refunded => {
                self.events.send_or_log(Event::OrderRefunded(order_id)).await
            }
            _ => {}
        }
        info!(%order_id, %from, %target, "Order status changed");

        Ok(updated)
    }

    /// Full status trail for an order, oldest first.
    pub async fn history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<OrderStatusHistoryModel>, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::UnknownOrder(order_id))?;

        Ok(OrderStatusHistory::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    async fn restock_items(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        order_id: Uuid,
        reason: LedgerReason,
        actor: Actor,
    ) -> Result<(), ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(txn)
            .await?;

        for item in items {
            self.ledger
                .credit(
                    txn,
                    item.variant_id,
                    item.quantity,
                    reason,
                    actor,
                    Some(LedgerReference::order_item(item.id)),
                )
                .await?;
        }
        Ok(())
    }
}
