//! Authoritative store for per-variant stock quantities.
//!
//! Every mutation of `stock_quantity` goes through this service and appends
//! one immutable [`inventory_ledger_entry`](crate::entities::inventory_ledger_entry)
//! row, so the ledger replays to the current quantity at all times.

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        inventory_ledger_entry, product_variant, InventoryLedgerEntry,
        InventoryLedgerEntryModel, LedgerReason, ProductVariant,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Who performed a stock mutation, recorded on every ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Customer(Uuid),
    Admin(Uuid),
    System,
}

impl Actor {
    pub fn kind(&self) -> &'static str {
        match self {
            Actor::Customer(_) => "customer",
            Actor::Admin(_) => "admin",
            Actor::System => "system",
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        match self {
            Actor::Customer(id) | Actor::Admin(id) => Some(*id),
            Actor::System => None,
        }
    }
}

/// Entity a ledger entry compensates or accounts for.
#[derive(Debug, Clone, Copy)]
pub struct LedgerReference {
    pub id: Uuid,
    pub kind: &'static str,
}

impl LedgerReference {
    pub fn order_item(id: Uuid) -> Self {
        Self {
            id,
            kind: "order_item",
        }
    }
}

#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DatabaseConnection>,
    events: EventSender,
}

impl StockLedger {
    pub fn new(db: Arc<DatabaseConnection>, events: EventSender) -> Self {
        Self { db, events }
    }

    /// True iff the variant exists, is active and has at least `quantity` in
    /// stock. Missing, inactive and insufficient all answer `false`; only a
    /// storage fault is an error.
    #[instrument(skip(self))]
    pub async fn check_available(
        &self,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        Ok(self.availability(&*self.db, variant_id).await? >= quantity)
    }

    /// Sellable quantity for a variant: 0 when missing or inactive.
    pub async fn availability<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
    ) -> Result<i32, ServiceError> {
        let variant = ProductVariant::find_by_id(variant_id).one(conn).await?;
        Ok(variant
            .filter(|v| v.is_active)
            .map(|v| v.stock_quantity)
            .unwrap_or(0))
    }

    /// Decrements stock and appends a debit ledger entry.
    ///
    /// The decrement is a single guarded UPDATE (`... AND stock_quantity >=
    /// quantity`), so concurrent debits on the same variant serialize on the
    /// row and the quantity can never go negative. Zero rows affected means
    /// the stock was insufficient (or the variant inactive) and nothing was
    /// applied.
    ///
    /// Runs on the caller's connection: callers scope it inside their own
    /// transaction so the debit commits or rolls back with their writes.
    #[instrument(skip(self, conn))]
    pub async fn debit<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
        quantity: i32,
        reason: LedgerReason,
        actor: Actor,
        reference: Option<LedgerReference>,
    ) -> Result<i32, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::Validation(
                "debit quantity must be positive".to_string(),
            ));
        }

        let result = ProductVariant::update_many()
            .col_expr(
                product_variant::Column::StockQuantity,
                Expr::col(product_variant::Column::StockQuantity).sub(quantity),
            )
            .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product_variant::Column::Id.eq(variant_id))
            .filter(product_variant::Column::IsActive.eq(true))
            .filter(product_variant::Column::StockQuantity.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            let available = self.availability(conn, variant_id).await?;
            return Err(ServiceError::InsufficientStock {
                variant_id,
                requested: quantity,
                available,
            });
        }

        let quantity_after = self.current_quantity(conn, variant_id).await?;
        self.append_entry(conn, variant_id, -quantity, quantity_after, reason, actor, reference)
            .await?;

        info!(%variant_id, quantity, quantity_after, ?reason, "Stock debited");
        Ok(quantity_after)
    }

    /// Increments stock unconditionally (no upper bound) and appends a credit
    /// ledger entry. Used for compensating returns; idempotency is the
    /// caller's responsibility.
    #[instrument(skip(self, conn))]
    pub async fn credit<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
        quantity: i32,
        reason: LedgerReason,
        actor: Actor,
        reference: Option<LedgerReference>,
    ) -> Result<i32, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::Validation(
                "credit quantity must be positive".to_string(),
            ));
        }

        let result = ProductVariant::update_many()
            .col_expr(
                product_variant::Column::StockQuantity,
                Expr::col(product_variant::Column::StockQuantity).add(quantity),
            )
            .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product_variant::Column::Id.eq(variant_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::UnknownVariant(variant_id));
        }

        let quantity_after = self.current_quantity(conn, variant_id).await?;
        self.append_entry(conn, variant_id, quantity, quantity_after, reason, actor, reference)
            .await?;

        info!(%variant_id, quantity, quantity_after, ?reason, "Stock credited");
        Ok(quantity_after)
    }

    /// Signed manual adjustment in its own transaction. Negative deltas use
    /// the same never-below-zero guard as [`debit`](Self::debit).
    #[instrument(skip(self))]
    pub async fn adjust(
        &self,
        variant_id: Uuid,
        delta: i32,
        reason: LedgerReason,
        actor: Actor,
    ) -> Result<i32, ServiceError> {
        if delta == 0 {
            return Err(ServiceError::Validation(
                "adjustment delta must be non-zero".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let quantity_after = if delta > 0 {
            self.credit(&txn, variant_id, delta, reason, actor, None)
                .await?
        } else {
            self.debit(&txn, variant_id, -delta, reason, actor, None)
                .await?
        };
        txn.commit().await?;

        self.events
            .send_or_log(Event::StockAdjusted {
                variant_id,
                delta,
                quantity_after,
            })
            .await;
        self.warn_if_low(variant_id).await;

        Ok(quantity_after)
    }

    /// Paginated ledger history, newest first, optionally narrowed to one
    /// variant. Returns the page plus the total entry count.
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        variant_id: Option<Uuid>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<InventoryLedgerEntryModel>, u64), ServiceError> {
        let mut query = InventoryLedgerEntry::find()
            .order_by_desc(inventory_ledger_entry::Column::CreatedAt);

        if let Some(variant_id) = variant_id {
            query = query.filter(inventory_ledger_entry::Column::VariantId.eq(variant_id));
        }

        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let entries = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((entries, total))
    }

    async fn current_quantity<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
    ) -> Result<i32, ServiceError> {
        ProductVariant::find_by_id(variant_id)
            .one(conn)
            .await?
            .map(|v| v.stock_quantity)
            .ok_or(ServiceError::UnknownVariant(variant_id))
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_entry<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
        delta: i32,
        quantity_after: i32,
        reason: LedgerReason,
        actor: Actor,
        reference: Option<LedgerReference>,
    ) -> Result<(), ServiceError> {
        let entry = inventory_ledger_entry::ActiveModel {
            id: Set(Uuid::new_v4()),
            variant_id: Set(variant_id),
            delta: Set(delta),
            reason: Set(reason),
            actor_kind: Set(actor.kind().to_string()),
            actor_id: Set(actor.id()),
            quantity_after: Set(quantity_after),
            reference_id: Set(reference.map(|r| r.id)),
            reference_type: Set(reference.map(|r| r.kind.to_string())),
            created_at: Set(Utc::now()),
        };
        entry.insert(conn).await?;
        Ok(())
    }

    async fn warn_if_low(&self, variant_id: Uuid) {
        let variant = match ProductVariant::find_by_id(variant_id).one(&*self.db).await {
            Ok(Some(v)) => v,
            _ => return,
        };
        if variant.is_below_min_stock() {
            self.events
                .send_or_log(Event::LowStock {
                    variant_id,
                    quantity: variant.stock_quantity,
                    min_stock_level: variant.min_stock_level,
                })
                .await;
        }
    }
}
