//! Mutable pre-transaction carts for guests and signed-in customers.
//!
//! Carts store references only (product, variant, quantity). Prices are
//! resolved live at read time and frozen only at checkout, so a catalog price
//! change is reflected in every open cart immediately.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    ModelTrait, QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{cart, cart_item, Cart, CartItem, CartModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog,
        pricing::{compute_totals, CartTotals, ShippingRule},
        stock_ledger::StockLedger,
    },
};

/// Who owns a cart. Guests are keyed by an opaque session token, customers
/// by their account id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Guest(String),
    Customer(Uuid),
}

impl Identity {
    pub fn customer_id(&self) -> Option<Uuid> {
        match self {
            Identity::Customer(id) => Some(*id),
            Identity::Guest(_) => None,
        }
    }

    pub fn guest_session(&self) -> Option<&str> {
        match self {
            Identity::Guest(session) => Some(session),
            Identity::Customer(_) => None,
        }
    }
}

/// One cart line as callers see it, prices not included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLineView {
    pub line_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartView {
    pub cart_id: Uuid,
    pub lines: Vec<CartLineView>,
    pub updated_at: DateTime<Utc>,
}

impl CartView {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Debug, Clone, Validate)]
pub struct AddItemInput {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Storage seam between customer carts (database rows) and guest carts
/// (in-process map). Both enforce the same availability rules.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Fetches the identity's cart, creating an empty one on first touch.
    async fn get(&self, identity: &Identity) -> Result<CartView, ServiceError>;

    /// Adds a line, merging with an existing line for the same variant. The
    /// availability check runs against the merged quantity.
    async fn add_item(
        &self,
        identity: &Identity,
        input: AddItemInput,
    ) -> Result<CartView, ServiceError>;

    /// Sets a line's quantity to an absolute value, revalidating availability.
    /// A quantity of zero or less removes the line.
    async fn update_item(
        &self,
        identity: &Identity,
        line_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError>;

    async fn remove_item(&self, identity: &Identity, line_id: Uuid)
        -> Result<CartView, ServiceError>;

    async fn clear(&self, identity: &Identity) -> Result<(), ServiceError>;
}

/// Database-backed carts for signed-in customers.
#[derive(Clone)]
pub struct DbCartStore {
    db: Arc<DatabaseConnection>,
    ledger: StockLedger,
    events: EventSender,
}

impl DbCartStore {
    pub fn new(db: Arc<DatabaseConnection>, ledger: StockLedger, events: EventSender) -> Self {
        Self { db, ledger, events }
    }

    async fn find_or_create(
        &self,
        txn: &DatabaseTransaction,
        identity: &Identity,
    ) -> Result<CartModel, ServiceError> {
        let customer_id = identity
            .customer_id()
            .ok_or_else(|| ServiceError::Validation("guest carts are kept in memory".into()))?;

        if let Some(existing) = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(txn)
            .await?
        {
            return Ok(existing);
        }

        let now = Utc::now();
        let created = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            session_id: Set(None),
            customer_id: Set(Some(customer_id)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await?;

        self.events.send_or_log(Event::CartCreated(created.id)).await;
        Ok(created)
    }

    async fn touch(
        &self,
        txn: &DatabaseTransaction,
        cart: CartModel,
    ) -> Result<(), ServiceError> {
        let mut active: cart::ActiveModel = cart.into();
        active.updated_at = Set(Utc::now());
        active.update(txn).await?;
        Ok(())
    }

    async fn view(&self, cart_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::Validation(format!("cart {} vanished", cart_id)))?;
        let items = cart.find_related(CartItem).all(&*self.db).await?;

        Ok(CartView {
            cart_id,
            lines: items
                .into_iter()
                .map(|item| CartLineView {
                    line_id: item.id,
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    quantity: item.quantity,
                })
                .collect(),
            updated_at: cart.updated_at,
        })
    }

    /// Rejects a requested quantity the live stock cannot cover.
    async fn ensure_available(
        &self,
        txn: &DatabaseTransaction,
        product_id: Uuid,
        variant_id: Uuid,
        requested: i32,
    ) -> Result<(), ServiceError> {
        let pricing = catalog::get_variant_pricing(txn, product_id, variant_id)
            .await?
            .ok_or(ServiceError::UnknownVariant(variant_id))?;
        if !pricing.is_active {
            return Err(ServiceError::OutOfStock { variant_id });
        }

        let available = self.ledger.availability(txn, variant_id).await?;
        if available == 0 {
            return Err(ServiceError::OutOfStock { variant_id });
        }
        if available < requested {
            return Err(ServiceError::InsufficientStock {
                variant_id,
                requested,
                available,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CartStore for DbCartStore {
    #[instrument(skip(self))]
    async fn get(&self, identity: &Identity) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.find_or_create(&txn, identity).await?;
        txn.commit().await?;
        self.view(cart.id).await
    }

    #[instrument(skip(self))]
    async fn add_item(
        &self,
        identity: &Identity,
        input: AddItemInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let cart = self.find_or_create(&txn, identity).await?;

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .filter(cart_item::Column::VariantId.eq(input.variant_id))
            .one(&txn)
            .await?;

        let merged = existing.as_ref().map_or(0, |item| item.quantity) + input.quantity;
        self.ensure_available(&txn, input.product_id, input.variant_id, merged)
            .await?;

        let now = Utc::now();
        match existing {
            Some(item) => {
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(merged);
                active.updated_at = Set(now);
                active.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(input.product_id),
                    variant_id: Set(input.variant_id),
                    quantity: Set(input.quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        let cart_id = cart.id;
        self.touch(&txn, cart).await?;
        txn.commit().await?;

        self.events
            .send_or_log(Event::CartItemAdded {
                cart_id,
                variant_id: input.variant_id,
            })
            .await;
        self.view(cart_id).await
    }

    #[instrument(skip(self))]
    async fn update_item(
        &self,
        identity: &Identity,
        line_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity <= 0 {
            return self.remove_item(identity, line_id).await;
        }

        let txn = self.db.begin().await?;
        let cart = self.find_or_create(&txn, identity).await?;

        let item = CartItem::find_by_id(line_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?
            .ok_or(ServiceError::LineNotFound { line_id })?;

        self.ensure_available(&txn, item.product_id, item.variant_id, quantity)
            .await?;

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let cart_id = cart.id;
        self.touch(&txn, cart).await?;
        txn.commit().await?;

        self.events
            .send_or_log(Event::CartItemUpdated { cart_id, line_id })
            .await;
        self.view(cart_id).await
    }

    #[instrument(skip(self))]
    async fn remove_item(
        &self,
        identity: &Identity,
        line_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.find_or_create(&txn, identity).await?;

        let deleted = CartItem::delete_many()
            .filter(cart_item::Column::Id.eq(line_id))
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::LineNotFound { line_id });
        }

        let cart_id = cart.id;
        self.touch(&txn, cart).await?;
        txn.commit().await?;

        self.events
            .send_or_log(Event::CartItemRemoved { cart_id, line_id })
            .await;
        self.view(cart_id).await
    }

    #[instrument(skip(self))]
    async fn clear(&self, identity: &Identity) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.find_or_create(&txn, identity).await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        let cart_id = cart.id;
        self.touch(&txn, cart).await?;
        txn.commit().await?;

        self.events.send_or_log(Event::CartCleared(cart_id)).await;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct GuestLine {
    line_id: Uuid,
    product_id: Uuid,
    variant_id: Uuid,
    quantity: i32,
}

#[derive(Debug, Clone)]
struct GuestCart {
    id: Uuid,
    lines: Vec<GuestLine>,
    updated_at: DateTime<Utc>,
}

impl GuestCart {
    fn empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            lines: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    fn view(&self) -> CartView {
        CartView {
            cart_id: self.id,
            lines: self
                .lines
                .iter()
                .map(|line| CartLineView {
                    line_id: line.line_id,
                    product_id: line.product_id,
                    variant_id: line.variant_id,
                    quantity: line.quantity,
                })
                .collect(),
            updated_at: self.updated_at,
        }
    }
}

/// In-process carts for anonymous sessions. Catalog and stock checks still go
/// to the database; only the cart contents live in memory.
pub struct GuestCartStore {
    db: Arc<DatabaseConnection>,
    ledger: StockLedger,
    events: EventSender,
    carts: DashMap<String, GuestCart>,
}

impl GuestCartStore {
    pub fn new(db: Arc<DatabaseConnection>, ledger: StockLedger, events: EventSender) -> Self {
        Self {
            db,
            ledger,
            events,
            carts: DashMap::new(),
        }
    }

    fn session_key(identity: &Identity) -> Result<String, ServiceError> {
        identity
            .guest_session()
            .map(str::to_string)
            .ok_or_else(|| ServiceError::Validation("customer carts are kept in storage".into()))
    }

    /// Clones the cart for a session, creating it on first touch. Checks run
    /// on the clone so no map guard is held across an await.
    fn snapshot(&self, session: &str) -> GuestCart {
        self.carts
            .entry(session.to_string())
            .or_insert_with(GuestCart::empty)
            .clone()
    }

    fn store(&self, session: &str, mut cart: GuestCart) {
        cart.updated_at = Utc::now();
        self.carts.insert(session.to_string(), cart);
    }

    async fn ensure_available(
        &self,
        product_id: Uuid,
        variant_id: Uuid,
        requested: i32,
    ) -> Result<(), ServiceError> {
        let pricing = catalog::get_variant_pricing(&*self.db, product_id, variant_id)
            .await?
            .ok_or(ServiceError::UnknownVariant(variant_id))?;
        if !pricing.is_active {
            return Err(ServiceError::OutOfStock { variant_id });
        }

        let available = self.ledger.availability(&*self.db, variant_id).await?;
        if available == 0 {
            return Err(ServiceError::OutOfStock { variant_id });
        }
        if available < requested {
            return Err(ServiceError::InsufficientStock {
                variant_id,
                requested,
                available,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CartStore for GuestCartStore {
    async fn get(&self, identity: &Identity) -> Result<CartView, ServiceError> {
        let session = Self::session_key(identity)?;
        Ok(self.snapshot(&session).view())
    }

    #[instrument(skip(self))]
    async fn add_item(
        &self,
        identity: &Identity,
        input: AddItemInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;
        let session = Self::session_key(identity)?;
        let mut cart = self.snapshot(&session);

        let existing = cart
            .lines
            .iter_mut()
            .find(|line| line.product_id == input.product_id && line.variant_id == input.variant_id);
        let merged = existing.as_ref().map_or(0, |line| line.quantity) + input.quantity;
        self.ensure_available(input.product_id, input.variant_id, merged)
            .await?;

        match existing {
            Some(line) => line.quantity = merged,
            None => cart.lines.push(GuestLine {
                line_id: Uuid::new_v4(),
                product_id: input.product_id,
                variant_id: input.variant_id,
                quantity: input.quantity,
            }),
        }

        let cart_id = cart.id;
        self.store(&session, cart);
        self.events
            .send_or_log(Event::CartItemAdded {
                cart_id,
                variant_id: input.variant_id,
            })
            .await;
        Ok(self.snapshot(&session).view())
    }

    #[instrument(skip(self))]
    async fn update_item(
        &self,
        identity: &Identity,
        line_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity <= 0 {
            return self.remove_item(identity, line_id).await;
        }

        let session = Self::session_key(identity)?;
        let mut cart = self.snapshot(&session);

        let line = cart
            .lines
            .iter_mut()
            .find(|line| line.line_id == line_id)
            .ok_or(ServiceError::LineNotFound { line_id })?;
        self.ensure_available(line.product_id, line.variant_id, quantity)
            .await?;
        line.quantity = quantity;

        let cart_id = cart.id;
        self.store(&session, cart);
        self.events
            .send_or_log(Event::CartItemUpdated { cart_id, line_id })
            .await;
        Ok(self.snapshot(&session).view())
    }

    #[instrument(skip(self))]
    async fn remove_item(
        &self,
        identity: &Identity,
        line_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let session = Self::session_key(identity)?;
        let mut cart = self.snapshot(&session);

        let before = cart.lines.len();
        cart.lines.retain(|line| line.line_id != line_id);
        if cart.lines.len() == before {
            return Err(ServiceError::LineNotFound { line_id });
        }

        let cart_id = cart.id;
        self.store(&session, cart);
        self.events
            .send_or_log(Event::CartItemRemoved { cart_id, line_id })
            .await;
        Ok(self.snapshot(&session).view())
    }

    #[instrument(skip(self))]
    async fn clear(&self, identity: &Identity) -> Result<(), ServiceError> {
        let session = Self::session_key(identity)?;
        let mut cart = self.snapshot(&session);
        cart.lines.clear();
        let cart_id = cart.id;
        self.store(&session, cart);
        self.events.send_or_log(Event::CartCleared(cart_id)).await;
        Ok(())
    }
}

/// Routes each identity to its backing store and prices carts for display.
pub struct CartStores {
    db: Arc<DatabaseConnection>,
    db_store: DbCartStore,
    guest_store: GuestCartStore,
    rule: ShippingRule,
    tax_rate: Decimal,
}

impl CartStores {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: StockLedger,
        events: EventSender,
        rule: ShippingRule,
        tax_rate: Decimal,
    ) -> Self {
        Self {
            db_store: DbCartStore::new(db.clone(), ledger.clone(), events.clone()),
            guest_store: GuestCartStore::new(db.clone(), ledger, events),
            db,
            rule,
            tax_rate,
        }
    }

    pub fn for_identity(&self, identity: &Identity) -> &dyn CartStore {
        match identity {
            Identity::Guest(_) => &self.guest_store,
            Identity::Customer(_) => &self.db_store,
        }
    }

    /// The cart with live pricing applied: what a storefront renders as the
    /// cart page.
    #[instrument(skip(self))]
    pub async fn totals(
        &self,
        identity: &Identity,
    ) -> Result<(CartView, CartTotals), ServiceError> {
        let view = self.for_identity(identity).get(identity).await?;
        if view.is_empty() {
            return Ok((view, CartTotals::zero()));
        }

        let priced = catalog::price_lines(&*self.db, &view.lines).await?;
        let totals = compute_totals(&priced, &self.rule, self.tax_rate);
        Ok((view, totals))
    }
}
