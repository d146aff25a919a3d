#![allow(dead_code)]

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use storefront_core::{
    config::AppConfig,
    db::{establish_connection_with_config, run_migrations, DbConfig},
    entities::{
        inventory_ledger_entry, product_variant, InventoryLedgerEntryModel, LedgerReason,
        ProductVariant, ProductVariantModel,
    },
    events::{self, Event},
    services::{
        cart::Identity,
        order_assembler::{Address, CreateOrderInput},
        stock_ledger::Actor,
        AppServices,
    },
};

pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    // Held so emitted events have somewhere to go.
    _rx: mpsc::Receiver<Event>,
}

/// Fresh in-memory database with migrations applied and services wired.
///
/// The pool is pinned to one connection: `sqlite::memory:` gives every
/// connection its own database, and a single connection also serializes
/// writes the way a real database would under row locks.
pub async fn setup() -> TestApp {
    let mut config = DbConfig::for_url("sqlite::memory:");
    config.max_connections = 1;
    config.acquire_timeout = Duration::from_secs(5);
    let db = Arc::new(
        establish_connection_with_config(&config)
            .await
            .expect("connect to in-memory sqlite"),
    );
    run_migrations(&db).await.expect("run migrations");

    let (tx, rx) = events::channel(1024);
    let app_config = AppConfig::with_database_url("sqlite::memory:");
    let services = AppServices::new(db.clone(), tx, &app_config);

    TestApp {
        db,
        services,
        _rx: rx,
    }
}

/// Inserts an active variant and, when `stock > 0`, seeds its quantity
/// through the ledger so the replay property holds from the first entry.
pub async fn seed_variant(app: &TestApp, price: Decimal, stock: i32) -> ProductVariantModel {
    let now = Utc::now();
    let variant = product_variant::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(Uuid::new_v4()),
        sku: Set(format!("SKU-{}", Uuid::new_v4().simple())),
        label: Set("Test variant".to_string()),
        price: Set(price),
        discount_price: Set(None),
        stock_quantity: Set(0),
        min_stock_level: Set(0),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.db)
    .await
    .expect("insert variant");

    if stock > 0 {
        app.services
            .ledger
            .adjust(variant.id, stock, LedgerReason::InitialStock, Actor::System)
            .await
            .expect("seed stock");
    }

    fetch_variant(app, variant.id).await
}

pub async fn fetch_variant(app: &TestApp, variant_id: Uuid) -> ProductVariantModel {
    ProductVariant::find_by_id(variant_id)
        .one(&*app.db)
        .await
        .expect("query variant")
        .expect("variant exists")
}

pub async fn stock_of(app: &TestApp, variant_id: Uuid) -> i32 {
    fetch_variant(app, variant_id).await.stock_quantity
}

pub async fn set_price(app: &TestApp, variant_id: Uuid, price: Decimal) {
    let variant = fetch_variant(app, variant_id).await;
    let mut active: product_variant::ActiveModel = variant.into();
    active.price = Set(price);
    active.updated_at = Set(Utc::now());
    active.update(&*app.db).await.expect("update price");
}

pub async fn deactivate(app: &TestApp, variant_id: Uuid) {
    let variant = fetch_variant(app, variant_id).await;
    let mut active: product_variant::ActiveModel = variant.into();
    active.is_active = Set(false);
    active.updated_at = Set(Utc::now());
    active.update(&*app.db).await.expect("deactivate variant");
}

/// All ledger entries for one variant, oldest first.
pub async fn ledger_entries(app: &TestApp, variant_id: Uuid) -> Vec<InventoryLedgerEntryModel> {
    use sea_orm::QueryOrder;
    inventory_ledger_entry::Entity::find()
        .filter(inventory_ledger_entry::Column::VariantId.eq(variant_id))
        .order_by_asc(inventory_ledger_entry::Column::CreatedAt)
        .all(&*app.db)
        .await
        .expect("query ledger")
}

/// Replays the ledger: the summed deltas must equal the stored quantity.
pub async fn assert_ledger_replays(app: &TestApp, variant_id: Uuid) {
    let entries = ledger_entries(app, variant_id).await;
    let replayed: i32 = entries.iter().map(|e| e.delta).sum();
    assert_eq!(
        replayed,
        stock_of(app, variant_id).await,
        "ledger replay diverged from stored stock"
    );
}

pub fn customer() -> Identity {
    Identity::Customer(Uuid::new_v4())
}

pub fn guest() -> Identity {
    Identity::Guest(format!("sess-{}", Uuid::new_v4().simple()))
}

pub fn test_address() -> Address {
    Address {
        name: "Jo Buyer".to_string(),
        street: "1 Main St".to_string(),
        city: "Springfield".to_string(),
        state: "IL".to_string(),
        postal_code: "62701".to_string(),
        country: "US".to_string(),
    }
}

pub fn checkout_input() -> CreateOrderInput {
    CreateOrderInput {
        shipping_address: test_address(),
        billing_address: test_address(),
        payment_method: "card".to_string(),
    }
}
