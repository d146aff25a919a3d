pub mod cart;
pub mod catalog;
pub mod order_assembler;
pub mod order_status;
pub mod pricing;
pub mod stock_ledger;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::{config::AppConfig, events::EventSender};

use cart::CartStores;
use order_assembler::OrderAssembler;
use order_status::OrderStatusMachine;
use stock_ledger::StockLedger;

/// All checkout-core services wired onto one database pool and one event
/// channel.
pub struct AppServices {
    pub ledger: StockLedger,
    pub carts: Arc<CartStores>,
    pub orders: OrderAssembler,
    pub status: OrderStatusMachine,
}

impl AppServices {
    pub fn new(db: Arc<DatabaseConnection>, events: EventSender, config: &AppConfig) -> Self {
        let ledger = StockLedger::new(db.clone(), events.clone());
        let carts = Arc::new(CartStores::new(
            db.clone(),
            ledger.clone(),
            events.clone(),
            config.shipping_rule(),
            config.tax_rate_decimal(),
        ));
        let orders = OrderAssembler::new(
            db.clone(),
            carts.clone(),
            ledger.clone(),
            events.clone(),
            config.shipping_rule(),
            config.tax_rate_decimal(),
            config.currency.clone(),
        );
        let status = OrderStatusMachine::new(db, ledger.clone(), events);

        Self {
            ledger,
            carts,
            orders,
            status,
        }
    }
}
