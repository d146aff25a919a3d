//! Storefront checkout core: carts, checkout, orders and an inventory
//! ledger.
//!
//! The crate guards one invariant above all others: stock can never be
//! oversold. Every stock mutation flows through
//! [`services::stock_ledger::StockLedger`], which pairs a guarded quantity
//! update with an append-only ledger entry, and checkout
//! ([`services::order_assembler::OrderAssembler`]) performs its debits inside
//! the same transaction that creates the order.
//!
//! Carts ([`services::cart`]) hold references, not prices; money is resolved
//! live by [`services::catalog`] and only frozen into an order at checkout.
//! Order lifecycle transitions, including the compensating restocks on
//! cancellation and refund, live in [`services::order_status`].

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod services;

pub use config::{load_config, AppConfig};
pub use db::{establish_connection, run_migrations, DbPool};
pub use errors::ServiceError;
pub use services::AppServices;
