//! Database entities for the checkout core.

pub mod cart;
pub mod cart_item;
pub mod inventory_ledger_entry;
pub mod order;
pub mod order_item;
pub mod order_status_history;
pub mod product_variant;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use inventory_ledger_entry::{
    Entity as InventoryLedgerEntry, LedgerReason, Model as InventoryLedgerEntryModel,
};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use order_status_history::{Entity as OrderStatusHistory, Model as OrderStatusHistoryModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
