//! The single source of truth for cart/order money math.
//!
//! Both the cart totals view and the order assembler consume
//! [`compute_totals`], so the amount displayed in the cart and the amount
//! frozen into an order can never drift apart.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Flat shipping charge, waived once the subtotal crosses the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingRule {
    pub flat_rate: Decimal,
    pub free_threshold: Decimal,
}

/// A cart line with prices resolved from the live catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
    /// Price the buyer pays per unit (discount price when one is set).
    pub unit_price: Decimal,
    /// Undiscounted catalog price per unit.
    pub list_price: Decimal,
}

impl PricedLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    /// Catalog discount baked into this line's unit price.
    pub fn discount(&self) -> Decimal {
        (self.list_price - self.unit_price) * Decimal::from(self.quantity)
    }
}

/// Monetary breakdown for a cart or an order-to-be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    /// Informational: discounts already reflected in the subtotal's unit
    /// prices. Not subtracted again from the total.
    pub discount_amount: Decimal,
    pub total: Decimal,
}

impl CartTotals {
    pub fn zero() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            shipping_amount: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }
}

/// Computes subtotal, tax, shipping and total for a set of priced lines.
///
/// Shipping is `rule.flat_rate` for non-empty carts below the free-shipping
/// threshold and zero otherwise; tax is `subtotal * tax_rate`.
pub fn compute_totals(lines: &[PricedLine], rule: &ShippingRule, tax_rate: Decimal) -> CartTotals {
    let subtotal: Decimal = lines.iter().map(|line| line.line_total()).sum();
    let discount_amount: Decimal = lines.iter().map(|line| line.discount()).sum();

    let tax_amount = subtotal * tax_rate;

    let shipping_amount = if subtotal >= rule.free_threshold || subtotal <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        rule.flat_rate
    };

    let total = subtotal + tax_amount + shipping_amount;

    CartTotals {
        subtotal,
        tax_amount,
        shipping_amount,
        discount_amount,
        total,
    }
}
