//! Catalog read side consumed by the cart and the order assembler.
//!
//! This is the `getProductVariant` collaborator: live price, discount price
//! and activity for a variant. Prices resolved here are never cached in the
//! cart; checkout freezes them into the order instead.

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::{
    entities::{product_variant, ProductVariant},
    errors::{ServiceError, UnavailableLine},
    services::cart::CartLineView,
    services::pricing::PricedLine,
};

/// Live pricing data for one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantPricing {
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub is_active: bool,
}

impl VariantPricing {
    pub fn effective_price(&self) -> Decimal {
        self.discount_price.unwrap_or(self.price)
    }
}

/// Looks up live pricing for a (product, variant) pair. `None` when the
/// variant does not exist under that product.
pub async fn get_variant_pricing<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    variant_id: Uuid,
) -> Result<Option<VariantPricing>, ServiceError> {
    let variant = ProductVariant::find_by_id(variant_id)
        .filter(product_variant::Column::ProductId.eq(product_id))
        .one(conn)
        .await?;

    Ok(variant.map(|v| VariantPricing {
        price: v.price,
        discount_price: v.discount_price,
        is_active: v.is_active,
    }))
}

/// Prices every cart line from the live catalog.
///
/// Lines whose variant is missing or inactive are collected and returned as
/// one `InvalidCartItems` error naming each offending line, so the caller can
/// surface them individually instead of failing opaquely.
pub async fn price_lines<C: ConnectionTrait>(
    conn: &C,
    lines: &[CartLineView],
) -> Result<Vec<PricedLine>, ServiceError> {
    let mut priced = Vec::with_capacity(lines.len());
    let mut unavailable = Vec::new();

    for line in lines {
        match get_variant_pricing(conn, line.product_id, line.variant_id).await? {
            Some(pricing) if pricing.is_active => priced.push(PricedLine {
                product_id: line.product_id,
                variant_id: line.variant_id,
                quantity: line.quantity,
                unit_price: pricing.effective_price(),
                list_price: pricing.price,
            }),
            _ => unavailable.push(UnavailableLine {
                product_id: line.product_id,
                variant_id: line.variant_id,
                requested: line.quantity,
                available: 0,
            }),
        }
    }

    if !unavailable.is_empty() {
        return Err(ServiceError::InvalidCartItems(unavailable));
    }
    Ok(priced)
}
