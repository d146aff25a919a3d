use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// A cart line rejected at checkout, named so the UI can prompt removal or a
/// quantity adjustment instead of failing the whole cart opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnavailableLine {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub requested: i32,
    pub available: i32,
}

/// Error taxonomy for the checkout core.
///
/// Everything except `Storage` is an expected business outcome: it is
/// returned for the caller to present and never leaves a transaction
/// half-applied. `Storage` is an infrastructure fault that aborts the
/// enclosing transaction and propagates.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("storage error: {0}")]
    Storage(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("insufficient stock for variant {variant_id}: requested {requested}, available {available}")]
    InsufficientStock {
        variant_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("variant {variant_id} is unavailable or out of stock")]
    OutOfStock { variant_id: Uuid },

    #[error("cart is empty")]
    EmptyCart,

    #[error("{} cart line(s) are no longer available", .0.len())]
    InvalidCartItems(Vec<UnavailableLine>),

    #[error("order {0} not found")]
    UnknownOrder(Uuid),

    #[error("unrecognized order status: {0}")]
    InvalidStatus(String),

    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error("cart line {line_id} not found")]
    LineNotFound { line_id: Uuid },

    #[error("variant {0} not found")]
    UnknownVariant(Uuid),

    #[error("validation error: {0}")]
    Validation(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

impl ServiceError {
    /// True for expected business outcomes the UI layer presents; false for
    /// infrastructure faults that warrant a generic failure and a log line.
    pub fn is_business_outcome(&self) -> bool {
        !matches!(self, ServiceError::Storage(_))
    }
}
