use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Why a stock quantity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum LedgerReason {
    #[sea_orm(string_value = "sale")]
    Sale,
    #[sea_orm(string_value = "cancellation_return")]
    CancellationReturn,
    #[sea_orm(string_value = "refund_return")]
    RefundReturn,
    #[sea_orm(string_value = "manual_adjustment")]
    ManualAdjustment,
    #[sea_orm(string_value = "initial_stock")]
    InitialStock,
}

/// One immutable audit record per stock mutation. Append-only: rows are never
/// updated or deleted, and summing `delta` per variant replays the current
/// `stock_quantity`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub variant_id: Uuid,
    /// Signed quantity change; negative for debits, positive for credits.
    pub delta: i32,
    pub reason: LedgerReason,
    pub actor_kind: String,
    #[sea_orm(nullable)]
    pub actor_id: Option<Uuid>,
    /// Stock level immediately after this entry was applied.
    pub quantity_after: i32,
    #[sea_orm(nullable)]
    pub reference_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub reference_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product_variant::Entity",
        from = "Column::VariantId",
        to = "super::product_variant::Column::Id"
    )]
    ProductVariant,
}

impl Related<super::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductVariant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_debit(&self) -> bool {
        self.delta < 0
    }

    pub fn is_credit(&self) -> bool {
        self.delta > 0
    }
}
