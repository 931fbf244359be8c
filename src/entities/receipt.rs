use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Immutable receipt snapshot, one per paid order. The full line-item
/// breakdown is stored as a serialized JSON snapshot in `receipt_data`;
/// receipts are schema-free by design and never updated after insert.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "receipts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub order_id: i32,
    #[sea_orm(unique)]
    pub receipt_number: String,
    pub mpesa_receipt_number: Option<String>,
    pub payment_date: DateTimeUtc,
    #[sea_orm(column_type = "Text")]
    pub receipt_data: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
