use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Catalog row for a coffee on the menu. Prices are integer minor currency
/// units; `portion_available` is the remaining sellable stock.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "menu_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub title: String,
    pub single_price: i64,
    pub double_price: i64,
    pub available: bool,
    pub portion_available: i32,
    pub category: String,
    pub image_path: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
