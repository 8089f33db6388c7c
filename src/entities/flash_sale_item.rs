use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-item allocation inside a flash sale. `sold <= quota` always holds;
/// `sold` is only written through [`crate::services::quota_tracker::QuotaTracker`].
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "flash_sale_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub flash_sale_id: Uuid,
    pub item_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((15, 2)))")]
    pub discount_price: Decimal,
    pub quota: i32,
    pub sold: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn remaining(&self) -> i32 {
        (self.quota - self.sold).max(0)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::flash_sale::Entity",
        from = "Column::FlashSaleId",
        to = "super::flash_sale::Column::Id"
    )]
    FlashSale,
    #[sea_orm(
        belongs_to = "super::item::Entity",
        from = "Column::ItemId",
        to = "super::item::Column::Id"
    )]
    Item,
}

impl Related<super::flash_sale::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FlashSale.def()
    }
}

impl Related<super::item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Item.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
