use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::db::lock_table_for_writes;
use crate::entities::{flash_sale, flash_sale_item, item, item_variant, FlashSaleStatus};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FlashSaleItemInput {
    pub item_id: Uuid,
    pub discount_price: Decimal,
    #[validate(range(min = 1))]
    pub quota: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateFlashSaleRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    #[validate(length(min = 1))]
    pub items: Vec<FlashSaleItemInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlashSaleDetail {
    pub sale: flash_sale::Model,
    pub items: Vec<flash_sale_item::Model>,
}

/// One allocation as shown to buyers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlashSaleOffer {
    pub allocation_id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    pub original_price: Decimal,
    pub discount_price: Decimal,
    pub discount_percentage: i32,
    pub quota: i32,
    pub sold: i32,
    pub remaining: i32,
    pub sold_out: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveFlashSale {
    pub sale: flash_sale::Model,
    pub items: Vec<FlashSaleOffer>,
}

/// Whole-number percentage off the catalog price.
pub fn discount_percentage(original: Decimal, discounted: Decimal) -> i32 {
    if original <= Decimal::ZERO {
        return 0;
    }
    ((original - discounted) / original * Decimal::from(100))
        .round()
        .to_i32()
        .unwrap_or(0)
}

#[derive(Clone)]
pub struct FlashSaleService {
    db: Arc<DatabaseConnection>,
    /// Serialises the overlap check and insert of concurrent creations.
    create_lock: Arc<AsyncMutex<()>>,
}

impl FlashSaleService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            create_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Creates a `scheduled` sale with its allocations.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: CreateFlashSaleRequest) -> Result<FlashSaleDetail, ServiceError> {
        request.validate()?;
        for allocation in &request.items {
            allocation.validate()?;
            if allocation.discount_price < Decimal::ONE {
                return Err(ServiceError::ValidationError(
                    "discount_price must be at least 1".to_string(),
                ));
            }
        }
        if request.window_end <= request.window_start {
            return Err(ServiceError::ValidationError(
                "window_end must be after window_start".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for allocation in &request.items {
            if !seen.insert(allocation.item_id) {
                return Err(ServiceError::ValidationError(format!(
                    "Item {} is listed more than once",
                    allocation.item_id
                )));
            }
        }

        let _guard = self.create_lock.lock().await;
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        lock_table_for_writes::<flash_sale::Entity, _>(&txn).await?;

        let live = flash_sale::Entity::find()
            .filter(
                flash_sale::Column::Status
                    .is_in([FlashSaleStatus::Scheduled, FlashSaleStatus::Active]),
            )
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if let Some(active) = live.iter().find(|s| s.status == FlashSaleStatus::Active) {
            return Err(ServiceError::Conflict(format!(
                "Flash sale '{}' is still active",
                active.name
            )));
        }
        if let Some(overlap) = live.iter().find(|s| {
            s.window_start < request.window_end && request.window_start < s.window_end
        }) {
            return Err(ServiceError::Conflict(format!(
                "Window overlaps scheduled flash sale '{}'",
                overlap.name
            )));
        }

        for allocation in &request.items {
            Self::check_allocation(&txn, allocation).await?;
        }

        let now = Utc::now();
        let sale = flash_sale::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.clone()),
            description: Set(request.description.clone()),
            window_start: Set(request.window_start),
            window_end: Set(request.window_end),
            status: Set(FlashSaleStatus::Scheduled),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        let mut items = Vec::with_capacity(request.items.len());
        for allocation in &request.items {
            let row = flash_sale_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                flash_sale_id: Set(sale.id),
                item_id: Set(allocation.item_id),
                discount_price: Set(allocation.discount_price),
                quota: Set(allocation.quota),
                sold: Set(0),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;
            items.push(row);
        }

        txn.commit().await.map_err(|e| {
            error!("Failed to commit flash sale {}: {}", sale.name, e);
            ServiceError::db_error(e)
        })?;

        info!(sale_id = %sale.id, allocations = items.len(), "flash sale scheduled");
        Ok(FlashSaleDetail { sale, items })
    }

    async fn check_allocation<C: ConnectionTrait>(
        conn: &C,
        allocation: &FlashSaleItemInput,
    ) -> Result<(), ServiceError> {
        let item = item::Entity::find_by_id(allocation.item_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", allocation.item_id)))?;

        let total_stock: i32 = item_variant::Entity::find()
            .filter(item_variant::Column::ItemId.eq(item.id))
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?
            .iter()
            .map(|v| v.stock)
            .sum();

        if total_stock <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "{} has no stock",
                item.name
            )));
        }
        if allocation.quota > total_stock {
            return Err(ServiceError::ValidationError(format!(
                "Quota {} for {} exceeds its stock of {}",
                allocation.quota, item.name, total_stock
            )));
        }
        if allocation.discount_price >= item.price {
            return Err(ServiceError::ValidationError(format!(
                "Discount price for {} must be below {}",
                item.name, item.price
            )));
        }

        let in_active_sale = flash_sale_item::Entity::find()
            .find_also_related(flash_sale::Entity)
            .filter(flash_sale_item::Column::ItemId.eq(item.id))
            .filter(flash_sale::Column::Status.eq(FlashSaleStatus::Active))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .is_some();
        if in_active_sale {
            return Err(ServiceError::Conflict(format!(
                "{} is already in an active flash sale",
                item.name
            )));
        }
        Ok(())
    }

    /// The sale currently running, if any, with per-allocation availability.
    #[instrument(skip(self))]
    pub async fn active(&self, now: DateTime<Utc>) -> Result<Option<ActiveFlashSale>, ServiceError> {
        let db = &*self.db;
        let sale = flash_sale::Entity::find()
            .filter(flash_sale::Column::Status.eq(FlashSaleStatus::Active))
            .order_by_asc(flash_sale::Column::WindowStart)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .find(|sale| sale.covers(now));
        let Some(sale) = sale else {
            return Ok(None);
        };

        let rows = flash_sale_item::Entity::find()
            .filter(flash_sale_item::Column::FlashSaleId.eq(sale.id))
            .find_also_related(item::Entity)
            .order_by_asc(flash_sale_item::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let items = rows
            .into_iter()
            .filter_map(|(allocation, item)| {
                let item = item?;
                let remaining = allocation.remaining();
                Some(FlashSaleOffer {
                    allocation_id: allocation.id,
                    item_id: item.id,
                    item_name: item.name,
                    original_price: item.price,
                    discount_price: allocation.discount_price,
                    discount_percentage: discount_percentage(item.price, allocation.discount_price),
                    quota: allocation.quota,
                    sold: allocation.sold,
                    remaining,
                    sold_out: remaining == 0,
                })
            })
            .collect();

        Ok(Some(ActiveFlashSale { sale, items }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn discount_percentage_rounds_to_whole_numbers() {
        assert_eq!(discount_percentage(dec!(100000), dec!(75000)), 25);
        assert_eq!(discount_percentage(dec!(30000), dec!(19999)), 33);
        assert_eq!(discount_percentage(dec!(0), dec!(0)), 0);
    }
}
