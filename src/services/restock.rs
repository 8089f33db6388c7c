//! Admin restocking. Existing variants are topped up through the stock ledger;
//! unknown size/color combinations are created with the delivered stock.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::stock_ledger::StockLedger;
use crate::entities::{item, item_variant};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RestockLine {
    #[validate(length(min = 1, max = 50))]
    pub color: String,
    #[validate(range(min = 1))]
    pub stock: i32,
}

/// One delivery for a single size, split by color.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RestockRequest {
    #[validate(length(min = 1, max = 10))]
    pub size: String,
    #[validate(length(min = 1))]
    pub variants: Vec<RestockLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestockedVariant {
    pub variant_id: Uuid,
    pub size: String,
    pub color: String,
    pub stock: i32,
    pub created: bool,
}

#[derive(Clone)]
pub struct RestockService {
    db: Arc<DatabaseConnection>,
}

impl RestockService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Adds stock for `item_id`. Sizes are stored upper-case and colors are
    /// matched case-insensitively, so `m`/`BLACK` tops up `M`/`Black`.
    #[instrument(skip(self, request), fields(size = %request.size))]
    pub async fn restock(
        &self,
        item_id: Uuid,
        request: RestockRequest,
    ) -> Result<Vec<RestockedVariant>, ServiceError> {
        request.validate()?;
        for line in &request.variants {
            line.validate()?;
        }
        let size = request.size.trim().to_uppercase();

        // color key -> (color as given, quantity)
        let mut delivered: BTreeMap<String, (String, i32)> = BTreeMap::new();
        for line in &request.variants {
            let color = line.color.trim().to_string();
            let entry = delivered
                .entry(color.to_lowercase())
                .or_insert_with(|| (color, 0));
            entry.1 = entry.1.checked_add(line.stock).ok_or_else(|| {
                ServiceError::ValidationError(format!("Stock for {} is too large", line.color))
            })?;
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        item::Entity::find_by_id(item_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", item_id)))?;

        let existing: Vec<item_variant::Model> = item_variant::Entity::find()
            .filter(item_variant::Column::ItemId.eq(item_id))
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .filter(|v| v.size.eq_ignore_ascii_case(&size))
            .collect();

        // top-ups lock in ascending variant order, like checkout
        let mut top_ups: BTreeMap<Uuid, i32> = BTreeMap::new();
        let mut created = Vec::new();
        for (key, (color, qty)) in delivered {
            match existing.iter().find(|v| v.color.to_lowercase() == key) {
                Some(variant) => {
                    top_ups.insert(variant.id, qty);
                }
                None => created.push((color, qty)),
            }
        }

        let now = Utc::now();
        let mut restocked = Vec::with_capacity(top_ups.len() + created.len());
        for (variant_id, qty) in top_ups {
            let mut variant = StockLedger::lock_variant(&txn, variant_id).await?;
            variant.increment(qty).await?;
            let model = existing
                .iter()
                .find(|v| v.id == variant.id())
                .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))?;
            restocked.push(RestockedVariant {
                variant_id: variant.id(),
                size: model.size.clone(),
                color: model.color.clone(),
                stock: variant.stock(),
                created: false,
            });
        }
        for (color, qty) in created {
            let variant = item_variant::ActiveModel {
                id: Set(Uuid::new_v4()),
                item_id: Set(item_id),
                size: Set(size.clone()),
                color: Set(color),
                stock: Set(qty),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;
            restocked.push(RestockedVariant {
                variant_id: variant.id,
                size: variant.size,
                color: variant.color,
                stock: variant.stock,
                created: true,
            });
        }

        txn.commit().await.map_err(|e| {
            error!("Failed to commit restock for item {}: {}", item_id, e);
            ServiceError::db_error(e)
        })?;

        info!(%item_id, variants = restocked.len(), "item restocked");
        Ok(restocked)
    }
}
