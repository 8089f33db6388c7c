//! Flash-sale allocation counters. Same lock-then-check-then-write shape as
//! [`super::stock_ledger`]: `sold` only moves through a [`LockedAllocation`].

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseTransaction, EntityTrait, Set};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::for_update;
use crate::entities::{flash_sale_item, item};
use crate::errors::ServiceError;

pub struct LockedAllocation<'t> {
    txn: &'t DatabaseTransaction,
    allocation: flash_sale_item::Model,
    item_name: String,
}

pub struct QuotaTracker;

impl QuotaTracker {
    pub async fn lock_allocation<'t>(
        txn: &'t DatabaseTransaction,
        allocation_id: Uuid,
    ) -> Result<LockedAllocation<'t>, ServiceError> {
        let allocation = for_update(flash_sale_item::Entity::find_by_id(allocation_id), txn)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Flash sale allocation {} not found", allocation_id))
            })?;

        let item_name = item::Entity::find_by_id(allocation.item_id)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|item| item.name)
            .unwrap_or_else(|| allocation.item_id.to_string());

        debug!(%allocation_id, sold = allocation.sold, quota = allocation.quota, "allocation locked");
        Ok(LockedAllocation {
            txn,
            allocation,
            item_name,
        })
    }
}

impl<'t> LockedAllocation<'t> {
    /// Adds `qty` to `sold`, refusing to pass the quota.
    pub async fn charge(&mut self, qty: i32) -> Result<(), ServiceError> {
        let remaining = self.allocation.quota - self.allocation.sold;
        if qty > remaining {
            return Err(ServiceError::QuotaExceeded(format!(
                "Flash sale quota for {} is insufficient; {} left",
                self.item_name,
                remaining.max(0)
            )));
        }
        self.write(self.allocation.sold + qty).await
    }

    /// Subtracts `qty` from `sold`, never going below zero.
    pub async fn release(&mut self, qty: i32) -> Result<(), ServiceError> {
        let sold = self.allocation.sold - qty;
        if sold < 0 {
            warn!(
                allocation_id = %self.allocation.id,
                sold = self.allocation.sold,
                qty,
                "release exceeds sold count; clamping at zero"
            );
        }
        self.write(sold.max(0)).await
    }

    async fn write(&mut self, sold: i32) -> Result<(), ServiceError> {
        let mut active: flash_sale_item::ActiveModel = self.allocation.clone().into();
        active.sold = Set(sold);
        active.updated_at = Set(Utc::now());
        self.allocation = active
            .update(self.txn)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(())
    }
}
