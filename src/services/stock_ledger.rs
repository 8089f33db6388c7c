//! Per-variant stock counters.
//!
//! Stock is read-then-written only through a [`LockedVariant`], which can only
//! be obtained by taking the variant's row lock inside a transaction. The lock
//! is held until that transaction commits or rolls back.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseTransaction, EntityTrait, Set};
use tracing::debug;
use uuid::Uuid;

use crate::db::for_update;
use crate::entities::{item, item_variant};
use crate::errors::ServiceError;

/// A variant row locked for the lifetime of `txn`.
pub struct LockedVariant<'t> {
    txn: &'t DatabaseTransaction,
    variant: item_variant::Model,
    item_name: String,
}

pub struct StockLedger;

impl StockLedger {
    /// Takes the exclusive row lock on a variant.
    pub async fn lock_variant<'t>(
        txn: &'t DatabaseTransaction,
        variant_id: Uuid,
    ) -> Result<LockedVariant<'t>, ServiceError> {
        let variant = for_update(item_variant::Entity::find_by_id(variant_id), txn)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))?;

        let item_name = item::Entity::find_by_id(variant.item_id)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|item| item.name)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Item {} not found", variant.item_id))
            })?;

        debug!(%variant_id, stock = variant.stock, "variant locked");
        Ok(LockedVariant {
            txn,
            variant,
            item_name,
        })
    }
}

impl<'t> LockedVariant<'t> {
    pub fn id(&self) -> Uuid {
        self.variant.id
    }

    pub fn item_id(&self) -> Uuid {
        self.variant.item_id
    }

    pub fn stock(&self) -> i32 {
        self.variant.stock
    }

    /// `Kaos Polos (M / Black)`
    pub fn describe(&self) -> String {
        format!("{} ({})", self.item_name, self.variant.label())
    }

    /// Subtracts `qty`, failing when fewer units remain.
    pub async fn decrement(&mut self, qty: i32) -> Result<(), ServiceError> {
        if qty <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for {} must be at least 1",
                self.describe()
            )));
        }
        if self.variant.stock < qty {
            return Err(ServiceError::InsufficientStock(format!(
                "Stock for {} is insufficient; {} left",
                self.describe(),
                self.variant.stock
            )));
        }
        self.write(self.variant.stock - qty).await
    }

    /// Adds `qty` back. Used by compensation and restocking.
    pub async fn increment(&mut self, qty: i32) -> Result<(), ServiceError> {
        if qty <= 0 {
            return Ok(());
        }
        let stock = self.variant.stock.checked_add(qty).ok_or_else(|| {
            ServiceError::ValidationError(format!("Stock for {} would overflow", self.describe()))
        })?;
        self.write(stock).await
    }

    async fn write(&mut self, stock: i32) -> Result<(), ServiceError> {
        let mut active: item_variant::ActiveModel = self.variant.clone().into();
        active.stock = Set(stock);
        active.updated_at = Set(Utc::now());
        self.variant = active
            .update(self.txn)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(())
    }
}
