use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use uuid::Uuid;

use crate::entities::{flash_sale, flash_sale_item, item, FlashSaleStatus};
use crate::errors::ServiceError;

/// Rounds to whole currency units, half away from zero. Every amount that is
/// stored on an order or sent to the payment gateway goes through this, so
/// the two always agree.
pub fn whole_units(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Effective unit price of an item at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPrice {
    pub unit_price: Decimal,
    pub catalog_price: Decimal,
    /// Allocation to charge quota against when the flash price applies.
    pub allocation_id: Option<Uuid>,
}

impl ResolvedPrice {
    pub fn is_flash(&self) -> bool {
        self.allocation_id.is_some()
    }
}

/// Read-only price lookup. Never cached: the checkout calls it again once its
/// locks are held.
pub struct PriceResolver;

impl PriceResolver {
    /// Flash price when the item sits in an active sale whose window covers
    /// `now` and whose allocation still has quota; catalog price otherwise.
    pub async fn resolve<C: ConnectionTrait>(
        conn: &C,
        item: &item::Model,
        now: DateTime<Utc>,
    ) -> Result<ResolvedPrice, ServiceError> {
        let allocation = Self::flash_allocation(conn, item.id, now).await?;

        Ok(match allocation {
            Some(allocation) => ResolvedPrice {
                unit_price: whole_units(allocation.discount_price),
                catalog_price: item.price,
                allocation_id: Some(allocation.id),
            },
            None => ResolvedPrice {
                unit_price: whole_units(item.price),
                catalog_price: item.price,
                allocation_id: None,
            },
        })
    }

    /// The allocation that would price `item_id` at `now`, ignoring how much
    /// quota is left. The checkout locks these before re-resolving.
    pub async fn candidate_allocation<C: ConnectionTrait>(
        conn: &C,
        item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, ServiceError> {
        Ok(Self::live_allocation(conn, item_id, now)
            .await?
            .map(|allocation| allocation.id))
    }

    /// The live allocation for `item_id` while it still has quota.
    pub async fn flash_allocation<C: ConnectionTrait>(
        conn: &C,
        item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<flash_sale_item::Model>, ServiceError> {
        Ok(Self::live_allocation(conn, item_id, now)
            .await?
            .filter(|allocation| allocation.sold < allocation.quota))
    }

    async fn live_allocation<C: ConnectionTrait>(
        conn: &C,
        item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<flash_sale_item::Model>, ServiceError> {
        let rows = flash_sale_item::Entity::find()
            .find_also_related(flash_sale::Entity)
            .filter(flash_sale_item::Column::ItemId.eq(item_id))
            .filter(flash_sale::Column::Status.eq(FlashSaleStatus::Active))
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(rows
            .into_iter()
            .find(|(_, sale)| sale.as_ref().map(|s| s.covers(now)).unwrap_or(false))
            .map(|(allocation, _)| allocation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn whole_units_rounds_half_away_from_zero() {
        assert_eq!(whole_units(dec!(75000.50)), dec!(75001));
        assert_eq!(whole_units(dec!(75000.49)), dec!(75000));
        assert_eq!(whole_units(dec!(74999.5)), dec!(75000));
        assert_eq!(whole_units(dec!(25000)), dec!(25000));
    }
}
