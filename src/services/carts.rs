use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, ModelTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use super::pricing::PriceResolver;
use crate::entities::{cart, cart_item, item, item_variant};
use crate::errors::ServiceError;

/// One cart line with its advisory price. Prices here are recomputed on every
/// read and never stored; the checkout prices again under lock.
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub cart_item_id: Uuid,
    pub variant_id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    pub size: String,
    pub color: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub catalog_price: Decimal,
    pub flash_sale: bool,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub cart_id: Uuid,
    pub items: Vec<CartLine>,
    pub total: Decimal,
}

#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// The buyer's cart, created on first use.
    pub async fn get_or_create<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = Self::find(conn, user_id).await? {
            return Ok(existing);
        }
        let now = Utc::now();
        cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)
    }

    async fn find<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<Option<cart::Model>, ServiceError> {
        cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Adds `quantity` of a variant, merging into an existing line.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }
        let db = &*self.db;

        let variant = item_variant::Entity::find_by_id(variant_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))?;

        let cart = Self::get_or_create(db, user_id).await?;
        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(variant_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        let wanted = existing
            .as_ref()
            .map(|line| line.quantity)
            .unwrap_or(0)
            .checked_add(quantity)
            .ok_or_else(|| ServiceError::ValidationError("quantity is too large".to_string()))?;
        Self::check_availability(db, &variant, wanted).await?;

        let now = Utc::now();
        let line = match existing {
            Some(line) => {
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(wanted);
                active.updated_at = Set(now);
                active.update(db).await
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    variant_id: Set(variant_id),
                    quantity: Set(quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(db)
                .await
            }
        }
        .map_err(ServiceError::db_error)?;

        info!(cart_id = %cart.id, quantity = line.quantity, "cart line saved");
        Ok(line)
    }

    /// Sets a line's quantity. Buyers can only touch their own cart.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: Uuid,
        cart_item_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }
        let db = &*self.db;
        let line = Self::owned_line(db, user_id, cart_item_id).await?;

        let variant = item_variant::Entity::find_by_id(line.variant_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Variant {} not found", line.variant_id))
            })?;
        Self::check_availability(db, &variant, quantity).await?;

        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        let line = active.update(db).await.map_err(ServiceError::db_error)?;

        info!(cart_item_id = %line.id, quantity, "cart line updated");
        Ok(line)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, cart_item_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        let line = Self::owned_line(db, user_id, cart_item_id).await?;
        line.delete(db).await.map_err(ServiceError::db_error)?;
        Ok(())
    }

    /// A line of the buyer's own cart. Other buyers' lines look missing.
    async fn owned_line<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        cart_item_id: Uuid,
    ) -> Result<cart_item::Model, ServiceError> {
        let not_found = || ServiceError::NotFound(format!("Cart item {} not found", cart_item_id));

        let cart = Self::find(conn, user_id).await?.ok_or_else(not_found)?;
        cart_item::Entity::find_by_id(cart_item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(not_found)
    }

    /// Unlocked stock and flash-quota read; the checkout re-checks under lock.
    async fn check_availability<C: ConnectionTrait>(
        conn: &C,
        variant: &item_variant::Model,
        wanted: i32,
    ) -> Result<(), ServiceError> {
        if wanted > variant.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} left for variant {}",
                variant.stock,
                variant.label()
            )));
        }
        let allocation =
            PriceResolver::flash_allocation(conn, variant.item_id, Utc::now()).await?;
        if let Some(allocation) = allocation {
            if wanted > allocation.remaining() {
                return Err(ServiceError::QuotaExceeded(format!(
                    "Only {} left at the flash sale price",
                    allocation.remaining()
                )));
            }
        }
        Ok(())
    }

    /// Cart contents priced at the current moment.
    #[instrument(skip(self))]
    pub async fn items(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let db = &*self.db;
        let cart = Self::get_or_create(db, user_id).await?;
        let now = Utc::now();

        let rows = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(item_variant::Entity)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut items = Vec::with_capacity(rows.len());
        for (line, variant) in rows {
            let Some(variant) = variant else { continue };
            let Some(item) = item::Entity::find_by_id(variant.item_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
            else {
                continue;
            };
            let price = PriceResolver::resolve(db, &item, now).await?;
            items.push(CartLine {
                cart_item_id: line.id,
                variant_id: variant.id,
                item_id: item.id,
                item_name: item.name,
                size: variant.size,
                color: variant.color,
                quantity: line.quantity,
                unit_price: price.unit_price,
                catalog_price: price.catalog_price,
                flash_sale: price.is_flash(),
                subtotal: price.unit_price * Decimal::from(line.quantity),
            });
        }

        let total = items.iter().map(|line| line.subtotal).sum();
        Ok(CartView {
            cart_id: cart.id,
            items,
            total,
        })
    }

    /// `(variant, quantity)` pairs in the order they were added.
    pub async fn lines<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<Vec<(Uuid, i32)>, ServiceError> {
        let Some(cart) = Self::find(conn, user_id).await? else {
            return Ok(Vec::new());
        };
        let lines = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(lines
            .into_iter()
            .map(|line| (line.variant_id, line.quantity))
            .collect())
    }

    /// Empties the buyer's cart within the caller's transaction.
    pub async fn clear<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<u64, ServiceError> {
        let Some(cart) = Self::find(conn, user_id).await? else {
            return Ok(0);
        };
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(result.rows_affected)
    }
}
