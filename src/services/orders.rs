use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::auth::Identity;
use crate::entities::{item, item_variant, order, order_item, payment, OrderStatus, PaymentStatus};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize)]
pub struct OrderLine {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_name: Option<String>,
    pub variant_id: Uuid,
    pub variant: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub flash_sale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<OrderLine>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<String>,
}

const DEFAULT_PER_PAGE: u64 = 10;
const MAX_PER_PAGE: u64 = 100;

/// Admin listing filters. `search` matches invoice or receiver name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    pub search: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderPage {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Order detail by invoice. Buyers only see their own orders.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn find_by_invoice(
        &self,
        invoice: &str,
        actor: &Identity,
    ) -> Result<OrderDetail, ServiceError> {
        let db = &*self.db;
        let order = order::Entity::find()
            .filter(order::Column::Invoice.eq(invoice))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", invoice)))?;

        if !actor.can_access(order.user_id) {
            return Err(ServiceError::Forbidden(format!(
                "Order {} belongs to another buyer",
                invoice
            )));
        }

        let rows = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .find_also_related(item_variant::Entity)
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut items = Vec::with_capacity(rows.len());
        for (line, variant) in rows {
            let item_name = item::Entity::find_by_id(line.item_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
                .map(|item| item.name);
            items.push(OrderLine {
                id: line.id,
                item_id: line.item_id,
                item_name,
                variant_id: line.variant_id,
                variant: variant.map(|v| v.label()),
                quantity: line.quantity,
                unit_price: line.unit_price,
                subtotal: line.subtotal(),
                flash_sale: line.flash_sale_item_id.is_some(),
            });
        }

        let payment = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(OrderDetail {
            order,
            items,
            payment_status: payment.as_ref().map(|p| p.payment_status),
            payment_method: payment.map(|p| p.payment_method),
        })
    }

    /// A buyer's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Every buyer's orders for the back office, newest first.
    #[instrument(skip(self))]
    pub async fn list_all(&self, query: OrderListQuery) -> Result<OrderPage, ServiceError> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);

        let mut select = order::Entity::find();
        if let Some(status) = query.status {
            select = select.filter(order::Column::Status.eq(status));
        }
        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            select = select.filter(
                Condition::any()
                    .add(order::Column::Invoice.contains(search))
                    .add(order::Column::ReceiverName.contains(search)),
            );
        }

        let paginator = select
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::db_error(e)
        })?;
        let orders = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!(error = %e, page, per_page, "Failed to fetch orders page");
            ServiceError::db_error(e)
        })?;

        info!(total, page, per_page, returned = orders.len(), "orders listed");
        Ok(OrderPage {
            orders,
            total,
            page,
            per_page,
        })
    }
}
