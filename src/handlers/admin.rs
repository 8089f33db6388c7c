use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::common::{created_response, success_response};
use crate::{
    auth::AdminIdentity,
    errors::ServiceError,
    services::{
        flash_sales::CreateFlashSaleRequest, order_status::AdminStatus, orders::OrderListQuery,
        restock::RestockRequest,
    },
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AdminStatus,
}

/// PUT /api/v1/admin/orders/:invoice/status
pub async fn update_order_status(
    State(state): State<AppState>,
    AdminIdentity(admin): AdminIdentity,
    Path(invoice): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    info!(admin_id = %admin.user_id, %invoice, status = ?request.status, "admin status change");
    let order = state
        .services
        .order_status
        .update_status(&invoice, request.status)
        .await?;
    Ok(success_response(order))
}

/// POST /api/v1/admin/flash-sales
pub async fn create_flash_sale(
    State(state): State<AppState>,
    AdminIdentity(_admin): AdminIdentity,
    Json(request): Json<CreateFlashSaleRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let sale = state.services.flash_sales.create(request).await?;
    Ok(created_response(sale))
}

/// GET /api/v1/admin/orders
pub async fn list_orders(
    State(state): State<AppState>,
    AdminIdentity(_admin): AdminIdentity,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state.services.orders.list_all(query).await?;
    Ok(success_response(page))
}

/// POST /api/v1/admin/items/:item_id/variants/restock
pub async fn restock_item(
    State(state): State<AppState>,
    AdminIdentity(admin): AdminIdentity,
    Path(item_id): Path<Uuid>,
    Json(request): Json<RestockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    info!(admin_id = %admin.user_id, %item_id, "restock");
    let variants = state.services.restock.restock(item_id, request).await?;
    Ok(success_response(variants))
}
