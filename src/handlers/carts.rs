use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::common::{created_response, no_content_response, success_response};
use crate::{auth::Identity, errors::ServiceError, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct AddCartItemRequest {
    pub variant_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// GET /api/v1/cart
pub async fn get_cart(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.items(identity.user_id).await?;
    Ok(success_response(cart))
}

/// POST /api/v1/cart/items
pub async fn add_item(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<AddCartItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    request.validate()?;
    let line = state
        .services
        .carts
        .add_item(identity.user_id, request.variant_id, request.quantity)
        .await?;
    Ok(created_response(line))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// PUT /api/v1/cart/items/:id
pub async fn update_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(cart_item_id): Path<Uuid>,
    Json(request): Json<UpdateCartItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    request.validate()?;
    let line = state
        .services
        .carts
        .update_item(identity.user_id, cart_item_id, request.quantity)
        .await?;
    Ok(success_response(line))
}

/// DELETE /api/v1/cart/items/:id
pub async fn remove_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(cart_item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .carts
        .remove_item(identity.user_id, cart_item_id)
        .await?;
    Ok(no_content_response())
}
