use axum::{extract::State, response::IntoResponse, Json};

use super::common::created_response;
use crate::{auth::Identity, errors::ServiceError, services::checkout::CheckoutRequest, AppState};

/// POST /api/v1/checkout
///
/// Buys `items` directly when present, otherwise checks out the caller's cart.
pub async fn checkout(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let receipt = state
        .services
        .checkout
        .checkout(identity.user_id, request)
        .await?;
    Ok(created_response(receipt))
}
