use axum::{
    extract::{Path, State},
    response::IntoResponse,
};

use super::common::success_response;
use crate::{auth::Identity, errors::ServiceError, AppState};

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state.services.orders.list_for_user(identity.user_id).await?;
    Ok(success_response(orders))
}

/// GET /api/v1/orders/:invoice
pub async fn get_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(invoice): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state
        .services
        .orders
        .find_by_invoice(&invoice, &identity)
        .await?;
    Ok(success_response(detail))
}

/// POST /api/v1/orders/:invoice/cancel
///
/// Responds once the local cancellation has committed; the gateway-side
/// cancel continues in the background.
pub async fn cancel_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(invoice): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let cancelled = state
        .services
        .cancellation
        .cancel(&invoice, &identity)
        .await?;
    Ok(success_response(cancelled.order))
}
