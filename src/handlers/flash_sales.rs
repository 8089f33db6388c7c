use axum::{extract::State, response::IntoResponse};
use chrono::Utc;

use super::common::success_response;
use crate::{errors::ServiceError, AppState};

/// GET /api/v1/flash-sales/active
///
/// `null` when no sale is running.
pub async fn active_flash_sale(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let active = state.services.flash_sales.active(Utc::now()).await?;
    Ok(success_response(active))
}
