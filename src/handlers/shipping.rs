use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::common::success_response;
use crate::{auth::Identity, errors::ServiceError, AppState};

#[derive(Debug, Deserialize)]
pub struct ShippingQuery {
    #[serde(default)]
    pub city: String,
}

#[derive(Debug, Serialize)]
pub struct ShippingQuote {
    pub origin_city: String,
    pub destination_city: String,
    pub cost: Decimal,
}

/// GET /api/v1/shipping/cost?city=
pub async fn shipping_cost(
    State(state): State<AppState>,
    _identity: Identity,
    Query(query): Query<ShippingQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let shipping = &state.services.shipping;
    let cost = shipping.cost(&*state.db, &query.city).await?;
    Ok(success_response(ShippingQuote {
        origin_city: shipping.origin_city().to_string(),
        destination_city: query.city,
        cost,
    }))
}
