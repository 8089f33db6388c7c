use axum::{body::Bytes, extract::State, response::IntoResponse};
use serde_json::Value;
use tracing::warn;

use super::common::success_response;
use crate::{
    errors::ServiceError, services::payment_reconciler::PaymentNotification, AppState,
};

/// POST /api/v1/payments/webhook
///
/// Unauthenticated gateway callback. The payload is only trusted after its
/// signature and amount check out against the stored payment.
pub async fn payment_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        warn!("Rejected webhook body: {}", e);
        ServiceError::BadRequest("invalid payload".to_string())
    })?;
    let notification = PaymentNotification::from_payload(payload)?;

    let outcome = state.services.reconciler.apply(notification).await?;
    Ok(success_response(outcome))
}
