//! Applies gateway payment notifications to orders and payments.
//!
//! Notifications arrive unauthenticated, possibly duplicated and out of order.
//! Every mutation is decided from the currently stored state, and the
//! reconciler only ever sets statuses; it never accumulates, so a replay is a
//! no-op.

use std::str::FromStr;
use std::sync::Arc;

use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha512};
use tracing::{info, instrument, warn};

use super::cancellation::{reverse_reservations, write_payment_status};
use super::order_status::{lock_order_by_invoice, transition, write_status, OrderEvent};
use super::payment_gateway::RemoteStatus;
use crate::db::for_update;
use crate::entities::{payment, OrderStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// A parsed gateway notification. `raw` keeps the payload as received.
#[derive(Debug, Clone)]
pub struct PaymentNotification {
    pub order_id: String,
    pub transaction_status: String,
    pub fraud_status: Option<String>,
    pub status_code: Option<String>,
    pub gross_amount: Option<String>,
    pub signature_key: Option<String>,
    pub raw: Value,
}

fn string_field(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl PaymentNotification {
    pub fn from_payload(raw: Value) -> Result<Self, ServiceError> {
        let order_id = raw
            .get("order_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ServiceError::BadRequest("invalid payload".to_string()))?;

        Ok(Self {
            transaction_status: string_field(&raw, "transaction_status").unwrap_or_default(),
            fraud_status: string_field(&raw, "fraud_status"),
            status_code: string_field(&raw, "status_code"),
            gross_amount: string_field(&raw, "gross_amount"),
            signature_key: string_field(&raw, "signature_key"),
            order_id,
            raw,
        })
    }

    pub fn remote_status(&self) -> RemoteStatus {
        RemoteStatus::from_notification(&self.transaction_status, self.fraud_status.as_deref())
    }

    /// `hex(sha512(order_id + status_code + gross_amount + server_key))`
    pub fn expected_signature(&self, server_key: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(self.order_id.as_bytes());
        hasher.update(self.status_code.as_deref().unwrap_or_default().as_bytes());
        hasher.update(self.gross_amount.as_deref().unwrap_or_default().as_bytes());
        hasher.update(server_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify_signature(&self, server_key: &str) -> Result<(), ServiceError> {
        let provided = self.signature_key.as_deref().unwrap_or_default();
        let expected = self.expected_signature(server_key);
        if constant_time_eq(&provided.to_ascii_lowercase(), &expected) {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized("invalid signature".to_string()))
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied {
        order_status: OrderStatus,
        payment_status: PaymentStatus,
    },
    /// Stored state already reflects the notification.
    Unchanged,
    /// Acknowledged without mutation.
    Ignored { reason: String },
}

#[derive(Clone)]
pub struct PaymentReconciler {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    server_key: Option<String>,
}

impl PaymentReconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        server_key: Option<String>,
    ) -> Self {
        Self {
            db,
            event_sender,
            server_key,
        }
    }

    #[instrument(skip(self, notification), fields(invoice = %notification.order_id, status = %notification.transaction_status))]
    pub async fn apply(
        &self,
        notification: PaymentNotification,
    ) -> Result<ReconcileOutcome, ServiceError> {
        if let Some(key) = &self.server_key {
            notification.verify_signature(key)?;
        }
        let remote = notification.remote_status();
        let invoice = notification.order_id.clone();

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let order = lock_order_by_invoice(&txn, &invoice).await?;
        let payment = for_update(
            payment::Entity::find().filter(payment::Column::OrderId.eq(order.id)),
            &txn,
        )
        .one(&txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Payment for {} not found", invoice)))?;

        if let Some(gross) = &notification.gross_amount {
            let gross = Decimal::from_str(gross.trim())
                .map_err(|_| ServiceError::BadRequest("invalid gross_amount".to_string()))?;
            if gross != payment.amount {
                warn!(%gross, expected = %payment.amount, "gross amount mismatch");
                return Err(ServiceError::BadRequest(
                    "gross_amount does not match payment".to_string(),
                ));
            }
        }

        let old_order = order.status;
        let old_payment = payment.payment_status;

        let (new_order, new_payment) = match &remote {
            RemoteStatus::Captured | RemoteStatus::Settled => match (old_order, old_payment) {
                (_, PaymentStatus::Failed | PaymentStatus::Expired) => {
                    return ignore(&invoice, "payment already failed");
                }
                (OrderStatus::Cancelled, PaymentStatus::Paid) => {
                    return Ok(ReconcileOutcome::Unchanged);
                }
                (OrderStatus::Cancelled, _) => {
                    warn!(%invoice, "payment captured for a cancelled order; refund required");
                    (OrderStatus::Cancelled, PaymentStatus::Paid)
                }
                (OrderStatus::Delivered | OrderStatus::Done, PaymentStatus::Paid) => {
                    return Ok(ReconcileOutcome::Unchanged);
                }
                (from, _) => (transition(from, OrderEvent::PaymentSettled)?, PaymentStatus::Paid),
            },
            RemoteStatus::Pending | RemoteStatus::Challenged => match old_payment {
                PaymentStatus::Pending => return Ok(ReconcileOutcome::Unchanged),
                other => return ignore(&invoice, &format!("payment already {}", other)),
            },
            RemoteStatus::Denied | RemoteStatus::Cancelled | RemoteStatus::Expired => {
                match (old_order, old_payment) {
                    (OrderStatus::Cancelled, PaymentStatus::Failed) => {
                        return Ok(ReconcileOutcome::Unchanged);
                    }
                    (OrderStatus::Cancelled, _) => {
                        return ignore(&invoice, "order already cancelled");
                    }
                    (from, _) => (
                        transition(from, OrderEvent::PaymentFailed)?,
                        PaymentStatus::Failed,
                    ),
                }
            }
            RemoteStatus::Unknown(status) => {
                return ignore(&invoice, &format!("unhandled transaction status '{}'", status));
            }
        };

        if new_order == old_order && new_payment == old_payment {
            return Ok(ReconcileOutcome::Unchanged);
        }

        let reversing = new_order == OrderStatus::Cancelled && old_order != OrderStatus::Cancelled;
        if reversing {
            reverse_reservations(&txn, &order).await?;
        }
        let order = if new_order != old_order {
            write_status(&txn, order, new_order).await?
        } else {
            order
        };
        write_payment_status(&txn, payment, new_payment, Some(notification.raw)).await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(
            "Reconciled {}: order {} -> {}, payment {} -> {}",
            invoice, old_order, new_order, old_payment, new_payment
        );
        counter!("storefront.webhook.applied", 1);

        if new_payment != old_payment {
            self.event_sender
                .publish(Event::PaymentStatusChanged {
                    invoice: invoice.clone(),
                    old_status: old_payment.to_string(),
                    new_status: new_payment.to_string(),
                })
                .await;
        }
        if new_order != old_order {
            self.event_sender
                .publish(Event::OrderStatusChanged {
                    order_id: order.id,
                    invoice: invoice.clone(),
                    old_status: old_order.to_string(),
                    new_status: new_order.to_string(),
                })
                .await;
        }
        if reversing {
            self.event_sender
                .publish(Event::OrderCancelled {
                    order_id: order.id,
                    invoice: invoice.clone(),
                    reason: format!("payment_{}", notification.transaction_status),
                })
                .await;
        }

        Ok(ReconcileOutcome::Applied {
            order_status: new_order,
            payment_status: new_payment,
        })
    }
}

fn ignore(invoice: &str, reason: &str) -> Result<ReconcileOutcome, ServiceError> {
    info!(%invoice, %reason, "notification acknowledged without changes");
    Ok(ReconcileOutcome::Ignored {
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn notification(body: Value) -> PaymentNotification {
        PaymentNotification::from_payload(body).unwrap()
    }

    #[test]
    fn payload_without_order_id_is_rejected() {
        assert_matches!(
            PaymentNotification::from_payload(json!({ "transaction_status": "settlement" })),
            Err(ServiceError::BadRequest(_))
        );
        assert_matches!(
            PaymentNotification::from_payload(json!({ "order_id": 42 })),
            Err(ServiceError::BadRequest(_))
        );
    }

    #[test]
    fn numeric_fields_are_read_as_text() {
        let n = notification(json!({
            "order_id": "INV-20250101-ABC123",
            "transaction_status": "capture",
            "fraud_status": "accept",
            "status_code": 200,
            "gross_amount": "150000.00",
        }));
        assert_eq!(n.status_code.as_deref(), Some("200"));
        assert_eq!(n.gross_amount.as_deref(), Some("150000.00"));
        assert_eq!(n.remote_status(), RemoteStatus::Captured);
    }

    #[test]
    fn signature_round_trips_with_server_key() {
        let mut n = notification(json!({
            "order_id": "INV-20250101-ABC123",
            "transaction_status": "settlement",
            "status_code": "200",
            "gross_amount": "150000.00",
        }));
        let key = "SB-Mid-server-test";
        n.signature_key = Some(n.expected_signature(key));
        assert!(n.verify_signature(key).is_ok());
        assert_matches!(
            n.verify_signature("other-key"),
            Err(ServiceError::Unauthorized(_))
        );
    }

    #[test]
    fn missing_signature_is_unauthorized() {
        let n = notification(json!({
            "order_id": "INV-20250101-ABC123",
            "transaction_status": "settlement",
        }));
        assert_matches!(n.verify_signature("key"), Err(ServiceError::Unauthorized(_)));
    }

    #[test]
    fn signature_matches_known_digest_layout() {
        let n = notification(json!({
            "order_id": "A",
            "status_code": "200",
            "gross_amount": "1.00",
        }));
        let mut hasher = Sha512::new();
        hasher.update(b"A2001.00k");
        assert_eq!(n.expected_signature("k"), hex::encode(hasher.finalize()));
    }
}
