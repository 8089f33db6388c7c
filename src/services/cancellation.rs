//! Order cancellation and the reservation reversal shared with the payment
//! reconciler.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, TransactionTrait,
};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::order_status::{lock_order_by_invoice, transition, write_status, OrderEvent};
use super::payment_gateway::{CancelOutcome, PaymentGateway};
use super::quota_tracker::QuotaTracker;
use super::stock_ledger::StockLedger;
use crate::auth::Identity;
use crate::entities::{order, order_item, payment, OrderStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Puts back every unit an order reserved.
///
/// Variants are locked in ascending id order, then allocations in ascending id
/// order, the same global order the checkout uses.
pub(crate) async fn reverse_reservations(
    txn: &DatabaseTransaction,
    order: &order::Model,
) -> Result<(), ServiceError> {
    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut by_variant: BTreeMap<Uuid, i32> = BTreeMap::new();
    let mut by_allocation: BTreeMap<Uuid, i32> = BTreeMap::new();
    for item in &items {
        *by_variant.entry(item.variant_id).or_default() += item.quantity;
        if let Some(allocation_id) = item.flash_sale_item_id {
            *by_allocation.entry(allocation_id).or_default() += item.quantity;
        }
    }

    for (variant_id, qty) in by_variant {
        match StockLedger::lock_variant(txn, variant_id).await {
            Ok(mut variant) => variant.increment(qty).await?,
            Err(ServiceError::NotFound(_)) => {
                warn!(invoice = %order.invoice, %variant_id, "variant no longer exists; stock not restored");
            }
            Err(e) => return Err(e),
        }
    }

    for (allocation_id, qty) in by_allocation {
        match QuotaTracker::lock_allocation(txn, allocation_id).await {
            Ok(mut allocation) => allocation.release(qty).await?,
            Err(ServiceError::NotFound(_)) => {
                warn!(invoice = %order.invoice, %allocation_id, "allocation no longer exists; quota not released");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Sets the payment row of an order to `status`, storing `raw` when given.
pub(crate) async fn write_payment_status(
    txn: &DatabaseTransaction,
    payment: payment::Model,
    status: PaymentStatus,
    raw: Option<serde_json::Value>,
) -> Result<payment::Model, ServiceError> {
    let mut active: payment::ActiveModel = payment.into();
    active.payment_status = Set(status);
    if let Some(raw) = raw {
        active.raw_response = Set(Some(raw));
    }
    active.updated_at = Set(Utc::now());
    active.update(txn).await.map_err(ServiceError::db_error)
}

/// Result of a buyer cancellation. The remote session cancel runs in the
/// background; awaiting the handle is optional.
#[derive(Debug)]
pub struct CancelledOrder {
    pub order: order::Model,
    pub remote_cancel: JoinHandle<()>,
}

#[derive(Clone)]
pub struct CancellationService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
}

impl CancellationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
        }
    }

    /// Cancels a pending or processing order and restores its stock and quota.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn cancel(
        &self,
        invoice: &str,
        actor: &Identity,
    ) -> Result<CancelledOrder, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let order = lock_order_by_invoice(&txn, invoice).await?;
        if !actor.can_access(order.user_id) {
            return Err(ServiceError::Forbidden(format!(
                "Order {} belongs to another buyer",
                invoice
            )));
        }

        match order.status {
            OrderStatus::Cancelled => {
                return Err(ServiceError::AlreadyCancelled(invoice.to_string()))
            }
            OrderStatus::Delivered | OrderStatus::Done => {
                return Err(ServiceError::NotCancellable(invoice.to_string()))
            }
            OrderStatus::Pending | OrderStatus::Processing => {}
        }
        let old_status = order.status;
        let new_status = transition(old_status, OrderEvent::BuyerCancel)?;

        reverse_reservations(&txn, &order).await?;
        let order = write_status(&txn, order, new_status).await?;

        let payment = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        let payment_change = match payment {
            Some(payment) if payment.payment_status == PaymentStatus::Pending => {
                write_payment_status(&txn, payment, PaymentStatus::Cancelled, None).await?;
                true
            }
            _ => false,
        };

        txn.commit().await.map_err(|e| {
            error!("Failed to commit cancellation of {}: {}", invoice, e);
            ServiceError::db_error(e)
        })?;

        info!("Order {} cancelled by buyer", invoice);
        counter!("storefront.order.cancelled", 1);

        self.event_sender
            .publish(Event::OrderCancelled {
                order_id: order.id,
                invoice: order.invoice.clone(),
                reason: "buyer_cancel".to_string(),
            })
            .await;
        self.event_sender
            .publish(Event::OrderStatusChanged {
                order_id: order.id,
                invoice: order.invoice.clone(),
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;
        if payment_change {
            self.event_sender
                .publish(Event::PaymentStatusChanged {
                    invoice: order.invoice.clone(),
                    old_status: PaymentStatus::Pending.to_string(),
                    new_status: PaymentStatus::Cancelled.to_string(),
                })
                .await;
        }

        let remote_cancel = self.spawn_remote_cancel(order.invoice.clone());
        Ok(CancelledOrder {
            order,
            remote_cancel,
        })
    }

    /// Best effort: the internal cancellation has already committed.
    fn spawn_remote_cancel(&self, invoice: String) -> JoinHandle<()> {
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            let status = match gateway.query_status(&invoice).await {
                Ok(status) => status,
                Err(ServiceError::NotFound(_)) => {
                    info!(%invoice, "no remote payment session to cancel");
                    return;
                }
                Err(e) => {
                    warn!(%invoice, error = %e, "could not query remote payment status");
                    return;
                }
            };

            if !status.is_cancellable() {
                info!(%invoice, ?status, "remote payment not cancellable; leaving it");
                return;
            }

            match gateway.cancel(&invoice).await {
                Ok(CancelOutcome::Cancelled) => info!(%invoice, "remote payment cancelled"),
                Ok(CancelOutcome::NotFound) => info!(%invoice, "remote payment already gone"),
                Err(e) => warn!(%invoice, error = %e, "remote payment cancel failed"),
            }
        })
    }
}
