use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::{
    db::for_update,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel},
    entities::OrderStatus,
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Everything that can move an order between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    PaymentSettled,
    PaymentPending,
    PaymentFailed,
    BuyerCancel,
    AdminShip,
    AdminReceive,
}

impl OrderEvent {
    /// Status the event is trying to reach, for error messages.
    fn target(&self) -> OrderStatus {
        match self {
            OrderEvent::PaymentSettled => OrderStatus::Processing,
            OrderEvent::PaymentPending => OrderStatus::Pending,
            OrderEvent::PaymentFailed | OrderEvent::BuyerCancel => OrderStatus::Cancelled,
            OrderEvent::AdminShip => OrderStatus::Delivered,
            OrderEvent::AdminReceive => OrderStatus::Done,
        }
    }
}

/// The order lifecycle table. Anything not listed is an illegal transition.
pub fn transition(from: OrderStatus, event: OrderEvent) -> Result<OrderStatus, ServiceError> {
    use OrderEvent::*;
    use OrderStatus::*;

    match (from, event) {
        (Pending, PaymentSettled) => Ok(Processing),
        (Processing, PaymentSettled) => Ok(Processing),
        (Pending, PaymentPending) => Ok(Pending),
        (Pending | Processing, PaymentFailed) => Ok(Cancelled),
        (Pending | Processing, BuyerCancel) => Ok(Cancelled),
        (Processing, AdminShip) => Ok(Delivered),
        (Delivered, AdminReceive) => Ok(Done),
        (from, event) => Err(ServiceError::illegal_transition(from, event.target())),
    }
}

/// Statuses an admin may set by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminStatus {
    Delivered,
    Done,
}

impl AdminStatus {
    fn event(&self) -> OrderEvent {
        match self {
            AdminStatus::Delivered => OrderEvent::AdminShip,
            AdminStatus::Done => OrderEvent::AdminReceive,
        }
    }
}

/// Writes `status` on an order inside the caller's transaction.
pub(crate) async fn write_status<C: ConnectionTrait>(
    conn: &C,
    order: OrderModel,
    status: OrderStatus,
) -> Result<OrderModel, ServiceError> {
    let mut active: order::ActiveModel = order.into();
    active.status = Set(status);
    active.updated_at = Set(Utc::now());
    active.update(conn).await.map_err(ServiceError::db_error)
}

/// Loads an order by invoice and takes its row lock.
pub(crate) async fn lock_order_by_invoice<C: ConnectionTrait>(
    conn: &C,
    invoice: &str,
) -> Result<OrderModel, ServiceError> {
    for_update(
        OrderEntity::find().filter(order::Column::Invoice.eq(invoice)),
        conn,
    )
    .one(conn)
    .await
    .map_err(ServiceError::db_error)?
    .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", invoice)))
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// processing -> delivered
    pub async fn mark_delivered(&self, invoice: &str) -> Result<OrderModel, ServiceError> {
        self.update_status(invoice, AdminStatus::Delivered).await
    }

    /// delivered -> done
    pub async fn mark_received(&self, invoice: &str) -> Result<OrderModel, ServiceError> {
        self.update_status(invoice, AdminStatus::Done).await
    }

    /// Applies an admin status change, rejecting anything outside the lifecycle table.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        invoice: &str,
        target: AdminStatus,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::db_error(e)
        })?;

        let order = lock_order_by_invoice(&txn, invoice).await?;
        let old_status = order.status;
        let new_status = transition(old_status, target.event())?;

        let updated = write_status(&txn, order, new_status).await?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit status change for {}: {}", invoice, e);
            ServiceError::db_error(e)
        })?;

        info!(
            "Order {} status updated from '{}' to '{}'",
            invoice, old_status, new_status
        );
        self.event_sender
            .publish(Event::OrderStatusChanged {
                order_id: updated.id,
                invoice: updated.invoice.clone(),
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;

        Ok(updated)
    }
}
