//! Periodic flash-sale status sweep.
//!
//! Each sweep compares stored windows against the clock and moves sales
//! forward (scheduled to active, active to inactive). Sweeps are idempotent,
//! so missed ticks and restarts only delay a transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::entities::{flash_sale, FlashSaleStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub activated: Vec<Uuid>,
    pub deactivated: Vec<Uuid>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.activated.is_empty() && self.deactivated.is_empty()
    }
}

#[derive(Clone)]
pub struct FlashSaleScheduler {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl FlashSaleScheduler {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// One pass, in one transaction: end expired sales first, then start due
    /// ones, so two sales are never active at the same time. A due sale whose
    /// window has already closed goes straight to inactive and is reported as
    /// both activated and deactivated.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let mut report = SweepReport::default();
        let mut events = Vec::new();

        let expired = due_sales(&txn, FlashSaleStatus::Active, |sale| sale.window_end <= now).await?;
        for sale in expired {
            if advance(&txn, sale.id, FlashSaleStatus::Active, FlashSaleStatus::Inactive, now).await? {
                report.deactivated.push(sale.id);
                events.push(Event::FlashSaleEnded {
                    flash_sale_id: sale.id,
                    at: now,
                });
            }
        }

        let starting = due_sales(&txn, FlashSaleStatus::Scheduled, |sale| sale.window_start <= now).await?;
        for sale in starting {
            let to = if sale.window_end <= now {
                FlashSaleStatus::Inactive
            } else {
                FlashSaleStatus::Active
            };
            if !advance(&txn, sale.id, FlashSaleStatus::Scheduled, to, now).await? {
                continue;
            }
            report.activated.push(sale.id);
            events.push(Event::FlashSaleActivated {
                flash_sale_id: sale.id,
                at: now,
            });
            if to == FlashSaleStatus::Inactive {
                report.deactivated.push(sale.id);
                events.push(Event::FlashSaleEnded {
                    flash_sale_id: sale.id,
                    at: now,
                });
            }
        }

        txn.commit().await.map_err(|e| {
            error!("Failed to commit flash sale sweep: {}", e);
            ServiceError::db_error(e)
        })?;

        counter!("storefront.flash_sale.activated", report.activated.len() as u64);
        counter!("storefront.flash_sale.ended", report.deactivated.len() as u64);
        for event in events {
            match &event {
                Event::FlashSaleActivated { flash_sale_id, .. } => {
                    info!(%flash_sale_id, "flash sale activated")
                }
                Event::FlashSaleEnded { flash_sale_id, .. } => {
                    info!(%flash_sale_id, "flash sale ended")
                }
                _ => {}
            }
            self.event_sender.publish(event).await;
        }
        Ok(report)
    }

    /// Runs [`Self::sweep`] every `period` until the task is aborted.
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(?period, "Starting flash sale scheduler");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                match self.sweep(Utc::now()).await {
                    Ok(report) if !report.is_empty() => info!(
                        activated = report.activated.len(),
                        deactivated = report.deactivated.len(),
                        "flash sale sweep applied"
                    ),
                    Ok(_) => debug!("flash sale sweep found nothing due"),
                    Err(e) => error!("Flash sale sweep failed: {}", e),
                }
            }
        })
    }
}

async fn due_sales<C: ConnectionTrait>(
    conn: &C,
    status: FlashSaleStatus,
    due: impl Fn(&flash_sale::Model) -> bool,
) -> Result<Vec<flash_sale::Model>, ServiceError> {
    Ok(flash_sale::Entity::find()
        .filter(flash_sale::Column::Status.eq(status))
        .order_by_asc(flash_sale::Column::WindowStart)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?
        .into_iter()
        .filter(|sale| due(sale))
        .collect())
}

/// Moves one sale from `from` to `to`. The update re-checks `from`, so only
/// the sweep that actually moved the row reports it.
async fn advance<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    from: FlashSaleStatus,
    to: FlashSaleStatus,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let result = flash_sale::Entity::update_many()
        .col_expr(flash_sale::Column::Status, Expr::value(to))
        .col_expr(flash_sale::Column::UpdatedAt, Expr::value(now))
        .filter(flash_sale::Column::Id.eq(id))
        .filter(flash_sale::Column::Status.eq(from))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;
    debug!(flash_sale_id = %id, %from, %to, rows = result.rows_affected, "flash sale status advanced");
    Ok(result.rows_affected == 1)
}
