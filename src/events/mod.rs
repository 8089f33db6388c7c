use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is gone.
    /// Used after a transaction has committed, where the outcome must not change.
    pub async fn publish(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events published after the owning transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        invoice: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        invoice: String,
        old_status: String,
        new_status: String,
    },
    OrderCancelled {
        order_id: Uuid,
        invoice: String,
        reason: String,
    },
    PaymentStatusChanged {
        invoice: String,
        old_status: String,
        new_status: String,
    },
    FlashSaleActivated {
        flash_sale_id: Uuid,
        at: DateTime<Utc>,
    },
    FlashSaleEnded {
        flash_sale_id: Uuid,
        at: DateTime<Utc>,
    },
}

/// Drains the event channel, logging every event until all senders are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated { order_id, invoice } => {
                info!(%order_id, %invoice, "order created");
            }
            Event::OrderStatusChanged {
                invoice,
                old_status,
                new_status,
                ..
            } => {
                info!(%invoice, %old_status, %new_status, "order status changed");
            }
            Event::OrderCancelled {
                invoice, reason, ..
            } => {
                info!(%invoice, %reason, "order cancelled");
            }
            Event::PaymentStatusChanged {
                invoice,
                old_status,
                new_status,
            } => {
                info!(%invoice, %old_status, %new_status, "payment status changed");
            }
            Event::FlashSaleActivated { flash_sale_id, at } => {
                info!(%flash_sale_id, %at, "flash sale activated");
            }
            Event::FlashSaleEnded { flash_sale_id, at } => {
                info!(%flash_sale_id, %at, "flash sale ended");
            }
        }
    }

    warn!("Event processing loop has ended");
}
