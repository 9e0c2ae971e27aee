use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::Level;

/// Domain events emitted by the payment core. Delivery is best-effort;
/// nothing in the order lifecycle depends on an event being observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        level: Level,
    },
    PaymentCompleted {
        order_id: Uuid,
        user_id: Uuid,
        level: Level,
    },
    PaymentFailed {
        order_id: Uuid,
        user_id: Uuid,
        level: Level,
    },
    OrderRefunded {
        order_id: Uuid,
        user_id: Uuid,
        level: Level,
    },
    EntitlementGranted {
        user_id: Uuid,
        level: Level,
    },
    EntitlementRevoked {
        user_id: Uuid,
        level: Level,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel, logging each event. Notification fan-out
/// (email receipts, analytics) subscribes here.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = receiver.recv().await {
        debug!(?event, "Processing event");
        match &event {
            Event::PaymentCompleted {
                order_id,
                user_id,
                level,
            } => {
                info!(%order_id, %user_id, %level, "Payment completed");
            }
            Event::PaymentFailed {
                order_id,
                user_id,
                level,
            } => {
                warn!(%order_id, %user_id, %level, "Payment failed");
            }
            Event::OrderRefunded {
                order_id,
                user_id,
                level,
            } => {
                info!(%order_id, %user_id, %level, "Order refunded");
            }
            _ => {}
        }
    }
    info!("Event processor stopped");
}
