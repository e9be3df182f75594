use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Handle used by services to publish domain events onto the in-process bus.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
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

    /// Sends an event, logging rather than propagating a full/closed channel.
    /// Domain operations must not fail because a notification could not be queued.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropped event: {}", e);
        }
    }
}

// The events that can occur in the order/payment core. Downstream collaborators
// (email notifications, analytics) subscribe to these; nothing in the core
// depends on a subscriber being present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemUpserted { cart_id: Uuid, variant_id: Uuid },
    CartItemRemoved { cart_id: Uuid, variant_id: Uuid },
    CartCleared(Uuid),
    CartsPurged { count: u64 },

    // Checkout events
    CheckoutCompleted { cart_id: Uuid, order_id: Uuid },

    // Order events
    OrderCreated(Uuid),
    OrderPaid { order_id: Uuid, transaction_id: String },
    OrderPaymentFailed { order_id: Uuid, reason: Option<String> },
    OrderRefunded { order_id: Uuid, transaction_id: String },
    OrderCancelled(Uuid),
    OrderFulfillmentChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    StalePendingOrdersExpired { count: u64, cutoff: DateTime<Utc> },

    // Inventory events
    InventoryReserved { variant_id: Uuid, quantity: i32 },
    InventoryReleased { variant_id: Uuid, quantity: i32 },
    LowStock { variant_id: Uuid, remaining: i32 },
}

/// Consumes events from the bus and logs them. Collaborator integrations
/// (order-confirmation email, shipping notification) hook in here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPaid {
                order_id,
                transaction_id,
            } => {
                info!(order_id = %order_id, transaction_id = %transaction_id, "Order paid");
            }
            Event::OrderPaymentFailed { order_id, reason } => {
                warn!(order_id = %order_id, reason = ?reason, "Order payment failed");
            }
            Event::OrderFulfillmentChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id = %order_id, from = %old_status, to = %new_status, "Fulfillment changed");
            }
            other => {
                info!("Event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_does_not_fail_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        // Must not panic or error out
        sender.send_or_log(Event::OrderCreated(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn events_round_trip_through_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let id = Uuid::new_v4();
        sender.send(Event::CartCreated(id)).await.unwrap();
        match rx.recv().await {
            Some(Event::CartCreated(got)) => assert_eq!(got, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
