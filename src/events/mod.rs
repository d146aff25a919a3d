use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Events emitted by the checkout core.
///
/// Emission is fire-and-forget: a full or closed channel never blocks or
/// fails a core operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded { cart_id: Uuid, variant_id: Uuid },
    CartItemUpdated { cart_id: Uuid, line_id: Uuid },
    CartItemRemoved { cart_id: Uuid, line_id: Uuid },
    CartCleared(Uuid),

    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled(Uuid),
    OrderRefunded(Uuid),

    // Stock events
    StockDebited {
        variant_id: Uuid,
        quantity: i32,
        quantity_after: i32,
    },
    StockCredited {
        variant_id: Uuid,
        quantity: i32,
        quantity_after: i32,
    },
    StockAdjusted {
        variant_id: Uuid,
        delta: i32,
        quantity_after: i32,
    },
    LowStock {
        variant_id: Uuid,
        quantity: i32,
        min_stock_level: i32,
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

    /// Sends an event, surfacing channel failures to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event and swallows failures with a warning. Core operations
    /// use this so the audit sink can never block or fail them.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropped event");
        }
    }
}

/// Builds a connected sender/receiver pair with the given buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains events, logging each one. Spawn this alongside the services; a
/// real deployment would fan events out to webhooks or a queue here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        info!(?event, "Event processed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (sender, rx) = channel(1);
        drop(rx);
        // Must not panic or error out.
        sender.send_or_log(Event::CartCreated(Uuid::new_v4())).await;
        assert!(sender.send(Event::CartCreated(Uuid::new_v4())).await.is_err());
    }

    #[tokio::test]
    async fn events_flow_through_the_channel() {
        let (sender, mut rx) = channel(4);
        let cart_id = Uuid::new_v4();
        sender.send(Event::CartCleared(cart_id)).await.unwrap();
        match rx.recv().await {
            Some(Event::CartCleared(id)) => assert_eq!(id, cart_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
