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

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartUpdated(Uuid),
    CartEmptied(Uuid),

    // Checkout events
    PaymentIntentIssued {
        cart_id: Uuid,
        payment_intent_id: String,
        amount_minor: i64,
    },

    // Order events
    OrderCreated {
        order_id: Uuid,
        cart_id: Uuid,
        payment_intent_id: Option<String>,
    },
    OrderPaid(Uuid),

    // Guest events
    GuestUserUpserted {
        user_id: Uuid,
        created: bool,
    },

    // Webhook events
    WebhookIgnored {
        event_id: String,
        event_type: String,
    },
}

impl Event {
    /// Short stable name used as a log field.
    pub fn name(&self) -> &'static str {
        match self {
            Event::CartCreated(_) => "cart_created",
            Event::CartUpdated(_) => "cart_updated",
            Event::CartEmptied(_) => "cart_emptied",
            Event::PaymentIntentIssued { .. } => "payment_intent_issued",
            Event::OrderCreated { .. } => "order_created",
            Event::OrderPaid(_) => "order_paid",
            Event::GuestUserUpserted { .. } => "guest_user_upserted",
            Event::WebhookIgnored { .. } => "webhook_ignored",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) -> usize {
    info!("Starting event processing loop");
    let mut processed = 0;

    while let Some(event) = rx.recv().await {
        processed += 1;
        match &event {
            Event::OrderCreated {
                order_id,
                cart_id,
                payment_intent_id,
            } => {
                info!(
                    event = event.name(),
                    %order_id,
                    %cart_id,
                    payment_intent_id = payment_intent_id.as_deref().unwrap_or("-"),
                    "Order materialized from cart"
                );
            }
            Event::PaymentIntentIssued {
                cart_id,
                payment_intent_id,
                amount_minor,
            } => {
                info!(
                    event = event.name(),
                    %cart_id,
                    %payment_intent_id,
                    amount_minor,
                    "Payment intent issued"
                );
            }
            other => info!(event = other.name(), payload = ?other, "Domain event"),
        }
    }

    info!(processed, "Event processing loop stopped");
    processed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_events_drains_until_senders_close() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let worker = tokio::spawn(process_events(rx));

        sender.send_or_log(Event::CartCreated(Uuid::new_v4())).await;
        sender.send_or_log(Event::OrderPaid(Uuid::new_v4())).await;
        drop(sender);

        assert_eq!(worker.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        assert!(sender.send(Event::CartEmptied(Uuid::new_v4())).await.is_err());
        // send_or_log swallows the same failure
        sender.send_or_log(Event::CartEmptied(Uuid::new_v4())).await;
    }
}
