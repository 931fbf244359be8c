use tokio::sync::mpsc;
use tracing::info;

/// Events emitted by the order pipeline. Consumed by a background task;
/// emission is always best-effort and never blocks a request on failure.
#[derive(Debug, Clone)]
pub enum Event {
    OrderCreated {
        order_id: i32,
        total_amount: i64,
    },
    OrderPaid {
        order_id: i32,
        mpesa_receipt_number: Option<String>,
    },
    OrderPaymentFailed {
        order_id: i32,
    },
    OrderStatusChanged {
        order_id: i32,
        old_status: String,
        new_status: String,
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

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a connected sender/receiver pair with a bounded buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Background task draining the event channel. Currently events only feed
/// the structured log stream; an outbound consumer can be attached here
/// later without touching the emitting services.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                total_amount,
            } => {
                info!(order_id, total_amount, "event: order created");
            }
            Event::OrderPaid {
                order_id,
                mpesa_receipt_number,
            } => {
                info!(
                    order_id,
                    mpesa_receipt_number = mpesa_receipt_number.as_deref().unwrap_or("-"),
                    "event: order paid"
                );
            }
            Event::OrderPaymentFailed { order_id } => {
                info!(order_id, "event: order payment failed");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id, %old_status, %new_status, "event: order status changed");
            }
        }
    }
}
