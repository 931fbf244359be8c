//! Customer notification seam.
//!
//! The only notification the pipeline sends today is "your order is ready",
//! dispatched exactly once when an order transitions into `READY`. Delivery
//! is best-effort: a failed dispatch is logged and never fails the status
//! update that triggered it.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::ServiceError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    /// Tells the customer their order is ready for pickup.
    async fn notify_order_ready(&self, user_id: &str, order_id: i32) -> Result<(), ServiceError>;
}

#[derive(Debug, Serialize)]
struct ReadyNotification<'a> {
    user_id: &'a str,
    order_id: i32,
    title: &'static str,
    body: String,
}

/// Posts ready-notifications to an external push relay over HTTP. When no
/// relay URL is configured, dispatches degrade to log lines so the rest of
/// the pipeline behaves identically in every environment.
pub struct PushNotifier {
    http: reqwest::Client,
    notify_url: Option<String>,
}

impl PushNotifier {
    pub fn new(notify_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            notify_url,
        }
    }
}

#[async_trait]
impl OrderNotifier for PushNotifier {
    async fn notify_order_ready(&self, user_id: &str, order_id: i32) -> Result<(), ServiceError> {
        let Some(url) = &self.notify_url else {
            info!(user_id, order_id, "order ready (no notify relay configured)");
            return Ok(());
        };

        let payload = ReadyNotification {
            user_id,
            order_id,
            title: "Order ready",
            body: format!("Order #{order_id} is ready for pickup"),
        };

        match self.http.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!(user_id, order_id, "ready notification dispatched");
                Ok(())
            }
            Ok(response) => {
                warn!(
                    user_id,
                    order_id,
                    status = %response.status(),
                    "notify relay rejected ready notification"
                );
                Err(ServiceError::ExternalServiceError(format!(
                    "notify relay returned {}",
                    response.status()
                )))
            }
            Err(e) => {
                warn!(user_id, order_id, error = %e, "ready notification failed");
                Err(ServiceError::ExternalServiceError(format!(
                    "notify relay: {e}"
                )))
            }
        }
    }
}
