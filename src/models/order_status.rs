use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::errors::ServiceError;

/// Lifecycle of an order.
///
/// `PENDING_PAYMENT` resolves exactly once to `PAID` or `FAILED`; a paid
/// order then moves through the operational states. `COMPLETED`, `FAILED`
/// and `CANCELLED` are terminal.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum OrderStatus {
    #[strum(serialize = "PENDING_PAYMENT")]
    #[serde(rename = "PENDING_PAYMENT")]
    PendingPayment,
    #[strum(serialize = "PAID")]
    #[serde(rename = "PAID")]
    Paid,
    #[strum(serialize = "FAILED")]
    #[serde(rename = "FAILED")]
    Failed,
    #[strum(serialize = "PREPARING")]
    #[serde(rename = "PREPARING")]
    Preparing,
    #[strum(serialize = "READY")]
    #[serde(rename = "READY")]
    Ready,
    #[strum(serialize = "COMPLETED")]
    #[serde(rename = "COMPLETED")]
    Completed,
    #[strum(serialize = "CANCELLED")]
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl OrderStatus {
    /// Parses a stored or client-supplied status token.
    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        value
            .parse::<OrderStatus>()
            .map_err(|_| ServiceError::InvalidStatus(format!("Unknown order status: {value}")))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `target` is a legal transition.
    ///
    /// Any non-terminal state may be cancelled by an operator. Payment
    /// resolution (`PAID`/`FAILED`) is only reachable from
    /// `PENDING_PAYMENT`, which is itself never re-enterable.
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        use OrderStatus::*;
        if target == Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (PendingPayment, Paid)
                | (PendingPayment, Failed)
                | (Paid, Preparing)
                | (Preparing, Ready)
                | (Ready, Completed)
        )
    }
}

/// Size variant for a menu item. Only two cup sizes exist.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ItemSize {
    #[strum(serialize = "single")]
    #[serde(rename = "single")]
    Single,
    #[strum(serialize = "double")]
    #[serde(rename = "double")]
    Double,
}

impl ItemSize {
    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        value
            .to_ascii_lowercase()
            .parse::<ItemSize>()
            .map_err(|_| ServiceError::ValidationError(format!("Invalid size: {value}")))
    }
}
