//! Order status state machine
//!
//! ```text
//! OPEN ──► PENDING ──► PAYMENT_VERIFIED
//!   │         │   ▲
//!   │         ▼   │
//!   ├────► FILLED ┘
//!   │         ▲
//!   │    PARTIALLY_FILLED
//!   └────► CANCELLED ◄── PENDING
//! ```
//!
//! Nothing transitions back to OPEN.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Resting on the book, waiting for a counter-order
    Open,
    /// Claimed by a counter-party, awaiting fiat payment
    Pending,
    /// Not produced by full-fill matching; kept for stored rows
    PartiallyFilled,
    Filled,
    /// Fiat payment confirmed by the order owner
    PaymentVerified,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "OPEN",
            OrderStatus::Pending => "PENDING",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::PaymentVerified => "PAYMENT_VERIFIED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::PaymentVerified)
    }

    /// Whether `self -> next` is an allowed transition
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Open, Pending)
                | (Open, Filled)
                | (Open, Cancelled)
                | (Pending, Filled)
                | (Pending, PaymentVerified)
                | (Pending, Cancelled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Cancelled)
                | (Filled, PaymentVerified)
        )
    }

    /// Orders in these states are part of a live trade and cannot be deleted
    #[inline]
    pub fn blocks_deletion(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::PartiallyFilled | OrderStatus::Pending
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OPEN" => Ok(OrderStatus::Open),
            "PENDING" => Ok(OrderStatus::Pending),
            "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
            "FILLED" => Ok(OrderStatus::Filled),
            "PAYMENT_VERIFIED" => Ok(OrderStatus::PaymentVerified),
            // Both spellings exist in stored rows
            "CANCELLED" | "CANCELED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}
