//! Escrow status
//!
//! `SUCCESS` marks an escrow whose amount has been released to the buyer.
//! `CANCELLED` marks one refunded to the seller. Both are terminal.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    PaymentVerified,
    Cancelled,
    Disputed,
    Error,
    Success,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Pending => "PENDING",
            EscrowStatus::Open => "OPEN",
            EscrowStatus::PartiallyFilled => "PARTIALLY_FILLED",
            EscrowStatus::Filled => "FILLED",
            EscrowStatus::PaymentVerified => "PAYMENT_VERIFIED",
            EscrowStatus::Cancelled => "CANCELLED",
            EscrowStatus::Disputed => "DISPUTED",
            EscrowStatus::Error => "ERROR",
            EscrowStatus::Success => "SUCCESS",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Cancelled | EscrowStatus::Success)
    }

    /// Funds are still held and may be refunded or released
    #[inline]
    pub fn holds_funds(&self) -> bool {
        !self.is_terminal() && *self != EscrowStatus::Error
    }

    pub fn can_transition_to(&self, next: EscrowStatus) -> bool {
        use EscrowStatus::*;
        matches!(
            (self, next),
            (Open, Filled)
                | (Open, PartiallyFilled)
                | (Open, Cancelled)
                | (Open, Disputed)
                | (Open, Success)
                | (Pending, PaymentVerified)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Cancelled)
                | (Filled, PaymentVerified)
                | (Filled, Success)
                | (PaymentVerified, Success)
                | (Disputed, Cancelled)
                | (Disputed, Success)
                | (_, Error)
        ) && !self.is_terminal()
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscrowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(EscrowStatus::Pending),
            "OPEN" => Ok(EscrowStatus::Open),
            "PARTIALLY_FILLED" => Ok(EscrowStatus::PartiallyFilled),
            "FILLED" => Ok(EscrowStatus::Filled),
            "PAYMENT_VERIFIED" => Ok(EscrowStatus::PaymentVerified),
            "CANCELLED" | "CANCELED" => Ok(EscrowStatus::Cancelled),
            "DISPUTED" => Ok(EscrowStatus::Disputed),
            "ERROR" => Ok(EscrowStatus::Error),
            "SUCCESS" => Ok(EscrowStatus::Success),
            other => Err(format!("unknown escrow status: {}", other)),
        }
    }
}
