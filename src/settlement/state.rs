//! Settlement task FSM states
//!
//! ```text
//! INIT ──► ASSET_DEBITED ──► FIAT_CREDITED ──► ASSET_CREDITED ──► COMPLETED
//!  │             │
//!  ▼             ▼
//! FAILED    COMPENSATING ──► ROLLED_BACK
//! ```
//!
//! Stored as SMALLINT. Terminal: COMPLETED (40), FAILED (-10), ROLLED_BACK (-30).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum SettlementState {
    /// Recorded, nothing moved yet
    Init = 0,

    /// Seller asset taken out of their wallet
    AssetDebited = 10,

    /// Banking service credited the seller in fiat; crypto is in flight
    FiatCredited = 20,

    /// Buyer wallet credited; bookkeeping remains
    AssetCredited = 30,

    /// Terminal: history and fill amount recorded
    Completed = 40,

    /// Terminal: seller debit rejected, nothing moved
    Failed = -10,

    /// Fiat credit rejected; seller refund in progress
    Compensating = -20,

    /// Terminal: seller refunded
    RolledBack = -30,
}

impl SettlementState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SettlementState::Completed | SettlementState::Failed | SettlementState::RolledBack
        )
    }

    /// Seller asset has left their wallet but the buyer has not been credited
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SettlementState::AssetDebited
                | SettlementState::FiatCredited
                | SettlementState::Compensating
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SettlementState::Init),
            10 => Some(SettlementState::AssetDebited),
            20 => Some(SettlementState::FiatCredited),
            30 => Some(SettlementState::AssetCredited),
            40 => Some(SettlementState::Completed),
            -10 => Some(SettlementState::Failed),
            -20 => Some(SettlementState::Compensating),
            -30 => Some(SettlementState::RolledBack),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::Init => "INIT",
            SettlementState::AssetDebited => "ASSET_DEBITED",
            SettlementState::FiatCredited => "FIAT_CREDITED",
            SettlementState::AssetCredited => "ASSET_CREDITED",
            SettlementState::Completed => "COMPLETED",
            SettlementState::Failed => "FAILED",
            SettlementState::Compensating => "COMPENSATING",
            SettlementState::RolledBack => "ROLLED_BACK",
        }
    }

    /// Non-terminal ids, for the recovery scan
    pub fn pending_ids() -> [i16; 5] {
        [
            SettlementState::Init.id(),
            SettlementState::AssetDebited.id(),
            SettlementState::FiatCredited.id(),
            SettlementState::AssetCredited.id(),
            SettlementState::Compensating.id(),
        ]
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl serde::Serialize for SettlementState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SettlementState; 8] = [
        SettlementState::Init,
        SettlementState::AssetDebited,
        SettlementState::FiatCredited,
        SettlementState::AssetCredited,
        SettlementState::Completed,
        SettlementState::Failed,
        SettlementState::Compensating,
        SettlementState::RolledBack,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(SettlementState::Completed.is_terminal());
        assert!(SettlementState::Failed.is_terminal());
        assert!(SettlementState::RolledBack.is_terminal());
        assert!(!SettlementState::Init.is_terminal());
        assert!(!SettlementState::Compensating.is_terminal());
    }

    #[test]
    fn test_in_flight_excludes_init_and_terminal() {
        assert!(SettlementState::AssetDebited.is_in_flight());
        assert!(SettlementState::FiatCredited.is_in_flight());
        assert!(!SettlementState::Init.is_in_flight());
        assert!(!SettlementState::AssetCredited.is_in_flight());
        assert!(!SettlementState::Completed.is_in_flight());
    }

    #[test]
    fn test_id_roundtrip() {
        for s in ALL {
            assert_eq!(SettlementState::from_id(s.id()), Some(s));
        }
        assert_eq!(SettlementState::from_id(99), None);
    }

    #[test]
    fn test_pending_ids_are_non_terminal() {
        for id in SettlementState::pending_ids() {
            let s = SettlementState::from_id(id).unwrap();
            assert!(!s.is_terminal());
        }
    }
}
