use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(String),
}

#[async_trait]
pub trait AddressGenerator: Send + Sync + Debug {
    /// Generate a receiving address for `user_id` on the chain carrying `asset`
    async fn generate_address(&self, asset: &str, user_id: i64) -> Result<String, AddressError>;
}

/// Address format family by chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFamily {
    /// BTC, LTC, DOGE, DASH
    Utxo,
    /// ETH, BNB, SHIB, MATIC
    Evm,
    Solana,
    Tron,
    Cardano,
    Ripple,
}

impl ChainFamily {
    pub fn for_asset(asset: &str) -> Option<Self> {
        match asset.to_ascii_uppercase().as_str() {
            "BTC" | "LTC" | "DOGE" | "DASH" => Some(ChainFamily::Utxo),
            "ETH" | "BNB" | "SHIB" | "MATIC" => Some(ChainFamily::Evm),
            "SOL" => Some(ChainFamily::Solana),
            "TRX" => Some(ChainFamily::Tron),
            "ADA" => Some(ChainFamily::Cardano),
            "XRP" => Some(ChainFamily::Ripple),
            _ => None,
        }
    }
}

/// Deterministic addresses derived from an md5 digest of (asset, user)
#[derive(Debug, Default)]
pub struct MockAddressGenerator;

#[async_trait]
impl AddressGenerator for MockAddressGenerator {
    async fn generate_address(&self, asset: &str, user_id: i64) -> Result<String, AddressError> {
        let family = ChainFamily::for_asset(asset)
            .ok_or_else(|| AddressError::UnsupportedAsset(asset.to_string()))?;
        let digest = md5::compute(format!("{}_{}", asset.to_ascii_lowercase(), user_id));

        Ok(match family {
            ChainFamily::Utxo => format!("1{:x}", digest),
            ChainFamily::Evm => format!("0x{:x}", digest),
            ChainFamily::Solana => format!("{:X}", digest),
            ChainFamily::Tron => format!("T{:x}", digest),
            ChainFamily::Cardano => format!("addr1{:x}", digest),
            ChainFamily::Ripple => format!("r{:x}", digest),
        })
    }
}
