use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::fee::DEFAULT_PLATFORM_FEE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; in-memory stores when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub services: ServicesConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub wallets: WalletsConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Identity and banking collaborators
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServicesConfig {
    pub identity_url: String,
    pub banking_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            identity_url: "http://localhost:8081/api/v1".to_string(),
            banking_url: "http://localhost:8082/api/v1".to_string(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ServicesConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    /// Base64-encoded HS256 secret shared with the identity service
    pub jwt_secret: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WalletsConfig {
    pub supported_assets: Vec<String>,
}

impl Default for WalletsConfig {
    fn default() -> Self {
        Self {
            supported_assets: [
                "BTC", "ETH", "SOL", "BNB", "LTC", "SHIB", "DOGE", "TRX", "ADA", "DASH", "XRP",
                "MATIC",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Sell-with-address recovery worker
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    pub scan_interval_ms: u64,
    pub stale_after_ms: u64,
    pub batch_size: usize,
    pub platform_fee_rate: Decimal,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 30_000,
            stale_after_ms: 60_000,
            batch_size: 100,
            platform_fee_rate: DEFAULT_PLATFORM_FEE,
        }
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml`; `DATABASE_URL` overrides `postgres_url`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut config = Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.postgres_url = Some(url);
            }
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: exchange.log
use_json: false
rotation: daily
gateway:
  host: 0.0.0.0
  port: 8080
auth:
  jwt_secret: c2VjcmV0
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert!(config.postgres_url.is_none());
        assert_eq!(config.services.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.wallets.supported_assets.len(), 12);
        assert_eq!(config.settlement.platform_fee_rate, DEFAULT_PLATFORM_FEE);
    }

    #[test]
    fn test_settlement_overrides() {
        let yaml = format!(
            "{}settlement:\n  scan_interval_ms: 500\n  stale_after_ms: 2000\n  batch_size: 5\n  platform_fee_rate: \"0.01\"\n",
            MINIMAL
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.settlement.batch_size, 5);
        assert_eq!(config.settlement.platform_fee_rate, Decimal::new(1, 2));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        assert!(matches!(
            AppConfig::load("does-not-exist"),
            Err(ConfigError::Read { .. })
        ));
    }
}
