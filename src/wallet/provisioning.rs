//! Wallet provisioning
//!
//! Creates one wallet per supported asset for a newly verified user. Address
//! generation runs as one task per asset; the batch is saved only if every
//! task succeeds.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

use super::address::AddressGenerator;
use crate::error::{ExchangeError, Result};
use crate::models::{NewWallet, Wallet};
use crate::store::{StoreError, WalletStore};

pub struct WalletProvisioner {
    wallets: Arc<dyn WalletStore>,
    generator: Arc<dyn AddressGenerator>,
    assets: Vec<String>,
}

impl WalletProvisioner {
    pub fn new(
        wallets: Arc<dyn WalletStore>,
        generator: Arc<dyn AddressGenerator>,
        assets: Vec<String>,
    ) -> Self {
        Self {
            wallets,
            generator,
            assets,
        }
    }

    pub fn supported_assets(&self) -> &[String] {
        &self.assets
    }

    /// Create every supported wallet for `user_id`, all or nothing
    pub async fn provision(&self, user_id: i64) -> Result<Vec<Wallet>> {
        if user_id <= 0 {
            return Err(ExchangeError::Validation("userId is required".to_string()));
        }
        if !self.wallets.list_by_user(user_id).await?.is_empty() {
            return Err(ExchangeError::Conflict(format!(
                "wallets already exist for user {}",
                user_id
            )));
        }

        let mut tasks = JoinSet::new();
        for asset in &self.assets {
            let generator = self.generator.clone();
            let asset = asset.clone();
            tasks.spawn(async move {
                let address = generator.generate_address(&asset, user_id).await;
                (asset, address)
            });
        }

        let mut generated = Vec::with_capacity(self.assets.len());
        let mut first_error: Option<ExchangeError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok((asset, Ok(address))) => Ok(NewWallet {
                    user_id,
                    asset,
                    address,
                }),
                Ok((asset, Err(e))) => Err(ExchangeError::Validation(format!(
                    "address generation failed for {}: {}",
                    asset, e
                ))),
                Err(e) => Err(ExchangeError::Internal(format!(
                    "address generation task failed: {}",
                    e
                ))),
            };
            match outcome {
                Ok(wallet) => generated.push(wallet),
                Err(e) => {
                    error!(user_id, error = %e.details(), "Wallet provisioning aborted");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        // Stable order regardless of task completion order
        generated.sort_by_key(|w| {
            self.assets
                .iter()
                .position(|a| *a == w.asset)
                .unwrap_or(usize::MAX)
        });

        let created = self.wallets.insert_batch(generated).await.map_err(|e| match e {
            StoreError::Duplicate(what) => ExchangeError::Conflict(what),
            other => other.into(),
        })?;
        info!(user_id, count = created.len(), "Wallets provisioned");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::wallet::address::{AddressError, MockAddressGenerator};
    use async_trait::async_trait;

    fn assets(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[derive(Debug)]
    struct FailingGenerator;

    #[async_trait]
    impl AddressGenerator for FailingGenerator {
        async fn generate_address(&self, asset: &str, user_id: i64) -> std::result::Result<String, AddressError> {
            if asset == "SOL" {
                return Err(AddressError::Network("rpc down".into()));
            }
            Ok(format!("{}-{}", asset, user_id))
        }
    }

    #[tokio::test]
    async fn test_provision_one_wallet_per_asset() {
        let store = Arc::new(MemoryStore::new());
        let p = WalletProvisioner::new(
            store.clone(),
            Arc::new(MockAddressGenerator),
            assets(&["BTC", "ETH", "SOL"]),
        );
        let created = p.provision(7).await.unwrap();
        let names: Vec<&str> = created.iter().map(|w| w.asset.as_str()).collect();
        assert_eq!(names, vec!["BTC", "ETH", "SOL"]);
        assert!(created.iter().all(|w| w.balance.is_zero() && w.version == 0));
    }

    #[tokio::test]
    async fn test_second_provision_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let p = WalletProvisioner::new(store, Arc::new(MockAddressGenerator), assets(&["BTC"]));
        p.provision(7).await.unwrap();
        assert!(matches!(p.provision(7).await, Err(ExchangeError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_single_failure_saves_nothing() {
        let store = Arc::new(MemoryStore::new());
        let p = WalletProvisioner::new(
            store.clone(),
            Arc::new(FailingGenerator),
            assets(&["BTC", "SOL", "ETH"]),
        );
        assert!(p.provision(3).await.is_err());
        assert!(store.list_by_user(3).await.unwrap().is_empty());
    }
}
