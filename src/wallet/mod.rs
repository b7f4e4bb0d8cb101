//! Wallet ledger
//!
//! Every balance write is a read / compute / compare-and-set loop on the wallet
//! version column, so concurrent debits and credits on the same (user, asset)
//! never lose updates.

pub mod address;
pub mod provisioning;

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ExchangeError, Result};
use crate::models::Wallet;
use crate::store::{CasOutcome, WalletStore};

/// Attempts before a contended write gives up
pub const MAX_CAS_RETRIES: usize = 8;

/// Result of a ledger write
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerWrite {
    pub wallet: Wallet,
    /// False when the idempotency key had already been applied
    pub applied: bool,
}

pub struct WalletLedger {
    wallets: Arc<dyn WalletStore>,
}

impl WalletLedger {
    pub fn new(wallets: Arc<dyn WalletStore>) -> Self {
        Self { wallets }
    }

    pub async fn find(&self, user_id: i64, asset: &str) -> Result<Wallet> {
        self.wallets
            .find(user_id, asset)
            .await?
            .ok_or_else(|| ExchangeError::not_found(format!("{} wallet of user {}", asset, user_id)))
    }

    pub async fn find_by_address(&self, address: &str) -> Result<Wallet> {
        self.wallets
            .find_by_address(address)
            .await?
            .ok_or_else(|| ExchangeError::not_found(format!("wallet with address {}", address)))
    }

    pub async fn balances(&self, user_id: i64) -> Result<Vec<Wallet>> {
        Ok(self.wallets.list_by_user(user_id).await?)
    }

    /// Remove `amount` from the balance; fails without writing if it would go negative
    pub async fn debit(
        &self,
        user_id: i64,
        asset: &str,
        amount: Decimal,
        op_key: Option<&str>,
    ) -> Result<LedgerWrite> {
        ensure_positive(amount)?;
        let write = self
            .apply(user_id, asset, op_key, |w| {
                if w.balance < amount {
                    return Err(ExchangeError::InsufficientBalance(format!(
                        "{} balance {} is below {}",
                        asset, w.balance, amount
                    )));
                }
                Ok((w.balance - amount, w.fill_amount))
            })
            .await?;
        info!(user_id, asset, %amount, applied = write.applied, "Wallet debited");
        Ok(write)
    }

    pub async fn credit(
        &self,
        user_id: i64,
        asset: &str,
        amount: Decimal,
        op_key: Option<&str>,
    ) -> Result<LedgerWrite> {
        ensure_positive(amount)?;
        let write = self
            .apply(user_id, asset, op_key, |w| {
                Ok((checked_sum(w.balance, amount)?, w.fill_amount))
            })
            .await?;
        info!(user_id, asset, %amount, applied = write.applied, "Wallet credited");
        Ok(write)
    }

    /// Add to the cumulative sold volume; balance is untouched
    pub async fn add_fill_amount(
        &self,
        user_id: i64,
        asset: &str,
        amount: Decimal,
        op_key: Option<&str>,
    ) -> Result<LedgerWrite> {
        ensure_positive(amount)?;
        self.apply(user_id, asset, op_key, |w| {
            Ok((w.balance, checked_sum(w.fill_amount, amount)?))
        })
        .await
    }

    /// Undo a fill-amount increment after a failed settlement step
    pub async fn subtract_fill_amount(
        &self,
        user_id: i64,
        asset: &str,
        amount: Decimal,
    ) -> Result<LedgerWrite> {
        ensure_positive(amount)?;
        self.apply(user_id, asset, None, |w| {
            Ok((w.balance, (w.fill_amount - amount).max(Decimal::ZERO)))
        })
        .await
    }

    async fn apply<F>(
        &self,
        user_id: i64,
        asset: &str,
        op_key: Option<&str>,
        compute: F,
    ) -> Result<LedgerWrite>
    where
        F: Fn(&Wallet) -> Result<(Decimal, Decimal)> + Send + Sync,
    {
        for attempt in 1..=MAX_CAS_RETRIES {
            let wallet = self.find(user_id, asset).await?;
            if let Some(key) = op_key {
                if self.wallets.op_applied(key).await? {
                    debug!(user_id, asset, op_key = key, "Wallet write already applied");
                    return Ok(LedgerWrite {
                        wallet,
                        applied: false,
                    });
                }
            }
            let (balance, fill_amount) = compute(&wallet)?;

            match self
                .wallets
                .compare_and_set(wallet.id, wallet.version, balance, fill_amount, op_key)
                .await?
            {
                CasOutcome::Applied => {
                    return Ok(LedgerWrite {
                        wallet: Wallet {
                            balance,
                            fill_amount,
                            version: wallet.version + 1,
                            ..wallet
                        },
                        applied: true,
                    });
                }
                CasOutcome::AlreadyApplied => {
                    debug!(user_id, asset, op_key, "Wallet write already applied");
                    return Ok(LedgerWrite {
                        wallet,
                        applied: false,
                    });
                }
                CasOutcome::VersionMismatch => {
                    debug!(user_id, asset, attempt, "Wallet version moved, retrying");
                    tokio::task::yield_now().await;
                }
            }
        }

        warn!(user_id, asset, "Wallet write abandoned after repeated contention");
        Err(ExchangeError::ConcurrentModification(format!(
            "{} wallet of user {} is under contention",
            asset, user_id
        )))
    }
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(ExchangeError::Validation(format!(
            "amount must be greater than zero, got {}",
            amount
        )));
    }
    Ok(())
}

fn checked_sum(current: Decimal, amount: Decimal) -> Result<Decimal> {
    current.checked_add(amount).ok_or_else(|| {
        ExchangeError::Validation(format!("{} + {} is out of range", current, amount))
    })
}
