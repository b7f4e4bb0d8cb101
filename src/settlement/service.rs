//! Sell-with-address entry point
//!
//! Runs the synchronous checks, records the task and hands execution to the
//! coordinator on a detached task. The caller gets a receipt immediately.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info};
use ulid::Ulid;

use super::coordinator::SettlementCoordinator;
use super::state::SettlementState;
use super::types::{SellWithAddressRequest, SettlementReceipt, SettlementTask};
use crate::clients::BankingClient;
use crate::error::{ExchangeError, Result};
use crate::fee;
use crate::store::SettlementStore;
use crate::wallet::WalletLedger;

pub struct SettlementService {
    tasks: Arc<dyn SettlementStore>,
    ledger: Arc<WalletLedger>,
    banking: Arc<dyn BankingClient>,
    coordinator: Arc<SettlementCoordinator>,
    platform_fee_rate: Decimal,
}

impl SettlementService {
    pub fn new(
        tasks: Arc<dyn SettlementStore>,
        ledger: Arc<WalletLedger>,
        banking: Arc<dyn BankingClient>,
        coordinator: Arc<SettlementCoordinator>,
        platform_fee_rate: Decimal,
    ) -> Self {
        Self {
            tasks,
            ledger,
            banking,
            coordinator,
            platform_fee_rate,
        }
    }

    /// Validate and record a sale; execution continues in the background
    pub async fn sell_with_address(
        &self,
        seller_id: i64,
        token: &str,
        req: SellWithAddressRequest,
    ) -> Result<SettlementReceipt> {
        let task = self.prepare(seller_id, token, req).await?;
        self.tasks.insert(&task).await?;
        info!(
            task_id = %task.task_id,
            seller_id,
            buyer_id = task.buyer_id,
            asset = %task.asset,
            amount = %task.amount,
            "Settlement task created"
        );

        let receipt = SettlementReceipt::from(&task);
        let coordinator = self.coordinator.clone();
        let task_id = task.task_id;
        tokio::spawn(async move {
            if let Err(e) = coordinator.execute(&task_id).await {
                error!(task_id = %task_id, error = %e.details(), "Detached settlement failed");
            }
        });
        Ok(receipt)
    }

    /// Task status, visible to its seller and buyer only
    pub async fn get_task(&self, task_id: &str, caller_id: i64) -> Result<SettlementTask> {
        let task = self.coordinator.get(task_id).await?;
        if task.seller_id != caller_id && task.buyer_id != caller_id {
            return Err(ExchangeError::Forbidden(format!(
                "settlement task {} belongs to other users",
                task_id
            )));
        }
        Ok(task)
    }

    async fn prepare(
        &self,
        seller_id: i64,
        token: &str,
        req: SellWithAddressRequest,
    ) -> Result<SettlementTask> {
        if req.amount <= Decimal::ZERO || req.price <= Decimal::ZERO {
            return Err(ExchangeError::Validation(
                "amount and price must be greater than zero".to_string(),
            ));
        }
        if req.wallet_address.trim().is_empty() {
            return Err(ExchangeError::Validation("walletAddress is required".to_string()));
        }
        let trade_value = fee::notional(req.amount, req.price)?;
        let platform_fee = fee::platform_fee(req.amount, req.price, self.platform_fee_rate)?;

        let seller_wallet = self.ledger.find(seller_id, &req.asset).await?;
        if seller_wallet.balance < req.amount {
            return Err(ExchangeError::InsufficientBalance(format!(
                "{} balance {} is below {}",
                req.asset, seller_wallet.balance, req.amount
            )));
        }

        let buyer_wallet = self.ledger.find_by_address(&req.wallet_address).await?;
        if buyer_wallet.asset != seller_wallet.asset {
            return Err(ExchangeError::Validation(format!(
                "address {} holds {}, not {}",
                req.wallet_address, buyer_wallet.asset, seller_wallet.asset
            )));
        }
        if buyer_wallet.user_id == seller_id {
            return Err(ExchangeError::Forbidden(
                "cannot sell to your own wallet".to_string(),
            ));
        }

        let buyer_fiat = self
            .banking
            .fiat_balance(buyer_wallet.user_id, &req.currency, token)
            .await?;
        if buyer_fiat.balance < trade_value {
            return Err(ExchangeError::InsufficientBalance(format!(
                "buyer {} balance {} is below {}",
                req.currency, buyer_fiat.balance, trade_value
            )));
        }

        let now = Utc::now();
        Ok(SettlementTask {
            task_id: Ulid::new().to_string(),
            seller_id,
            buyer_id: buyer_wallet.user_id,
            asset: seller_wallet.asset,
            amount: req.amount,
            price: req.price,
            platform_fee,
            currency: req.currency,
            payment_method: req.payment_method,
            buyer_address: req.wallet_address,
            auth_token: Some(token.to_string()),
            state: SettlementState::Init,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        })
    }
}
