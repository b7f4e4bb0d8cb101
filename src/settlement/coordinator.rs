//! Settlement Coordinator
//!
//! Drives a sell-with-address task through its FSM. Every step performs one
//! idempotent side effect keyed by `{task_id}:{step}` and then advances the
//! persisted state with a CAS, so a step interrupted between the two is simply
//! re-run by the next caller.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::state::SettlementState;
use super::types::SettlementTask;
use crate::clients::{BankingClient, CreditAccountRequest};
use crate::error::{ExchangeError, Result};
use crate::models::{NewHistory, TransactionType};
use crate::store::{HistoryStore, SettlementStore};
use crate::wallet::WalletLedger;

/// Steps attempted by one `execute` call before leaving the task to the worker
const MAX_STEPS: usize = 16;

pub struct SettlementCoordinator {
    tasks: Arc<dyn SettlementStore>,
    history: Arc<dyn HistoryStore>,
    ledger: Arc<WalletLedger>,
    banking: Arc<dyn BankingClient>,
    retry_delay: Duration,
}

impl SettlementCoordinator {
    pub fn new(
        tasks: Arc<dyn SettlementStore>,
        history: Arc<dyn HistoryStore>,
        ledger: Arc<WalletLedger>,
        banking: Arc<dyn BankingClient>,
    ) -> Self {
        Self {
            tasks,
            history,
            ledger,
            banking,
            retry_delay: Duration::from_millis(100),
        }
    }

    pub fn tasks(&self) -> &Arc<dyn SettlementStore> {
        &self.tasks
    }

    pub async fn get(&self, task_id: &str) -> Result<SettlementTask> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or_else(|| ExchangeError::not_found(format!("settlement task {}", task_id)))
    }

    /// Execute one step of the FSM and return the resulting state
    pub async fn step(&self, task_id: &str) -> Result<SettlementState> {
        let task = self.get(task_id).await?;
        if task.state.is_terminal() {
            return Ok(task.state);
        }

        let new_state = match task.state {
            SettlementState::Init => self.step_init(&task).await?,
            SettlementState::AssetDebited => self.step_asset_debited(&task).await?,
            SettlementState::FiatCredited => self.step_fiat_credited(&task).await?,
            SettlementState::AssetCredited => self.step_asset_credited(&task).await?,
            SettlementState::Compensating => self.step_compensating(&task).await?,
            terminal => terminal,
        };

        // No progress: count it so the worker can flag stuck tasks
        if !new_state.is_terminal() && new_state == task.state {
            self.tasks.increment_retry(task_id).await?;
        }
        Ok(new_state)
    }

    /// Step until terminal or until a step makes no progress
    pub async fn execute(&self, task_id: &str) -> Result<SettlementState> {
        let mut state = self.get(task_id).await?.state;
        for i in 0..MAX_STEPS {
            if state.is_terminal() {
                debug!(task_id, state = %state, steps = i, "Settlement finished");
                return Ok(state);
            }
            let next = self.step(task_id).await?;
            if next == state {
                // Transient failure; one short retry, then hand over to the worker
                tokio::time::sleep(self.retry_delay).await;
                let retried = self.step(task_id).await?;
                if retried == state {
                    warn!(task_id, state = %state, "Settlement stalled, left for recovery");
                    return Ok(state);
                }
                state = retried;
            } else {
                state = next;
            }
        }
        Ok(state)
    }

    /// Init: take the asset out of the seller's wallet
    async fn step_init(&self, task: &SettlementTask) -> Result<SettlementState> {
        let op_key = task.op_key("debit");
        match self
            .ledger
            .debit(task.seller_id, &task.asset, task.amount, Some(&op_key))
            .await
        {
            Ok(_) => {
                self.advance(task, SettlementState::Init, SettlementState::AssetDebited, None)
                    .await
            }
            Err(e) if !e.is_transient() => {
                warn!(task_id = %task.task_id, error = %e.details(), "Seller debit rejected");
                self.advance(
                    task,
                    SettlementState::Init,
                    SettlementState::Failed,
                    Some(&e.details()),
                )
                .await
            }
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e.details(), "Seller debit failed, will retry");
                Ok(SettlementState::Init)
            }
        }
    }

    /// AssetDebited: fiat moves from the buyer to the seller at the bank
    async fn step_asset_debited(&self, task: &SettlementTask) -> Result<SettlementState> {
        let Some(token) = task.auth_token.as_deref() else {
            error!(task_id = %task.task_id, "No credentials left for the fiat credit");
            return self
                .advance(
                    task,
                    SettlementState::AssetDebited,
                    SettlementState::Compensating,
                    Some("missing banking credentials"),
                )
                .await;
        };

        let request = CreditAccountRequest {
            recipient_user_id: task.seller_id,
            creditor_user_id: task.buyer_id,
            currency_type: task.currency.clone(),
            amount: task.trade_value(),
            profit: task.platform_fee,
        };
        match self
            .banking
            .credit_account(&request, token, &task.op_key("fiat"))
            .await
        {
            Ok(()) => {
                self.advance(
                    task,
                    SettlementState::AssetDebited,
                    SettlementState::FiatCredited,
                    None,
                )
                .await
            }
            Err(e) if e.is_definitive() => {
                warn!(task_id = %task.task_id, error = %e, "Fiat credit rejected, compensating");
                self.advance(
                    task,
                    SettlementState::AssetDebited,
                    SettlementState::Compensating,
                    Some(&e.to_string()),
                )
                .await
            }
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "Fiat credit failed, will retry");
                Ok(SettlementState::AssetDebited)
            }
        }
    }

    /// FiatCredited: the buyer receives the asset
    async fn step_fiat_credited(&self, task: &SettlementTask) -> Result<SettlementState> {
        match self
            .ledger
            .credit(task.buyer_id, &task.asset, task.amount, Some(&task.op_key("credit")))
            .await
        {
            Ok(_) => {
                self.advance(
                    task,
                    SettlementState::FiatCredited,
                    SettlementState::AssetCredited,
                    None,
                )
                .await
            }
            Err(e) => {
                error!(task_id = %task.task_id, buyer_id = task.buyer_id, error = %e.details(), "Buyer credit failed, will retry");
                Ok(SettlementState::FiatCredited)
            }
        }
    }

    /// AssetCredited: history for both sides and the seller's fill amount
    async fn step_asset_credited(&self, task: &SettlementTask) -> Result<SettlementState> {
        let bookkeeping = async {
            self.history
                .append(NewHistory {
                    kind: TransactionType::Sell,
                    quantity: task.amount,
                    price: task.price,
                    fee: rust_decimal::Decimal::ZERO,
                    asset_id: task.asset.clone(),
                    user_id: task.seller_id,
                    payment_method: task.payment_method,
                    reference: Some(task.op_key("sell")),
                })
                .await?;
            self.history
                .append(NewHistory {
                    kind: TransactionType::Buy,
                    quantity: task.amount,
                    price: task.price,
                    fee: task.platform_fee,
                    asset_id: task.asset.clone(),
                    user_id: task.buyer_id,
                    payment_method: task.payment_method,
                    reference: Some(task.op_key("buy")),
                })
                .await?;
            self.ledger
                .add_fill_amount(task.seller_id, &task.asset, task.amount, Some(&task.op_key("fill")))
                .await?;
            Ok::<_, ExchangeError>(())
        };

        match bookkeeping.await {
            Ok(()) => {
                self.advance(
                    task,
                    SettlementState::AssetCredited,
                    SettlementState::Completed,
                    None,
                )
                .await
            }
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e.details(), "Settlement bookkeeping failed, will retry");
                Ok(SettlementState::AssetCredited)
            }
        }
    }

    /// Compensating: return the asset to the seller
    async fn step_compensating(&self, task: &SettlementTask) -> Result<SettlementState> {
        match self
            .ledger
            .credit(task.seller_id, &task.asset, task.amount, Some(&task.op_key("refund")))
            .await
        {
            Ok(_) => {
                self.advance(
                    task,
                    SettlementState::Compensating,
                    SettlementState::RolledBack,
                    None,
                )
                .await
            }
            Err(e) => {
                error!(task_id = %task.task_id, error = %e.details(), "CRITICAL: seller refund failed, will retry");
                Ok(SettlementState::Compensating)
            }
        }
    }

    /// CAS the task forward; on a lost race report whatever state won
    async fn advance(
        &self,
        task: &SettlementTask,
        from: SettlementState,
        to: SettlementState,
        error: Option<&str>,
    ) -> Result<SettlementState> {
        if self
            .tasks
            .update_state_if(&task.task_id, from, to, error)
            .await?
        {
            info!(task_id = %task.task_id, from = %from, to = %to, "Settlement advanced");
            return Ok(to);
        }
        let current = self.get(&task.task_id).await?.state;
        debug!(task_id = %task.task_id, expected = %from, current = %current, "Settlement moved concurrently");
        Ok(current)
    }
}
