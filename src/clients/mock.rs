//! In-process collaborators for tests and standalone mode

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{
    BankDetails, BankingClient, ClientError, CreditAccountRequest, FiatBalance, IdentityClient,
    UserProfile,
};

#[derive(Default)]
pub struct MockIdentityClient {
    users: DashMap<i64, UserProfile>,
}

impl MockIdentityClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an enabled user
    pub fn add_user(&self, id: i64, username: &str) {
        self.users.insert(
            id,
            UserProfile {
                id,
                email: format!("{}@example.com", username),
                username: username.to_string(),
                enabled: true,
                role: "USER".to_string(),
                records: Vec::new(),
            },
        );
    }

    pub fn disable_user(&self, id: i64) {
        if let Some(mut user) = self.users.get_mut(&id) {
            user.enabled = false;
        }
    }
}

#[async_trait]
impl IdentityClient for MockIdentityClient {
    async fn find_by_username(
        &self,
        username: &str,
        _token: &str,
    ) -> Result<UserProfile, ClientError> {
        self.users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.clone())
            .ok_or_else(|| ClientError::NotFound(format!("user {}", username)))
    }

    async fn find_by_user_id(&self, user_id: i64, _token: &str) -> Result<UserProfile, ClientError> {
        self.users
            .get(&user_id)
            .map(|u| u.clone())
            .ok_or_else(|| ClientError::NotFound(format!("user {}", user_id)))
    }
}

/// Banking fake with recorded credits and failure toggles
#[derive(Default)]
pub struct MockBankingClient {
    banks: DashMap<(i64, i64), BankDetails>,
    fiat: DashMap<(i64, String), Decimal>,
    credits: Mutex<Vec<(String, CreditAccountRequest)>>,
    credit_calls: AtomicUsize,
    fail_credit_transient: AtomicBool,
    reject_credit: AtomicBool,
    unavailable: AtomicBool,
}

impl MockBankingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bank(&self, user_id: i64, bank_id: i64) {
        self.banks.insert(
            (user_id, bank_id),
            BankDetails {
                id: bank_id,
                bank_code: format!("{:03}", bank_id),
                bank_name: "Mock Bank".to_string(),
                account_holder_name: format!("User {}", user_id),
                account_number: format!("{:010}", user_id * 1000 + bank_id),
            },
        );
    }

    pub fn set_fiat_balance(&self, user_id: i64, currency: &str, balance: Decimal) {
        self.fiat.insert((user_id, currency.to_string()), balance);
    }

    /// Credits accepted so far, keyed by idempotency key
    pub fn credits(&self) -> Vec<(String, CreditAccountRequest)> {
        self.credits
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn credit_calls(&self) -> usize {
        self.credit_calls.load(Ordering::SeqCst)
    }

    /// Credit calls time out until reset
    pub fn set_fail_credit_transient(&self, fail: bool) {
        self.fail_credit_transient.store(fail, Ordering::SeqCst);
    }

    /// Credit calls are refused with 422
    pub fn set_reject_credit(&self, reject: bool) {
        self.reject_credit.store(reject, Ordering::SeqCst);
    }

    /// Every call fails with a transport error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ClientError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("banking service down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BankingClient for MockBankingClient {
    async fn bank_details(
        &self,
        user_id: i64,
        bank_id: i64,
        _token: &str,
    ) -> Result<BankDetails, ClientError> {
        self.check_available()?;
        self.banks
            .get(&(user_id, bank_id))
            .map(|b| b.clone())
            .ok_or_else(|| ClientError::NotFound(format!("bank {} of user {}", bank_id, user_id)))
    }

    async fn fiat_balance(
        &self,
        user_id: i64,
        currency: &str,
        _token: &str,
    ) -> Result<FiatBalance, ClientError> {
        self.check_available()?;
        let balance = self
            .fiat
            .get(&(user_id, currency.to_string()))
            .map(|b| *b)
            .ok_or_else(|| ClientError::NotFound(format!("{} wallet of user {}", currency, user_id)))?;
        Ok(FiatBalance {
            id: user_id,
            balance,
            currency: currency.to_string(),
        })
    }

    async fn credit_account(
        &self,
        request: &CreditAccountRequest,
        _token: &str,
        idempotency_key: &str,
    ) -> Result<(), ClientError> {
        self.credit_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.fail_credit_transient.load(Ordering::SeqCst) {
            return Err(ClientError::Timeout("wallet/credit/account".to_string()));
        }
        if self.reject_credit.load(Ordering::SeqCst) {
            return Err(ClientError::Rejected {
                status: 422,
                body: "creditor has insufficient funds".to_string(),
            });
        }

        let mut credits = self
            .credits
            .lock()
            .map_err(|_| ClientError::Transport("mock poisoned".to_string()))?;
        if credits.iter().any(|(key, _)| key == idempotency_key) {
            return Ok(());
        }
        credits.push((idempotency_key.to_string(), request.clone()));
        Ok(())
    }
}
