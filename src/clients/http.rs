//! reqwest-backed collaborators
//!
//! Every call carries a bounded timeout; timeouts and connection failures
//! surface as retryable `ClientError`s.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    BankDetails, BankingClient, ClientError, CreditAccountRequest, FiatBalance, IdentityClient,
    UserProfile,
};

fn build_client(timeout: Duration) -> Result<Client, ClientError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ClientError::Transport(format!("Failed to create HTTP client: {}", e)))
}

fn map_send_error(url: &str, e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout(url.to_string())
    } else {
        ClientError::Transport(format!("{}: {}", url, e))
    }
}

/// Send a request and decode a JSON body, mapping status codes to `ClientError`
async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    url: &str,
    what: &str,
) -> Result<T, ClientError> {
    let response = request.send().await.map_err(|e| map_send_error(url, e))?;
    let status = response.status();
    debug!(url, status = status.as_u16(), "Upstream response");

    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(url, status = status.as_u16(), "Upstream rejected request");
        return Err(ClientError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ClientError::Decode(format!("{}: {}", url, e)))
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

// ============================================================================
// Identity
// ============================================================================

pub struct HttpIdentityClient {
    base_url: String,
    client: Client,
}

impl HttpIdentityClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: base_url.into(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn find_by_username(
        &self,
        username: &str,
        token: &str,
    ) -> Result<UserProfile, ClientError> {
        let url = join(&self.base_url, &format!("user/by/username/{}", username));
        let request = self.client.get(&url).bearer_auth(token);
        send_json(request, &url, &format!("user {}", username)).await
    }

    async fn find_by_user_id(&self, user_id: i64, token: &str) -> Result<UserProfile, ClientError> {
        let url = join(&self.base_url, &format!("user/by/userId/{}", user_id));
        let request = self.client.get(&url).bearer_auth(token);
        send_json(request, &url, &format!("user {}", user_id)).await
    }
}

// ============================================================================
// Banking
// ============================================================================

pub struct HttpBankingClient {
    base_url: String,
    client: Client,
}

impl HttpBankingClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: base_url.into(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl BankingClient for HttpBankingClient {
    async fn bank_details(
        &self,
        user_id: i64,
        bank_id: i64,
        token: &str,
    ) -> Result<BankDetails, ClientError> {
        let url = join(
            &self.base_url,
            &format!("bank/user/{}/bank/{}", user_id, bank_id),
        );
        let request = self.client.get(&url).bearer_auth(token);
        send_json(request, &url, &format!("bank {} of user {}", bank_id, user_id)).await
    }

    async fn fiat_balance(
        &self,
        user_id: i64,
        currency: &str,
        token: &str,
    ) -> Result<FiatBalance, ClientError> {
        let url = join(
            &self.base_url,
            &format!("wallet/balance/userId/{}/currency/{}", user_id, currency),
        );
        let request = self.client.get(&url).bearer_auth(token);
        send_json(request, &url, &format!("{} wallet of user {}", currency, user_id)).await
    }

    async fn credit_account(
        &self,
        body: &CreditAccountRequest,
        token: &str,
        idempotency_key: &str,
    ) -> Result<(), ClientError> {
        let url = join(&self.base_url, "wallet/credit/account");
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Idempotency-Key", idempotency_key)
            .json(body)
            .send()
            .await
            .map_err(|e| map_send_error(&url, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(format!("credit account: {}", body)));
        }
        Err(ClientError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
