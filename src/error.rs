//! Exchange error types
//!
//! One taxonomy shared by the order, escrow, wallet and settlement services.
//! The gateway maps each variant to an HTTP status and a `{message, details}` body.

use thiserror::Error;

use crate::clients::ClientError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ExchangeError {
    // === Input ===
    #[error("Validation failed")]
    Validation(String),

    // === Identity ===
    #[error("Unauthorized")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden(String),

    // === Lookup ===
    #[error("Not found")]
    NotFound(String),

    #[error("Payment settings missing")]
    PaymentSettingsMissing { order_id: i64 },

    #[error("Buy order not found")]
    BuyOrderNotFound { escrow_id: i64 },

    // === State ===
    #[error("Conflict")]
    Conflict(String),

    #[error("Concurrent modification")]
    ConcurrentModification(String),

    // === Funds ===
    #[error("Insufficient balance")]
    InsufficientBalance(String),

    #[error("Bank details mismatch")]
    BankDetailsMismatch(String),

    // === Collaborators / persistence ===
    #[error("Upstream service unavailable")]
    UpstreamUnavailable(String),

    #[error("Internal error")]
    Internal(String),
}

impl ExchangeError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeError::Validation(_) => "VALIDATION_ERROR",
            ExchangeError::Unauthorized(_) => "UNAUTHORIZED",
            ExchangeError::Forbidden(_) => "FORBIDDEN",
            ExchangeError::NotFound(_) => "NOT_FOUND",
            ExchangeError::PaymentSettingsMissing { .. } => "PAYMENT_SETTINGS_MISSING",
            ExchangeError::BuyOrderNotFound { .. } => "BUY_ORDER_NOT_FOUND",
            ExchangeError::Conflict(_) => "CONFLICT",
            ExchangeError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            ExchangeError::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            ExchangeError::BankDetailsMismatch(_) => "BANK_DETAILS_MISMATCH",
            ExchangeError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            ExchangeError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code for the API layer
    pub fn http_status(&self) -> u16 {
        match self {
            ExchangeError::Validation(_)
            | ExchangeError::InsufficientBalance(_)
            | ExchangeError::BankDetailsMismatch(_) => 400,

            ExchangeError::Unauthorized(_) => 401,
            ExchangeError::Forbidden(_) => 403,

            ExchangeError::NotFound(_)
            | ExchangeError::PaymentSettingsMissing { .. }
            | ExchangeError::BuyOrderNotFound { .. } => 404,

            ExchangeError::Conflict(_) | ExchangeError::ConcurrentModification(_) => 409,

            ExchangeError::UpstreamUnavailable(_) => 502,
            ExchangeError::Internal(_) => 500,
        }
    }

    /// Human-readable detail line for the error body
    pub fn details(&self) -> String {
        match self {
            ExchangeError::Validation(d)
            | ExchangeError::Unauthorized(d)
            | ExchangeError::Forbidden(d)
            | ExchangeError::NotFound(d)
            | ExchangeError::Conflict(d)
            | ExchangeError::ConcurrentModification(d)
            | ExchangeError::InsufficientBalance(d)
            | ExchangeError::BankDetailsMismatch(d)
            | ExchangeError::UpstreamUnavailable(d)
            | ExchangeError::Internal(d) => d.clone(),
            ExchangeError::PaymentSettingsMissing { order_id } => {
                format!("no payment settings stored for seller order {}", order_id)
            }
            ExchangeError::BuyOrderNotFound { escrow_id } => {
                format!("no buyer could be resolved for escrow {}", escrow_id)
            }
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        ExchangeError::NotFound(format!("{} not found", what))
    }

    /// Whether a retry of the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::UpstreamUnavailable(_)
                | ExchangeError::ConcurrentModification(_)
                | ExchangeError::Internal(_)
        )
    }
}

impl From<StoreError> for ExchangeError {
    fn from(e: StoreError) -> Self {
        ExchangeError::Internal(e.to_string())
    }
}

impl From<ClientError> for ExchangeError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::NotFound(what) => ExchangeError::NotFound(what),
            ClientError::Rejected { status, body } if status == 401 || status == 403 => {
                ExchangeError::Unauthorized(format!("upstream rejected credentials: {}", body))
            }
            other => ExchangeError::UpstreamUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
