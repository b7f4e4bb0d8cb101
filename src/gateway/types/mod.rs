pub mod request;
pub mod response;

pub use request::{CreateAccountRequest, P2PActionRequest, WalletKeyQuery, WalletKeyResponse};
pub use response::{ApiResponse, ApiResult, ErrorBody, created, ok};
