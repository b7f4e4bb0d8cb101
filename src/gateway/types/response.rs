//! Response envelopes
//!
//! - `ApiResponse<T>`: success wrapper `{message, data}`
//! - `ErrorBody`: failure wrapper `{message, code, details}`

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::ExchangeError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: &'static str,
    pub details: String,
}

impl From<&ExchangeError> for ErrorBody {
    fn from(e: &ExchangeError) -> Self {
        Self {
            message: e.to_string(),
            code: e.code(),
            details: e.details(),
        }
    }
}

impl IntoResponse for ExchangeError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = self.code(), details = %self.details(), "Request failed");
        } else {
            tracing::debug!(code = self.code(), details = %self.details(), "Request rejected");
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ExchangeError>;

/// 200 with data
pub fn ok<T>(message: impl Into<String>, data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(message, data))))
}

/// 201 with data
pub fn created<T>(message: impl Into<String>, data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(message, data))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_fields() {
        let body = ErrorBody::from(&ExchangeError::PaymentSettingsMissing { order_id: 3 });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["message"], "Payment settings missing");
        assert_eq!(json["code"], "PAYMENT_SETTINGS_MISSING");
        assert!(json["details"].as_str().unwrap().contains('3'));
    }

    #[test]
    fn test_error_status() {
        let resp = ExchangeError::Forbidden("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = ExchangeError::UpstreamUnavailable("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_success_omits_empty_data() {
        let json = serde_json::to_value(ApiResponse::<()> {
            message: "done".into(),
            data: None,
        })
        .unwrap();
        assert!(json.get("data").is_none());
    }
}
