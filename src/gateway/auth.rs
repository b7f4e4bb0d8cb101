//! Bearer-token authentication
//!
//! Tokens are issued by the identity service and signed HS256 with a shared
//! base64 secret. `sub` carries either the numeric user id or the username;
//! usernames are resolved through the identity service.

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::state::AppState;
use crate::clients::ClientError;
use crate::error::ExchangeError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Injected into request extensions for protected handlers
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    /// Raw bearer token, forwarded to identity / banking calls
    pub token: String,
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ExchangeError> {
    let key = DecodingKey::from_base64_secret(secret)
        .map_err(|e| ExchangeError::Internal(format!("invalid JWT secret: {}", e)))?;
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| ExchangeError::Unauthorized(format!("invalid or expired token: {}", e)))
}

fn bearer_token(request: &Request<Body>) -> Result<String, ExchangeError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ExchangeError::Unauthorized("missing Authorization header".to_string()))?;
    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| ExchangeError::Unauthorized("invalid token format".to_string()))
}

pub async fn jwt_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ExchangeError> {
    let token = bearer_token(&request)?;
    let claims = verify_token(&state.jwt_secret, &token)?;

    let user_id = match claims.sub.parse::<i64>() {
        Ok(id) => id,
        Err(_) => {
            let profile = state
                .identity
                .find_by_username(&claims.sub, &token)
                .await
                .map_err(|e| match e {
                    ClientError::NotFound(_) => ExchangeError::Unauthorized(format!(
                        "unknown user {}",
                        claims.sub
                    )),
                    other => other.into(),
                })?;
            if profile.username != claims.sub {
                return Err(ExchangeError::Unauthorized("token subject mismatch".to_string()));
            }
            profile.id
        }
    };

    request.extensions_mut().insert(AuthUser { user_id, token });
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    // base64("test-secret")
    const SECRET: &str = "dGVzdC1zZWNyZXQ=";

    fn token(sub: &str, exp: usize) -> String {
        encode(
            &Header::default(),
            &Claims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_base64_secret(SECRET).unwrap(),
        )
        .unwrap()
    }

    fn future() -> usize {
        (chrono::Utc::now().timestamp() + 3600) as usize
    }

    #[test]
    fn test_valid_token() {
        let claims = verify_token(SECRET, &token("42", future())).unwrap();
        assert_eq!(claims.sub, "42");
    }

    #[test]
    fn test_expired_token_rejected() {
        let past = (chrono::Utc::now().timestamp() - 3600) as usize;
        assert!(matches!(
            verify_token(SECRET, &token("42", past)),
            Err(ExchangeError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        // base64("other")
        assert!(matches!(
            verify_token("b3RoZXI=", &token("42", future())),
            Err(ExchangeError::Unauthorized(_))
        ));
    }
}
