//! HTTP surface: routing, JWT auth, envelopes and status codes

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use p2p_exchange::clients::mock::{MockBankingClient, MockIdentityClient};
use p2p_exchange::escrow::EscrowManager;
use p2p_exchange::fee::DEFAULT_PLATFORM_FEE;
use p2p_exchange::gateway::{self, auth::Claims, state::AppState};
use p2p_exchange::order::{OrderQueryService, OrderService};
use p2p_exchange::settlement::{SettlementCoordinator, SettlementService};
use p2p_exchange::store::Stores;
use p2p_exchange::wallet::WalletLedger;
use p2p_exchange::wallet::address::MockAddressGenerator;
use p2p_exchange::wallet::provisioning::WalletProvisioner;

// base64("gateway-test-secret")
const SECRET: &str = "Z2F0ZXdheS10ZXN0LXNlY3JldA==";

struct Api {
    app: Router,
    ledger: Arc<WalletLedger>,
}

fn api() -> Api {
    let stores = Stores::in_memory();
    let ledger = Arc::new(WalletLedger::new(stores.wallets.clone()));

    let identity = Arc::new(MockIdentityClient::new());
    identity.add_user(1, "alice");
    identity.add_user(2, "bob");
    let banking = Arc::new(MockBankingClient::new());
    banking.add_bank(1, 7);

    let escrow = Arc::new(EscrowManager::new(
        stores.escrows.clone(),
        stores.orders.clone(),
        stores.bookings.clone(),
        ledger.clone(),
    ));
    let orders = Arc::new(OrderService::new(
        &stores,
        ledger.clone(),
        escrow,
        identity.clone(),
        banking.clone(),
    ));
    let queries = Arc::new(OrderQueryService::new(stores.orders.clone(), banking.clone()));
    let provisioner = Arc::new(WalletProvisioner::new(
        stores.wallets.clone(),
        Arc::new(MockAddressGenerator),
        vec!["BTC".into(), "ETH".into(), "SOL".into()],
    ));
    let coordinator = Arc::new(SettlementCoordinator::new(
        stores.settlements.clone(),
        stores.history.clone(),
        ledger.clone(),
        banking.clone(),
    ));
    let settlement = Arc::new(SettlementService::new(
        stores.settlements.clone(),
        ledger.clone(),
        banking,
        coordinator,
        DEFAULT_PLATFORM_FEE,
    ));

    let state = Arc::new(AppState {
        orders,
        queries,
        ledger: ledger.clone(),
        provisioner,
        settlement,
        history: stores.history.clone(),
        identity,
        jwt_secret: SECRET.to_string(),
        db: None,
    });
    Api {
        app: gateway::router(state),
        ledger,
    }
}

fn token(sub: &str) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: (chrono::Utc::now().timestamp() + 600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_base64_secret(SECRET).unwrap(),
    )
    .unwrap()
}

async fn call(
    api: &Api,
    method: &str,
    uri: &str,
    sub: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(sub) = sub {
        builder = builder.header("authorization", format!("Bearer {}", token(sub)));
    }
    let request = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = api.app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn open_accounts(api: &Api) {
    for user_id in [1, 2] {
        let (status, _) = call(
            api,
            "POST",
            "/api/v1/coin/account/create",
            None,
            Some(json!({ "userId": user_id })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    api.ledger.credit(1, "BTC", dec!(10), None).await.unwrap();
}

fn sell_body() -> Value {
    json!({
        "userId": 1,
        "tradingPair": "BTC",
        "type": "SELL",
        "price": "100",
        "amount": "4",
        "currency": "USD",
        "paymentMethod": "BANK-TRANSFER",
        "bankId": 7,
        "remark": "ref",
        "signature": "alice"
    })
}

#[tokio::test]
async fn test_health_is_public() {
    let api = api();
    let (status, body) = call(&api, "GET", "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["storage"], "memory");
}

#[tokio::test]
async fn test_protected_routes_need_a_valid_token() {
    let api = api();
    let (status, body) = call(&api, "GET", "/api/v1/order/all", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert!(body["details"].is_string());

    let (status, _) = call(&api, "GET", "/api/v1/order/all", Some("mallory"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_account_creation_is_once_per_user() {
    let api = api();
    let (status, body) = call(
        &api,
        "POST",
        "/api/v1/coin/account/create",
        None,
        Some(json!({ "userId": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (status, body) = call(
        &api,
        "POST",
        "/api/v1/coin/account/create",
        None,
        Some(json!({ "userId": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_order_match_over_http() {
    let api = api();
    open_accounts(&api).await;

    let (status, body) = call(&api, "POST", "/api/v1/order/create", Some("1"), Some(sell_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "OPEN");
    let sell_id = body["data"]["id"].as_i64().unwrap();

    // Username subjects resolve through the identity service
    let buy = json!({
        "userId": 2,
        "tradingPair": "BTC",
        "type": "BUY",
        "price": "100",
        "amount": "4",
        "currency": "USD"
    });
    let (status, body) = call(&api, "POST", "/api/v1/order/create", Some("bob"), Some(buy)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "FILLED");

    let (status, body) = call(&api, "GET", &format!("/api/v1/order/{}", sell_id), Some("2"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "FILLED");
    assert_eq!(body["data"]["paymentSettings"]["paymentMethod"], "BANK-TRANSFER");
    assert_eq!(body["data"]["bankDetails"]["id"], 7);

    let (status, body) = call(&api, "GET", "/api/v1/history", Some("2"), None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["type"], "BUY");

    let (status, body) = call(
        &api,
        "PUT",
        &format!("/api/v1/orders/{}/status", sell_id),
        Some("1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "PAYMENT_VERIFIED");
    assert_eq!(api.ledger.find(2, "BTC").await.unwrap().balance, dec!(4));
}

#[tokio::test]
async fn test_cancel_and_delete_answer_no_content() {
    let api = api();
    open_accounts(&api).await;

    let (_, body) = call(&api, "POST", "/api/v1/order/create", Some("1"), Some(sell_body())).await;
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, _) = call(&api, "DELETE", &format!("/api/v1/order/cancel/{}", id), Some("2"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&api, "DELETE", &format!("/api/v1/order/cancel/{}", id), Some("1"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
    assert_eq!(api.ledger.find(1, "BTC").await.unwrap().balance, dec!(10));

    let (status, _) = call(&api, "DELETE", &format!("/api/v1/order/delete/{}", id), Some("1"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&api, "GET", &format!("/api/v1/order/{}", id), Some("1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_wallet_routes() {
    let api = api();
    open_accounts(&api).await;

    let (status, body) = call(&api, "GET", "/api/v1/users/1/balances", Some("1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (status, _) = call(&api, "GET", "/api/v1/users/2/balances", Some("1"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&api, "GET", "/api/v1/coin/user/wallet/key?asset=eth", Some("1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["addressKey"].as_str().unwrap().starts_with("0x"));

    let (status, body) = call(&api, "GET", "/api/v1/coin/user/wallet/key", Some("1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_orders_by_type_rejects_unknown_side() {
    let api = api();
    let (status, _) = call(&api, "GET", "/api/v1/orders/details/HOLD", Some("1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&api, "GET", "/api/v1/orders/details/buy", Some("1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());
}
