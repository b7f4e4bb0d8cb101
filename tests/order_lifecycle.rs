//! Order placement, matching, escrow and completion through the public services

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use p2p_exchange::clients::mock::{MockBankingClient, MockIdentityClient};
use p2p_exchange::escrow::EscrowManager;
use p2p_exchange::escrow::state::EscrowStatus;
use p2p_exchange::models::{NewWallet, OrderSide, PaymentMethod, TransactionType};
use p2p_exchange::order::{CreateOrderRequest, OrderService};
use p2p_exchange::store::{
    BookingStore, EscrowStore, HistoryStore, OrderFilter, OrderStore, Stores, WalletStore,
};
use p2p_exchange::wallet::WalletLedger;
use p2p_exchange::{ExchangeError, OrderStatus};

const ALICE: i64 = 1;
const BOB: i64 = 2;
const TOKEN: &str = "bearer";

struct Exchange {
    stores: Stores,
    ledger: Arc<WalletLedger>,
    orders: OrderService,
}

async fn exchange() -> Exchange {
    let stores = Stores::in_memory();
    stores
        .wallets
        .insert_batch(vec![
            NewWallet { user_id: ALICE, asset: "BTC".into(), address: "1alice".into() },
            NewWallet { user_id: BOB, asset: "BTC".into(), address: "1bob".into() },
        ])
        .await
        .unwrap();
    let ledger = Arc::new(WalletLedger::new(stores.wallets.clone()));
    ledger.credit(ALICE, "BTC", dec!(10), None).await.unwrap();

    let identity = Arc::new(MockIdentityClient::new());
    identity.add_user(ALICE, "alice");
    identity.add_user(BOB, "bob");
    let banking = Arc::new(MockBankingClient::new());
    banking.add_bank(ALICE, 7);

    let escrow = Arc::new(EscrowManager::new(
        stores.escrows.clone(),
        stores.orders.clone(),
        stores.bookings.clone(),
        ledger.clone(),
    ));
    let orders = OrderService::new(&stores, ledger.clone(), escrow, identity, banking);
    Exchange { stores, ledger, orders }
}

fn sell(amount: Decimal) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id: ALICE,
        trading_pair: "BTC".into(),
        side: OrderSide::Sell,
        price: dec!(100),
        amount,
        currency: "USD".into(),
        payment_method: Some(PaymentMethod::BankTransfer),
        filled_amount: None,
        status: None,
        bank_id: Some(7),
        remark: Some("order ref".into()),
        signature: Some("alice".into()),
        expiration_time: None,
    }
}

fn buy(amount: Decimal) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id: BOB,
        side: OrderSide::Buy,
        payment_method: None,
        bank_id: None,
        remark: None,
        signature: None,
        ..sell(amount)
    }
}

async fn balance(ex: &Exchange, user_id: i64) -> Decimal {
    ex.ledger.find(user_id, "BTC").await.unwrap().balance
}

#[tokio::test]
async fn test_sell_then_buy_settles_through_escrow() {
    let ex = exchange().await;

    let sell_order = ex.orders.create_order(ALICE, TOKEN, sell(dec!(4))).await.unwrap();
    assert_eq!(sell_order.status, OrderStatus::Open);
    assert_eq!(balance(&ex, ALICE).await, dec!(6));
    let escrow = ex.stores.escrows.find_by_order(sell_order.id).await.unwrap().unwrap();
    assert_eq!((escrow.amount, escrow.status), (dec!(4), EscrowStatus::Open));

    let buy_order = ex.orders.create_order(BOB, TOKEN, buy(dec!(4))).await.unwrap();
    assert_eq!(buy_order.status, OrderStatus::Filled);
    assert_eq!(
        ex.orders.find_by_id(sell_order.id).await.unwrap().status,
        OrderStatus::Filled
    );

    let booking = ex.stores.bookings.find_by_order(sell_order.id).await.unwrap().unwrap();
    assert_eq!((booking.buyer_id, booking.seller_id), (BOB, ALICE));
    assert_eq!(ex.stores.bookings.list_by_order(sell_order.id).await.unwrap().len(), 1);

    let bob_rows = ex.stores.history.list_by_user(BOB).await.unwrap();
    assert_eq!(bob_rows.len(), 1);
    assert_eq!(bob_rows[0].kind, TransactionType::Buy);
    assert_eq!((bob_rows[0].quantity, bob_rows[0].price), (dec!(4), dec!(100)));
    assert_eq!(bob_rows[0].fee, dec!(0.8));
    assert_eq!(bob_rows[0].payment_method, PaymentMethod::BankTransfer);

    let alice_rows = ex.stores.history.list_by_user(ALICE).await.unwrap();
    assert_eq!(alice_rows.len(), 1);
    assert_eq!(alice_rows[0].kind, TransactionType::Sell);
    assert_eq!(alice_rows[0].fee, dec!(0.8));

    // Seller confirms the fiat payment; held BTC moves to the buyer
    let done = ex
        .orders
        .update_order_status_for_trade_completion(sell_order.id, ALICE)
        .await
        .unwrap();
    assert_eq!(done.status, OrderStatus::PaymentVerified);
    assert_eq!(balance(&ex, BOB).await, dec!(4));
    assert_eq!(balance(&ex, ALICE).await, dec!(6));
    let escrow = ex.stores.escrows.get(escrow.id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Success);
}

#[tokio::test]
async fn test_price_mismatch_leaves_both_open() {
    let ex = exchange().await;
    let sell_order = ex.orders.create_order(ALICE, TOKEN, sell(dec!(4))).await.unwrap();
    let mut req = buy(dec!(4));
    req.price = dec!(99);
    let buy_order = ex.orders.create_order(BOB, TOKEN, req).await.unwrap();

    assert_eq!(buy_order.status, OrderStatus::Open);
    assert_eq!(
        ex.orders.find_by_id(sell_order.id).await.unwrap().status,
        OrderStatus::Open
    );
    assert!(ex.stores.history.list_by_user(BOB).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_insufficient_balance_mutates_nothing() {
    let ex = exchange().await;
    let err = ex.orders.create_order(ALICE, TOKEN, sell(dec!(10.5))).await.unwrap_err();
    assert!(matches!(err, ExchangeError::InsufficientBalance(_)));

    assert_eq!(balance(&ex, ALICE).await, dec!(10));
    let rows = ex
        .stores
        .orders
        .list_with_payment_settings(OrderFilter::All)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_cancel_sell_refunds_and_cancel_buy_touches_no_wallet() {
    let ex = exchange().await;
    let sell_order = ex.orders.create_order(ALICE, TOKEN, sell(dec!(3))).await.unwrap();
    assert_eq!(balance(&ex, ALICE).await, dec!(7));

    ex.orders.cancel_order(sell_order.id, ALICE).await.unwrap();
    assert_eq!(balance(&ex, ALICE).await, dec!(10));
    assert_eq!(
        ex.orders.find_by_id(sell_order.id).await.unwrap().status,
        OrderStatus::Cancelled
    );
    let escrow = ex.stores.escrows.find_by_order(sell_order.id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Cancelled);

    let buy_order = ex.orders.create_order(BOB, TOKEN, buy(dec!(1))).await.unwrap();
    ex.orders.cancel_order(buy_order.id, BOB).await.unwrap();
    assert_eq!(balance(&ex, BOB).await, Decimal::ZERO);
    assert_eq!(balance(&ex, ALICE).await, dec!(10));
}

#[tokio::test]
async fn test_find_by_id_round_trip() {
    let ex = exchange().await;
    let created = ex.orders.create_order(ALICE, TOKEN, sell(dec!(2))).await.unwrap();

    let first = ex.orders.find_by_id(created.id).await.unwrap();
    let second = ex.orders.find_by_id(created.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.trading_pair, "BTC");
    assert_eq!(first.side, OrderSide::Sell);
    assert_eq!((first.price, first.amount), (dec!(100), dec!(2)));
    assert_eq!(first.status, OrderStatus::Open);
}

#[tokio::test]
async fn test_claiming_own_order_is_forbidden() {
    let ex = exchange().await;
    let order = ex.orders.create_order(ALICE, TOKEN, sell(dec!(2))).await.unwrap();

    let err = ex.orders.handle_p2p_order_action(order.id, ALICE).await.unwrap_err();
    assert!(matches!(err, ExchangeError::Forbidden(_)));
    assert_eq!(ex.orders.find_by_id(order.id).await.unwrap(), order);
}

#[tokio::test]
async fn test_filled_order_cannot_be_deleted() {
    let ex = exchange().await;
    let sell_order = ex.orders.create_order(ALICE, TOKEN, sell(dec!(4))).await.unwrap();
    ex.orders.create_order(BOB, TOKEN, buy(dec!(4))).await.unwrap();

    let err = ex.orders.delete_order(sell_order.id, ALICE).await.unwrap_err();
    assert!(matches!(err, ExchangeError::Conflict(_)));
    assert_eq!(
        ex.orders.find_by_id(sell_order.id).await.unwrap().status,
        OrderStatus::Filled
    );
    assert!(ex.stores.escrows.find_by_order(sell_order.id).await.unwrap().is_some());
    assert!(ex.stores.bookings.find_by_order(sell_order.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_p2p_claim_of_buy_order_goes_pending() {
    let ex = exchange().await;
    let buy_order = ex.orders.create_order(BOB, TOKEN, buy(dec!(1))).await.unwrap();

    let booking = ex.orders.handle_p2p_order_action(buy_order.id, ALICE).await.unwrap();
    assert_eq!((booking.buyer_id, booking.seller_id), (ALICE, BOB));
    assert_eq!(
        ex.orders.find_by_id(buy_order.id).await.unwrap().status,
        OrderStatus::Pending
    );

    let err = ex.orders.handle_p2p_order_action(buy_order.id, 3).await.unwrap_err();
    assert!(matches!(err, ExchangeError::Conflict(_)));
}
