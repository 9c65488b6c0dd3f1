mod common;

use common::{Harness, amount, is_insufficient_funds, webhook};
use gasledger::application::dispatch::TopupOutcome;
use gasledger::application::reconcile::ReconcileOutcome;
use gasledger::domain::charge::GatewayStatus;
use gasledger::domain::money::{Balance, Units};
use gasledger::domain::wallet::{TransactionKind, TransactionStatus, WalletType};
use gasledger::error::PaymentError;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn test_pending_topup_credited_once_by_webhook() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    h.gateway.answer(GatewayStatus::Pending);

    let outcome = h
        .dispatcher
        .topup(owner, WalletType::Dashboard, amount(dec!(5000)), "250788123456")
        .await
        .unwrap();
    let TopupOutcome::Pending { charge, transaction } = outcome else {
        panic!("expected a pending top-up");
    };
    assert_eq!(transaction.status, TransactionStatus::Pending);
    assert_eq!(h.balance(owner, WalletType::Dashboard).await, Balance::ZERO);

    assert_eq!(
        h.reconciler.handle(&webhook(&charge.reference, "COMPLETED")).await,
        ReconcileOutcome::Applied
    );
    assert_eq!(
        h.reconciler.handle(&webhook(&charge.reference, "COMPLETED")).await,
        ReconcileOutcome::Duplicate
    );

    assert_eq!(h.balance(owner, WalletType::Dashboard).await, Balance::new(dec!(5000)));
    let history = h.ledger.history(transaction.wallet_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TransactionStatus::Completed);
    h.assert_ledger_consistent().await;
}

#[tokio::test]
async fn test_failed_topup_webhook_leaves_balance() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    h.gateway.answer(GatewayStatus::Pending);

    let TopupOutcome::Pending { charge, transaction } = h
        .dispatcher
        .topup(owner, WalletType::Credit, amount(dec!(2000)), "250788123456")
        .await
        .unwrap()
    else {
        panic!("expected a pending top-up");
    };

    assert_eq!(
        h.reconciler.handle(&webhook(&charge.reference, "FAILED")).await,
        ReconcileOutcome::Applied
    );
    assert_eq!(h.balance(owner, WalletType::Credit).await, Balance::ZERO);
    let history = h.ledger.history(transaction.wallet_id).await.unwrap();
    assert_eq!(history[0].status, TransactionStatus::Failed);
}

#[tokio::test]
async fn test_settled_topup_credits_immediately() {
    let h = Harness::new();
    let owner = Uuid::new_v4();

    let outcome = h
        .dispatcher
        .topup(owner, WalletType::Dashboard, amount(dec!(1500)), "250788123456")
        .await
        .unwrap();

    assert!(matches!(outcome, TopupOutcome::Credited { .. }));
    assert_eq!(h.balance(owner, WalletType::Dashboard).await, Balance::new(dec!(1500)));
}

#[tokio::test]
async fn test_topup_timeout_writes_nothing() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    h.gateway.stall(common::GATEWAY_TIMEOUT * 10);

    let result = h
        .dispatcher
        .topup(owner, WalletType::Dashboard, amount(dec!(1500)), "250788123456")
        .await;

    assert!(matches!(result, Err(PaymentError::ExternalGatewayError(_))));
    let wallet = h.ledger.get_or_create(owner, WalletType::Dashboard).await.unwrap();
    assert!(h.ledger.history(wallet.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_card_funding_drains_primary_first() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    h.fund(owner, WalletType::Dashboard, dec!(100)).await;
    h.fund(owner, WalletType::Credit, dec!(500)).await;

    let funding = h.dispatcher.fund_card(owner, amount(dec!(250))).await.unwrap();

    assert_eq!(funding.card_balance, Balance::new(dec!(250)));
    assert_eq!(funding.legs.len(), 3);
    assert!(funding.legs.iter().all(|tx| tx.kind == TransactionKind::CardFunding));
    assert_eq!(h.balance(owner, WalletType::Dashboard).await, Balance::ZERO);
    assert_eq!(h.balance(owner, WalletType::Credit).await, Balance::new(dec!(350)));
    h.assert_ledger_consistent().await;
}

#[tokio::test]
async fn test_card_funding_short_moves_nothing() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    h.fund(owner, WalletType::Dashboard, dec!(100)).await;
    h.fund(owner, WalletType::Credit, dec!(100)).await;

    let result = h.dispatcher.fund_card(owner, amount(dec!(250))).await;

    assert!(is_insufficient_funds(&result));
    assert_eq!(h.balance(owner, WalletType::Dashboard).await, Balance::new(dec!(100)));
    assert_eq!(h.balance(owner, WalletType::Credit).await, Balance::new(dec!(100)));
    assert_eq!(h.balance(owner, WalletType::Card).await, Balance::ZERO);
}

#[tokio::test]
async fn test_meter_transfer_moves_units() {
    let h = Harness::new();
    let consumer = Uuid::new_v4();
    h.seed_rewards(consumer, dec!(2)).await;
    let meter = h.meters.register(consumer, " MTR-001 ").await.unwrap();
    assert_eq!(meter.meter_number, "MTR-001");

    let receipt = h.meters.transfer(consumer, meter.id, dec!(1.5)).await.unwrap();

    assert_eq!(receipt.transferred, Units::new(dec!(1.5)));
    assert_eq!(receipt.value_rwf, dec!(1500));
    assert_eq!(receipt.remaining_balance, Units::new(dec!(0.5)));
    assert_eq!(receipt.meter.credited_units, Units::new(dec!(1.5)));
    assert_eq!(h.pool(consumer).await, Units::new(dec!(0.5)));
}

#[tokio::test]
async fn test_meter_transfer_beyond_pool_rejected() {
    let h = Harness::new();
    let consumer = Uuid::new_v4();
    h.seed_rewards(consumer, dec!(1)).await;
    let meter = h.meters.register(consumer, "MTR-002").await.unwrap();

    let result = h.meters.transfer(consumer, meter.id, dec!(1.0001)).await;

    assert!(matches!(
        result,
        Err(PaymentError::InsufficientRewardBalance { .. })
    ));
    assert_eq!(h.pool(consumer).await, Units::new(dec!(1)));
    assert!(matches!(
        h.meters.transfer(consumer, Uuid::new_v4(), dec!(0.5)).await,
        Err(PaymentError::NotFound(_))
    ));
}
