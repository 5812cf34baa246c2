mod common;

use billing_engine::clock::Clock;
use billing_engine::error::EngineError;
use billing_engine::ledger::{PaymeCancelReason, PaymeState, Provider, TransactionStatus};
use billing_engine::payme::errors::{
    CANNOT_PERFORM, INVALID_AMOUNT, ORDER_NOT_FOUND, ORDER_UNAVAILABLE,
};
use billing_engine::payme::wire::{CancelParams, CheckPerformParams, CreateParams, StatementParams};
use billing_engine::payme::PaymeError;
use chrono::Duration;
use common::Harness;
use rust_decimal::Decimal;

fn code(err: &EngineError) -> i32 {
    PaymeError::from_engine(err, false).code
}

fn create_params(harness: &Harness, id: &str, order_id: &str, amount: i64) -> CreateParams {
    CreateParams {
        id: id.into(),
        time: harness.clock.now_ms(),
        amount,
        order_id: order_id.into(),
    }
}

// key: payme-flow-tests -> JSON-RPC lifecycle against the memory store
#[tokio::test]
async fn payme_happy_path_activates_once() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    let payme = harness.engine.payme();

    let check = payme
        .check_perform_transaction(&CheckPerformParams {
            amount: 50_000,
            order_id: order.order_id.clone(),
        })
        .await
        .unwrap();
    assert!(check.allow);

    let created = payme
        .create_transaction(&create_params(&harness, "payme-1", &order.order_id, 50_000))
        .await
        .unwrap();
    assert_eq!(created.state, 1);
    assert_eq!(created.transaction, order.id.to_string());

    harness.clock.advance(Duration::seconds(5));
    let performed = payme.perform_transaction("payme-1").await.unwrap();
    assert_eq!(performed.state, 2);

    let row = harness.reload(&order.order_id).await;
    assert_eq!(row.status, TransactionStatus::Paid);
    assert_eq!(row.provider_transaction_id.as_deref(), Some("payme-1"));
    assert!(row.activation_notified_at.is_some());
    assert_eq!(harness.collaborator.activations(), 1);

    let checked = payme.check_transaction("payme-1").await.unwrap();
    assert_eq!(checked.state, 2);
    assert_eq!(checked.perform_time, performed.perform_time);
    assert_eq!(checked.reason, None);
}

#[tokio::test]
async fn replayed_create_and_perform_are_identical() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    let payme = harness.engine.payme();
    let params = create_params(&harness, "payme-2", &order.order_id, 50_000);

    let first_create = payme.create_transaction(&params).await.unwrap();
    harness.clock.advance(Duration::seconds(1));
    let second_create = payme.create_transaction(&params).await.unwrap();
    assert_eq!(first_create, second_create);

    let first = payme.perform_transaction("payme-2").await.unwrap();
    harness.clock.advance(Duration::seconds(30));
    let second = payme.perform_transaction("payme-2").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(harness.collaborator.activations(), 1);
    assert_eq!(harness.reload(&order.order_id).await.version, 2);
}

#[tokio::test]
async fn amount_mismatch_leaves_row_untouched() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    let payme = harness.engine.payme();

    let err = payme
        .check_perform_transaction(&CheckPerformParams {
            amount: 49_999,
            order_id: order.order_id.clone(),
        })
        .await
        .unwrap_err();
    assert_eq!(code(&err), INVALID_AMOUNT);

    let err = payme
        .create_transaction(&create_params(&harness, "payme-3", &order.order_id, 50_001))
        .await
        .unwrap_err();
    assert_eq!(code(&err), INVALID_AMOUNT);

    let row = harness.reload(&order.order_id).await;
    assert_eq!(row, order);
}

#[tokio::test]
async fn unknown_order_is_reported() {
    let harness = Harness::new();
    let err = harness
        .engine
        .payme()
        .check_perform_transaction(&CheckPerformParams {
            amount: 100,
            order_id: "BP000000000000NONE".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(code(&err), ORDER_NOT_FOUND);
}

#[tokio::test]
async fn second_payme_transaction_for_an_order_conflicts() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    let payme = harness.engine.payme();

    payme
        .create_transaction(&create_params(&harness, "payme-a", &order.order_id, 50_000))
        .await
        .unwrap();
    let err = payme
        .create_transaction(&create_params(&harness, "payme-b", &order.order_id, 50_000))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
    assert_eq!(code(&err), ORDER_UNAVAILABLE);

    let err = payme
        .check_perform_transaction(&CheckPerformParams {
            amount: 50_000,
            order_id: order.order_id.clone(),
        })
        .await
        .unwrap_err();
    assert_eq!(code(&err), ORDER_UNAVAILABLE);
}

#[tokio::test]
async fn create_replay_must_match_order_and_amount() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    let other = harness.open_order(Provider::Payme, Decimal::new(700, 0)).await;
    let payme = harness.engine.payme();

    payme
        .create_transaction(&create_params(&harness, "payme-r", &order.order_id, 50_000))
        .await
        .unwrap();

    let err = payme
        .create_transaction(&create_params(&harness, "payme-r", &other.order_id, 70_000))
        .await
        .unwrap_err();
    assert_eq!(code(&err), ORDER_NOT_FOUND);

    let err = payme
        .create_transaction(&create_params(&harness, "payme-r", &order.order_id, 49_900))
        .await
        .unwrap_err();
    assert_eq!(code(&err), INVALID_AMOUNT);

    let row = harness.reload(&order.order_id).await;
    assert_eq!(row.status, TransactionStatus::Waiting);
    assert_eq!(row.version, 1);
    let untouched = harness.reload(&other.order_id).await;
    assert_eq!(untouched.status, TransactionStatus::Created);
    assert!(untouched.payme_state().is_none());
}

#[tokio::test]
async fn cancel_after_complete_refunds_and_deactivates() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Payme, Decimal::new(1200, 0)).await;
    let payme = harness.engine.payme();

    payme
        .create_transaction(&create_params(&harness, "payme-4", &order.order_id, 120_000))
        .await
        .unwrap();
    payme.perform_transaction("payme-4").await.unwrap();

    harness.clock.advance(Duration::minutes(10));
    let cancel = CancelParams {
        id: "payme-4".into(),
        reason: PaymeCancelReason::Refund,
    };
    let cancelled = payme.cancel_transaction(&cancel).await.unwrap();
    assert_eq!(cancelled.state, -2);

    let row = harness.reload(&order.order_id).await;
    assert_eq!(row.status, TransactionStatus::Refunded);
    assert_eq!(row.payme_state().unwrap().state, PaymeState::CancelledAfterComplete);
    assert_eq!(harness.collaborator.activations(), 1);
    assert_eq!(harness.collaborator.deactivations(), 1);

    harness.clock.advance(Duration::minutes(1));
    let replay = payme.cancel_transaction(&cancel).await.unwrap();
    assert_eq!(replay, cancelled);
    assert_eq!(harness.collaborator.deactivations(), 1);

    let checked = payme.check_transaction("payme-4").await.unwrap();
    assert_eq!(checked.reason, Some(5));
}

#[tokio::test]
async fn perform_after_cancel_is_rejected() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    let payme = harness.engine.payme();

    payme
        .create_transaction(&create_params(&harness, "payme-5", &order.order_id, 50_000))
        .await
        .unwrap();
    payme
        .cancel_transaction(&CancelParams {
            id: "payme-5".into(),
            reason: PaymeCancelReason::TransactionError,
        })
        .await
        .unwrap();
    let before = harness.reload(&order.order_id).await;

    let err = payme.perform_transaction("payme-5").await.unwrap_err();
    assert_eq!(code(&err), CANNOT_PERFORM);
    assert_eq!(harness.reload(&order.order_id).await, before);
    assert_eq!(harness.collaborator.activations(), 0);
}

#[tokio::test]
async fn create_replay_after_timeout_cancels_with_reason_four() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    let payme = harness.engine.payme();
    let params = create_params(&harness, "payme-6", &order.order_id, 50_000);

    payme.create_transaction(&params).await.unwrap();
    harness
        .clock
        .advance(Duration::milliseconds(43_200_000 + 1));

    let err = payme.create_transaction(&params).await.unwrap_err();
    assert_eq!(code(&err), CANNOT_PERFORM);

    let checked = payme.check_transaction("payme-6").await.unwrap();
    assert_eq!(checked.state, -1);
    assert_eq!(checked.reason, Some(4));
}

#[tokio::test]
async fn statement_lists_transactions_in_window() {
    let harness = Harness::new();
    let payme = harness.engine.payme();
    let start = harness.clock.now_ms();

    let first = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    payme
        .create_transaction(&create_params(&harness, "payme-7", &first.order_id, 50_000))
        .await
        .unwrap();
    harness.clock.advance(Duration::minutes(1));
    let second = harness.open_order(Provider::Payme, Decimal::new(700, 0)).await;
    payme
        .create_transaction(&create_params(&harness, "payme-8", &second.order_id, 70_000))
        .await
        .unwrap();

    let statement = payme
        .get_statement(&StatementParams {
            from: start,
            to: harness.clock.now_ms(),
        })
        .await
        .unwrap();
    let ids: Vec<&str> = statement
        .transactions
        .iter()
        .map(|entry| entry.id.as_str())
        .collect();
    assert_eq!(ids, vec!["payme-7", "payme-8"]);
    assert_eq!(statement.transactions[1].amount, 70_000);
}
