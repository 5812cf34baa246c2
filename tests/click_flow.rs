mod common;

use billing_engine::click::errors::{
    code_for, ALREADY_PAID, INCORRECT_AMOUNT, REQUEST_ERROR, SIGN_CHECK_FAILED,
    TRANSACTION_CANCELLED, TRANSACTION_NOT_FOUND,
};
use billing_engine::click::{ClickForm, ClickOutcome, ClickRequest};
use billing_engine::error::EngineResult;
use billing_engine::ledger::{ClickAction, Provider, TransactionStatus};
use chrono::Duration;
use common::{click_form, Harness};
use rust_decimal::Decimal;

async fn submit(harness: &Harness, body: &str) -> EngineResult<ClickOutcome> {
    let form = ClickForm::parse(body.as_bytes())?;
    let action = form.action()?;
    let click = harness.engine.click();
    click.authenticate(&form, action)?;
    let request: ClickRequest = form.into_request(action)?;
    click.dispatch(&request).await
}

fn prepared_id(outcome: ClickOutcome) -> i64 {
    match outcome {
        ClickOutcome::Prepared(prepared) => prepared.merchant_prepare_id,
        other => panic!("expected prepare outcome, got {other:?}"),
    }
}

// key: click-flow-tests -> prepare/complete against the memory store
#[tokio::test]
async fn click_happy_path_activates_once() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Click, Decimal::new(500, 0)).await;

    let prepare = click_form(0, 1001, &order.order_id, None, "500.00", 0);
    let prepare_id = prepared_id(submit(&harness, &prepare).await.unwrap());

    let waiting = harness.reload(&order.order_id).await;
    assert_eq!(waiting.status, TransactionStatus::Waiting);
    let state = waiting.click_state().unwrap();
    assert_eq!(state.merchant_prepare_id, prepare_id);
    assert_eq!(state.action, ClickAction::Prepare);

    harness.clock.advance(Duration::seconds(20));
    let complete = click_form(1, 1001, &order.order_id, Some(prepare_id), "500.00", 0);
    let outcome = submit(&harness, &complete).await.unwrap();
    match outcome {
        ClickOutcome::Completed(completed) => {
            assert_eq!(completed.merchant_confirm_id, prepare_id);
            assert_eq!(completed.transaction_id, order.id);
        }
        other => panic!("expected complete outcome, got {other:?}"),
    }

    let paid = harness.reload(&order.order_id).await;
    assert_eq!(paid.status, TransactionStatus::Paid);
    assert_eq!(paid.provider_transaction_id.as_deref(), Some("1001"));
    assert_eq!(harness.collaborator.activations(), 1);

    let replay = submit(&harness, &complete).await.unwrap();
    assert_eq!(replay, outcome);
    assert_eq!(harness.collaborator.activations(), 1);

    let err = submit(&harness, &prepare).await.unwrap_err();
    assert_eq!(code_for(&err), ALREADY_PAID);
}

#[tokio::test]
async fn prepare_replay_returns_same_prepare_id() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Click, Decimal::new(500, 0)).await;
    let prepare = click_form(0, 2002, &order.order_id, None, "500", 0);

    let first = prepared_id(submit(&harness, &prepare).await.unwrap());
    let second = prepared_id(submit(&harness, &prepare).await.unwrap());
    assert_eq!(first, second);

    let other = click_form(0, 2003, &order.order_id, None, "500", 0);
    let err = submit(&harness, &other).await.unwrap_err();
    assert_eq!(code_for(&err), REQUEST_ERROR);
}

#[tokio::test]
async fn prepare_amount_mismatch_leaves_row_untouched() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Click, Decimal::new(500, 0)).await;

    let prepare = click_form(0, 3003, &order.order_id, None, "499.99", 0);
    let err = submit(&harness, &prepare).await.unwrap_err();
    assert_eq!(code_for(&err), INCORRECT_AMOUNT);
    assert_eq!(harness.reload(&order.order_id).await, order);
}

#[tokio::test]
async fn tampered_sign_is_rejected() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Click, Decimal::new(500, 0)).await;

    let prepare = click_form(0, 4004, &order.order_id, None, "500.00", 0)
        .replace("amount=500.00", "amount=5.00");
    let err = submit(&harness, &prepare).await.unwrap_err();
    assert_eq!(code_for(&err), SIGN_CHECK_FAILED);
    assert_eq!(harness.reload(&order.order_id).await, order);
}

#[tokio::test]
async fn complete_without_prepare_is_rejected() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Click, Decimal::new(500, 0)).await;

    let complete = click_form(1, 5005, &order.order_id, Some(42), "500.00", 0);
    let err = submit(&harness, &complete).await.unwrap_err();
    assert_eq!(code_for(&err), TRANSACTION_NOT_FOUND);
    assert_eq!(harness.reload(&order.order_id).await, order);
    assert_eq!(harness.collaborator.activations(), 0);
}

#[tokio::test]
async fn provider_error_on_complete_cancels_order() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Click, Decimal::new(500, 0)).await;

    let prepare = click_form(0, 6006, &order.order_id, None, "500.00", 0);
    let prepare_id = prepared_id(submit(&harness, &prepare).await.unwrap());

    let complete = click_form(1, 6006, &order.order_id, Some(prepare_id), "500.00", -5017);
    let err = submit(&harness, &complete).await.unwrap_err();
    assert_eq!(code_for(&err), TRANSACTION_CANCELLED);

    let row = harness.reload(&order.order_id).await;
    assert_eq!(row.status, TransactionStatus::Cancelled);
    assert_eq!(row.status_code, Some(-5017));
    assert_eq!(harness.collaborator.activations(), 0);

    let retry = click_form(1, 6006, &order.order_id, Some(prepare_id), "500.00", 0);
    let err = submit(&harness, &retry).await.unwrap_err();
    assert_eq!(code_for(&err), TRANSACTION_CANCELLED);
}

#[tokio::test]
async fn complete_after_prepare_ttl_is_refused() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Click, Decimal::new(500, 0)).await;

    let prepare = click_form(0, 7007, &order.order_id, None, "500.00", 0);
    let prepare_id = prepared_id(submit(&harness, &prepare).await.unwrap());

    harness.clock.advance(Duration::seconds(1801));
    let complete = click_form(1, 7007, &order.order_id, Some(prepare_id), "500.00", 0);
    let err = submit(&harness, &complete).await.unwrap_err();
    assert_eq!(code_for(&err), TRANSACTION_CANCELLED);
    assert_eq!(
        harness.reload(&order.order_id).await.status,
        TransactionStatus::Waiting
    );
}
