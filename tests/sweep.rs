mod common;

use std::sync::atomic::Ordering;

use billing_engine::clock::Clock;
use billing_engine::ledger::{LedgerStore, Provider, TransactionStatus};
use billing_engine::payme::wire::CreateParams;
use billing_engine::sweep::{process_tick, SweepReport};
use chrono::Duration;
use common::Harness;
use rust_decimal::Decimal;

async fn create_payme(harness: &Harness, id: &str, order_id: &str) {
    harness
        .engine
        .payme()
        .create_transaction(&CreateParams {
            id: id.into(),
            time: harness.clock.now_ms(),
            amount: 50_000,
            order_id: order_id.into(),
        })
        .await
        .unwrap();
}

// key: billing-sweep-tests -> expiry and redelivery ticks
#[tokio::test]
async fn timed_out_payme_transaction_is_cancelled_with_reason_four() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    create_payme(&harness, "sweep-1", &order.order_id).await;

    harness.clock.advance(Duration::hours(12) + Duration::seconds(1));
    let report = process_tick(&harness.engine).await.unwrap();
    assert_eq!(report.expired_payme, 1);

    let checked = harness
        .engine
        .payme()
        .check_transaction("sweep-1")
        .await
        .unwrap();
    assert_eq!(checked.state, -1);
    assert_eq!(checked.reason, Some(4));
    assert_eq!(
        harness.reload(&order.order_id).await.status,
        TransactionStatus::Cancelled
    );

    let second = process_tick(&harness.engine).await.unwrap();
    assert_eq!(second, SweepReport::default());
}

#[tokio::test]
async fn sweep_leaves_a_performed_transaction_alone() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    create_payme(&harness, "sweep-2", &order.order_id).await;

    harness.clock.advance(Duration::hours(11) + Duration::minutes(59));
    harness
        .engine
        .payme()
        .perform_transaction("sweep-2")
        .await
        .unwrap();

    harness.clock.advance(Duration::hours(2));
    let report = process_tick(&harness.engine).await.unwrap();
    assert_eq!(report.expired_payme, 0);

    let row = harness.reload(&order.order_id).await;
    assert_eq!(row.status, TransactionStatus::Paid);
    assert_eq!(row.payme_state().unwrap().state.code(), 2);
    assert_eq!(harness.collaborator.activations(), 1);
}

#[tokio::test]
async fn unpaid_order_past_expiry_is_cancelled() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Click, Decimal::new(500, 0)).await;

    harness.clock.advance(Duration::hours(25));
    let report = process_tick(&harness.engine).await.unwrap();
    assert_eq!(report.expired_orders, 1);

    let row = harness.reload(&order.order_id).await;
    assert_eq!(row.status, TransactionStatus::Cancelled);
    assert_eq!(row.cancel_reason.as_deref(), Some("expired"));
}

#[tokio::test]
async fn failed_activation_is_redelivered_once() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    create_payme(&harness, "sweep-3", &order.order_id).await;

    harness
        .collaborator
        .fail_activations
        .store(true, Ordering::SeqCst);
    harness
        .engine
        .payme()
        .perform_transaction("sweep-3")
        .await
        .unwrap();
    let row = harness.reload(&order.order_id).await;
    assert_eq!(row.status, TransactionStatus::Paid);
    assert!(row.activation_notified_at.is_none());

    harness
        .collaborator
        .fail_activations
        .store(false, Ordering::SeqCst);
    let report = process_tick(&harness.engine).await.unwrap();
    assert_eq!(report.activations, 1);
    assert_eq!(harness.collaborator.activations(), 1);
    assert!(harness
        .reload(&order.order_id)
        .await
        .activation_notified_at
        .is_some());

    let again = process_tick(&harness.engine).await.unwrap();
    assert_eq!(again.activations, 0);
    assert_eq!(harness.collaborator.activations(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tick_during_inflight_activation_does_not_notify_again() {
    let harness = Harness::new();
    let order = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    create_payme(&harness, "sweep-4", &order.order_id).await;
    harness
        .collaborator
        .activation_delay_ms
        .store(300, Ordering::SeqCst);

    let engine = harness.engine.clone();
    let perform =
        tokio::spawn(async move { engine.payme().perform_transaction("sweep-4").await });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let report = process_tick(&harness.engine).await.unwrap();
    let performed = perform.await.unwrap().unwrap();

    assert_eq!(performed.state, 2);
    assert_eq!(report.activations, 0);
    assert_eq!(harness.collaborator.activations(), 1);
    assert!(harness
        .reload(&order.order_id)
        .await
        .activation_notified_at
        .is_some());
}

#[tokio::test]
async fn pending_payme_row_waits_for_its_own_timeout() {
    let harness = Harness::new();
    let payme_order = harness.open_order(Provider::Payme, Decimal::new(500, 0)).await;
    let click_order = harness.open_order(Provider::Click, Decimal::new(500, 0)).await;

    harness
        .clock
        .advance(Duration::hours(23) + Duration::minutes(55));
    create_payme(&harness, "sweep-5", &payme_order.order_id).await;
    harness.clock.advance(Duration::minutes(10));

    let candidates = harness
        .engine
        .ledger()
        .store()
        .list_sweep_candidates(
            harness.clock.now(),
            harness.clock.now_ms() - harness.engine.config().payme.transaction_timeout_ms,
            100,
        )
        .await
        .unwrap();
    let ids: Vec<_> = candidates.iter().map(|row| row.order_id.as_str()).collect();
    assert_eq!(ids, vec![click_order.order_id.as_str()]);

    let report = process_tick(&harness.engine).await.unwrap();
    assert_eq!(report.expired_orders, 1);
    assert_eq!(report.expired_payme, 0);
    assert_eq!(
        harness.reload(&payme_order.order_id).await.status,
        TransactionStatus::Waiting
    );

    harness.clock.advance(Duration::hours(12));
    let report = process_tick(&harness.engine).await.unwrap();
    assert_eq!(report.expired_payme, 1);
}
