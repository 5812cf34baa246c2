use anyhow::Result;
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, info, warn};

use crate::config;
use crate::engine::BillingEngine;
use crate::error::EngineResult;
use crate::ledger::{BillingTransaction, PaymeState, TransactionStatus};
use crate::notifier::NotifyOutcome;

const EXPIRED_REASON: &str = "expired";

/// Counters for one sweep pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_payme: usize,
    pub expired_orders: usize,
    pub activations: usize,
    pub deactivations: usize,
}

// key: billing-sweep -> periodic expiry and notifier redelivery
pub fn spawn(engine: BillingEngine) {
    let interval = TokioDuration::from_secs(*config::BILLING_SWEEP_INTERVAL_SECS);

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            match process_tick(&engine).await {
                Ok(report) if report != SweepReport::default() => {
                    info!(?report, "billing sweep tick finished");
                }
                Ok(_) => {}
                Err(err) => warn!(?err, "billing sweep tick failed"),
            }
        }
    });
}

// key: billing-sweep -> tick handler
pub async fn process_tick(engine: &BillingEngine) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let now = engine.now();
    let timeout_ms = engine.config().payme.transaction_timeout_ms;
    let batch = engine.config().sweep_batch_size;
    let store = engine.ledger().store();

    let candidates = store
        .list_sweep_candidates(now, engine.clock().now_ms() - timeout_ms, batch)
        .await?;
    for row in candidates {
        if has_open_payme_state(&row) {
            match engine.payme().expire_if_timed_out(&row.order_id).await {
                Ok(true) => report.expired_payme += 1,
                Ok(false) => {
                    debug!(order_id = %row.order_id, "payme transaction no longer timed out")
                }
                Err(err) => warn!(
                    ?err,
                    order_id = %row.order_id,
                    "failed to cancel timed out payme transaction"
                ),
            }
            continue;
        }
        if row.is_expired(now) {
            match expire_order(engine, &row).await {
                Ok(true) => report.expired_orders += 1,
                Ok(false) => {}
                Err(err) => warn!(?err, order_id = %row.order_id, "failed to expire order"),
            }
        }
    }

    let pending = store.list_pending_notifications(batch).await?;
    for row in pending {
        match redeliver(engine, &row).await {
            Ok(Some(TransactionStatus::Paid)) => report.activations += 1,
            Ok(Some(TransactionStatus::Refunded)) => report.deactivations += 1,
            Ok(_) => {}
            Err(err) => warn!(?err, order_id = %row.order_id, "failed to redeliver notification"),
        }
    }

    Ok(report)
}

fn has_open_payme_state(row: &BillingTransaction) -> bool {
    row.payme_state()
        .map_or(false, |state| state.state == PaymeState::Created)
}

/// Cancels an unpaid order past `expires_at` under the same lease the adapters
/// take, re-reading the row so a payment that landed in between wins.
async fn expire_order(engine: &BillingEngine, row: &BillingTransaction) -> EngineResult<bool> {
    engine
        .guard()
        .run(row.provider, &row.order_id, || {
            expire_order_locked(engine, &row.order_id)
        })
        .await
}

async fn expire_order_locked(engine: &BillingEngine, order_id: &str) -> EngineResult<bool> {
    let Some(current) = engine.ledger().find_by_order_id(order_id).await? else {
        return Ok(false);
    };
    let now = engine.now();
    if !current.is_expired(now) || has_open_payme_state(&current) {
        return Ok(false);
    }

    let mut next = current.clone();
    next.status = TransactionStatus::Cancelled;
    next.cancelled_at = Some(now);
    next.cancel_reason = Some(EXPIRED_REASON.to_string());
    let cancelled = engine.ledger().apply(&current, next, now).await?;
    info!(
        order_id = %cancelled.order_id,
        provider = cancelled.provider.as_str(),
        expired_at = %cancelled.expires_at,
        "unpaid order expired"
    );
    Ok(true)
}

/// Redelivers a pending activation or deactivation under the order lease. The
/// row is re-read so a request that notified while we waited is not repeated.
/// Returns the status whose effect this call delivered.
async fn redeliver(
    engine: &BillingEngine,
    row: &BillingTransaction,
) -> EngineResult<Option<TransactionStatus>> {
    engine
        .guard()
        .run(row.provider, &row.order_id, || {
            redeliver_locked(engine, &row.order_id)
        })
        .await
}

async fn redeliver_locked(
    engine: &BillingEngine,
    order_id: &str,
) -> EngineResult<Option<TransactionStatus>> {
    let Some(current) = engine.ledger().find_by_order_id(order_id).await? else {
        return Ok(None);
    };
    let outcome = match current.status {
        TransactionStatus::Paid => engine.notifier().activate(&current).await,
        TransactionStatus::Refunded => engine.notifier().deactivate(&current).await,
        _ => return Ok(None),
    };
    Ok((outcome == NotifyOutcome::Delivered).then_some(current.status))
}
