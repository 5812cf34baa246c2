use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::wire::{ClickComplete, ClickForm, ClickPrepare, ClickRequest};
use crate::engine::BillingEngine;
use crate::error::{EngineError, EngineResult, ProtocolViolation, ValidationFailure};
use crate::ledger::{
    BillingTransaction, ClickAction, ClickTransactionState, Provider, ProviderExtension,
    TransactionStatus,
};
use crate::signature::verify_click_sign;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClickPrepared {
    pub transaction_id: Uuid,
    pub merchant_prepare_id: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClickCompleted {
    pub transaction_id: Uuid,
    pub merchant_confirm_id: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClickOutcome {
    Prepared(ClickPrepared),
    Completed(ClickCompleted),
}

// key: click-adapter -> prepare/complete two-phase commit over the ledger
#[derive(Clone)]
pub struct ClickService {
    engine: BillingEngine,
}

impl ClickService {
    pub fn new(engine: BillingEngine) -> Self {
        Self { engine }
    }

    fn prepare_ttl(&self) -> Duration {
        Duration::seconds(self.engine.config().click.prepare_ttl_secs)
    }

    fn prepare_is_live(&self, state: &ClickTransactionState, now: DateTime<Utc>) -> bool {
        state.prepared_at + self.prepare_ttl() > now
    }

    /// Checks the service id and the sign string of a parsed form.
    pub fn authenticate(&self, form: &ClickForm, action: ClickAction) -> EngineResult<()> {
        let config = &self.engine.config().click;
        let input = form.sign_input(action)?;
        let service_matches = input
            .service_id
            .trim()
            .parse::<i64>()
            .map_or(false, |service_id| service_id == config.service_id);
        let sign_matches = verify_click_sign(&input, &config.secret_key, form.sign_string()?);
        if !(service_matches && sign_matches) {
            return Err(ProtocolViolation::Unauthenticated.into());
        }
        Ok(())
    }

    pub async fn dispatch(&self, request: &ClickRequest) -> EngineResult<ClickOutcome> {
        match request {
            ClickRequest::Prepare(prepare) => self.prepare(prepare).await.map(ClickOutcome::Prepared),
            ClickRequest::Complete(complete) => {
                self.complete(complete).await.map(ClickOutcome::Completed)
            }
        }
    }

    pub async fn prepare(&self, request: &ClickPrepare) -> EngineResult<ClickPrepared> {
        self.engine
            .guard()
            .run(Provider::Click, &request.merchant_trans_id, || {
                self.prepare_locked(request)
            })
            .await
    }

    async fn prepare_locked(&self, request: &ClickPrepare) -> EngineResult<ClickPrepared> {
        let order = self
            .engine
            .load_order(Provider::Click, &request.merchant_trans_id)
            .await?;
        self.engine.confirm_payable(&order).await?;
        if request.amount != order.amount {
            return Err(ValidationFailure::AmountMismatch {
                expected: order.amount,
                received: request.amount,
            }
            .into());
        }
        self.engine.ensure_open(&order)?;

        let now = self.engine.now();
        if let Some(existing) = order.click_state() {
            if self.prepare_is_live(existing, now) {
                if existing.click_trans_id == request.click_trans_id {
                    return Ok(ClickPrepared {
                        transaction_id: order.id,
                        merchant_prepare_id: existing.merchant_prepare_id,
                    });
                }
                return Err(EngineError::conflict(
                    &order.order_id,
                    existing.click_trans_id.to_string(),
                ));
            }
        }

        let merchant_prepare_id = self.engine.ledger().store().next_click_prepare_id().await?;
        let mut next = order.clone();
        next.status = TransactionStatus::Waiting;
        next.status_code = Some(0);
        next.provider_transaction_id = Some(request.click_trans_id.to_string());
        next.payload = json!({
            "action": ClickAction::Prepare.code(),
            "click_trans_id": request.click_trans_id,
            "click_paydoc_id": request.click_paydoc_id,
            "amount": request.amount,
            "sign_time": request.sign_time,
        });
        next.extension = Some(ProviderExtension::Click(ClickTransactionState {
            click_trans_id: request.click_trans_id,
            click_paydoc_id: request.click_paydoc_id,
            merchant_trans_id: order.order_id.clone(),
            merchant_prepare_id,
            merchant_confirm_id: None,
            action: ClickAction::Prepare,
            error_code: 0,
            error_note: "Success".to_string(),
            prepared_at: now,
        }));

        let prepared = self.engine.ledger().apply(&order, next, now).await?;
        info!(
            order_id = %prepared.order_id,
            click_trans_id = request.click_trans_id,
            merchant_prepare_id,
            "click transaction prepared"
        );
        Ok(ClickPrepared {
            transaction_id: prepared.id,
            merchant_prepare_id,
        })
    }

    pub async fn complete(&self, request: &ClickComplete) -> EngineResult<ClickCompleted> {
        self.engine
            .guard()
            .run(Provider::Click, &request.merchant_trans_id, || {
                self.complete_locked(request)
            })
            .await
    }

    async fn complete_locked(&self, request: &ClickComplete) -> EngineResult<ClickCompleted> {
        let order = self
            .engine
            .load_order(Provider::Click, &request.merchant_trans_id)
            .await?;
        let state = order
            .click_state()
            .filter(|state| {
                state.merchant_prepare_id == request.merchant_prepare_id
                    && state.click_trans_id == request.click_trans_id
            })
            .cloned()
            .ok_or(ProtocolViolation::TransactionNotFound)?;

        match order.status {
            TransactionStatus::Paid => {
                return Ok(ClickCompleted {
                    transaction_id: order.id,
                    merchant_confirm_id: state
                        .merchant_confirm_id
                        .unwrap_or(state.merchant_prepare_id),
                });
            }
            TransactionStatus::Cancelled
            | TransactionStatus::Failed
            | TransactionStatus::Refunded => {
                return Err(ValidationFailure::Cancelled.into());
            }
            _ => {}
        }

        let now = self.engine.now();
        if request.error < 0 {
            self.cancel_by_provider(&order, &state, request, now).await?;
            return Err(ValidationFailure::Cancelled.into());
        }
        if !self.prepare_is_live(&state, now) || order.expires_at < now {
            return Err(ValidationFailure::Expired.into());
        }
        if request.amount != order.amount {
            return Err(ValidationFailure::AmountMismatch {
                expected: order.amount,
                received: request.amount,
            }
            .into());
        }

        let mut completed_state = state.clone();
        completed_state.action = ClickAction::Complete;
        completed_state.merchant_confirm_id = Some(state.merchant_prepare_id);
        completed_state.click_paydoc_id = request.click_paydoc_id.or(state.click_paydoc_id);
        completed_state.error_code = 0;
        completed_state.error_note = "Success".to_string();

        let mut next = order.clone();
        next.status = TransactionStatus::Paid;
        next.status_code = Some(0);
        next.performed_at = Some(now);
        next.payload = json!({
            "action": ClickAction::Complete.code(),
            "click_trans_id": request.click_trans_id,
            "click_paydoc_id": request.click_paydoc_id,
            "merchant_prepare_id": request.merchant_prepare_id,
            "amount": request.amount,
            "error": request.error,
            "sign_time": request.sign_time,
        });
        next.extension = Some(ProviderExtension::Click(completed_state));

        let paid = self.engine.ledger().apply(&order, next, now).await?;
        info!(
            order_id = %paid.order_id,
            click_trans_id = request.click_trans_id,
            amount = %paid.amount,
            "click transaction completed"
        );
        self.engine.notifier().activate(&paid).await;

        Ok(ClickCompleted {
            transaction_id: paid.id,
            merchant_confirm_id: state.merchant_prepare_id,
        })
    }

    async fn cancel_by_provider(
        &self,
        order: &BillingTransaction,
        state: &ClickTransactionState,
        request: &ClickComplete,
        now: DateTime<Utc>,
    ) -> EngineResult<BillingTransaction> {
        let mut cancelled_state = state.clone();
        cancelled_state.action = ClickAction::Complete;
        cancelled_state.error_code = request.error;
        cancelled_state.error_note = request.error_note.clone();

        let mut next = order.clone();
        next.status = TransactionStatus::Cancelled;
        next.status_code = Some(request.error);
        next.cancelled_at = Some(now);
        next.cancel_reason = Some(format!("click: {}", request.error_note));
        next.extension = Some(ProviderExtension::Click(cancelled_state));

        let cancelled = self.engine.ledger().apply(order, next, now).await?;
        info!(
            order_id = %cancelled.order_id,
            click_trans_id = request.click_trans_id,
            error = request.error,
            "click transaction cancelled by provider"
        );
        Ok(cancelled)
    }
}
