use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::amount::{from_tiyin, to_tiyin};
use super::wire::{
    CancelParams, CancelResult, CheckPerformParams, CheckPerformResult, CheckTransactionResult,
    CreateParams, CreateResult, PaymeRequest, PerformResult, StatementAccount, StatementEntry,
    StatementParams, StatementResult,
};
use crate::engine::BillingEngine;
use crate::error::{EngineError, EngineResult, ProtocolViolation, ValidationFailure};
use crate::ledger::{
    BillingTransaction, LedgerError, PaymeCancelReason, PaymeState, PaymeTransactionState,
    Provider, ProviderExtension, StoreError, TransactionStatus,
};

/// Result member of a successful JSON-RPC response.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PaymeResponse {
    CheckPerform(CheckPerformResult),
    Create(CreateResult),
    Perform(PerformResult),
    Cancel(CancelResult),
    Check(CheckTransactionResult),
    Statement(StatementResult),
}

// key: payme-adapter -> JSON-RPC state machine over the ledger
#[derive(Clone)]
pub struct PaymeService {
    engine: BillingEngine,
}

impl PaymeService {
    pub fn new(engine: BillingEngine) -> Self {
        Self { engine }
    }

    fn timeout_ms(&self) -> i64 {
        self.engine.config().payme.transaction_timeout_ms
    }

    pub async fn dispatch(&self, request: &PaymeRequest) -> EngineResult<PaymeResponse> {
        match request {
            PaymeRequest::CheckPerformTransaction(params) => self
                .check_perform_transaction(params)
                .await
                .map(PaymeResponse::CheckPerform),
            PaymeRequest::CreateTransaction(params) => self
                .create_transaction(params)
                .await
                .map(PaymeResponse::Create),
            PaymeRequest::PerformTransaction { id } => self
                .perform_transaction(id)
                .await
                .map(PaymeResponse::Perform),
            PaymeRequest::CancelTransaction(params) => self
                .cancel_transaction(params)
                .await
                .map(PaymeResponse::Cancel),
            PaymeRequest::CheckTransaction { id } => {
                self.check_transaction(id).await.map(PaymeResponse::Check)
            }
            PaymeRequest::GetStatement(params) => {
                self.get_statement(params).await.map(PaymeResponse::Statement)
            }
        }
    }

    pub async fn check_perform_transaction(
        &self,
        params: &CheckPerformParams,
    ) -> EngineResult<CheckPerformResult> {
        let order = self.engine.load_order(Provider::Payme, &params.order_id).await?;
        ensure_amount(&order, params.amount)?;
        self.engine.ensure_open(&order)?;
        if order
            .payme_state()
            .map_or(false, |state| state.state == PaymeState::Created)
        {
            return Err(ValidationFailure::AwaitingPayment.into());
        }
        self.engine.confirm_payable(&order).await?;
        Ok(CheckPerformResult { allow: true })
    }

    pub async fn create_transaction(&self, params: &CreateParams) -> EngineResult<CreateResult> {
        let lease_key = match self
            .engine
            .ledger()
            .find_by_provider_id(Provider::Payme, &params.id)
            .await?
        {
            Some(existing) => existing.order_id,
            None => params.order_id.clone(),
        };
        self.engine
            .guard()
            .run(Provider::Payme, &lease_key, || self.create_locked(params))
            .await
    }

    async fn create_locked(&self, params: &CreateParams) -> EngineResult<CreateResult> {
        let now = self.engine.now();
        let now_ms = now.timestamp_millis();

        if let Some(existing) = self
            .engine
            .ledger()
            .find_by_provider_id(Provider::Payme, &params.id)
            .await?
        {
            if existing.order_id != params.order_id {
                return Err(ValidationFailure::OrderNotFound.into());
            }
            ensure_amount(&existing, params.amount)?;
            let state = payme_state(&existing)?;
            if state.state != PaymeState::Created {
                return Err(ProtocolViolation::InvalidState(format!(
                    "transaction is in state {}",
                    state.state.code()
                ))
                .into());
            }
            if state.is_timed_out(now_ms, self.timeout_ms()) {
                self.cancel_row(&existing, PaymeCancelReason::Timeout).await?;
                return Err(ProtocolViolation::InvalidState("transaction timed out".into()).into());
            }
            return Ok(CreateResult {
                create_time: state.create_time,
                transaction: existing.id.to_string(),
                state: state.state.code(),
            });
        }

        if now_ms - params.time > self.timeout_ms() {
            return Err(ProtocolViolation::InvalidState(
                "provider time is outside the transaction timeout".into(),
            )
            .into());
        }

        let order = self.engine.load_order(Provider::Payme, &params.order_id).await?;
        ensure_amount(&order, params.amount)?;
        self.engine.ensure_open(&order)?;
        if let Some(other) = order.payme_state() {
            return Err(EngineError::conflict(&order.order_id, &other.payme_id));
        }
        self.engine.confirm_payable(&order).await?;

        let mut next = order.clone();
        next.status = TransactionStatus::Waiting;
        next.status_code = Some(i32::from(PaymeState::Created.code()));
        next.provider_transaction_id = Some(params.id.clone());
        next.payload = json!({
            "method": "CreateTransaction",
            "id": params.id,
            "time": params.time,
            "amount": params.amount,
            "account": {"order_id": params.order_id},
        });
        next.extension = Some(ProviderExtension::Payme(PaymeTransactionState::created(
            params.id.clone(),
            params.time,
            now_ms,
        )));

        let created = match self.engine.ledger().apply(&order, next, now).await {
            Ok(created) => created,
            Err(LedgerError::Store(StoreError::UniqueViolation(_))) => {
                return Err(EngineError::conflict(&order.order_id, &params.id));
            }
            Err(err) => return Err(err.into()),
        };
        info!(
            order_id = %created.order_id,
            payme_id = %params.id,
            amount = %created.amount,
            "payme transaction created"
        );

        Ok(CreateResult {
            create_time: now_ms,
            transaction: created.id.to_string(),
            state: PaymeState::Created.code(),
        })
    }

    pub async fn perform_transaction(&self, id: &str) -> EngineResult<PerformResult> {
        let order_id = self.locate(id).await?.order_id;
        self.engine
            .guard()
            .run(Provider::Payme, &order_id, || self.perform_locked(id))
            .await
    }

    async fn perform_locked(&self, id: &str) -> EngineResult<PerformResult> {
        let row = self.locate(id).await?;
        let state = payme_state(&row)?;
        match state.state {
            PaymeState::Completed => Ok(PerformResult {
                transaction: row.id.to_string(),
                perform_time: state.perform_time.unwrap_or_default(),
                state: state.state.code(),
            }),
            PaymeState::Created => {
                let now = self.engine.now();
                let now_ms = now.timestamp_millis();
                if state.is_timed_out(now_ms, self.timeout_ms()) {
                    self.cancel_row(&row, PaymeCancelReason::Timeout).await?;
                    return Err(
                        ProtocolViolation::InvalidState("transaction timed out".into()).into(),
                    );
                }

                let mut performed = state.clone();
                performed.state = PaymeState::Completed;
                performed.perform_time = Some(now_ms);

                let mut next = row.clone();
                next.status = TransactionStatus::Paid;
                next.status_code = Some(i32::from(PaymeState::Completed.code()));
                next.performed_at = Some(now);
                next.extension = Some(ProviderExtension::Payme(performed));

                let paid = self.engine.ledger().apply(&row, next, now).await?;
                info!(
                    order_id = %paid.order_id,
                    payme_id = %state.payme_id,
                    amount = %paid.amount,
                    "payme transaction performed"
                );
                self.engine.notifier().activate(&paid).await;

                Ok(PerformResult {
                    transaction: paid.id.to_string(),
                    perform_time: now_ms,
                    state: PaymeState::Completed.code(),
                })
            }
            PaymeState::CancelledBeforeComplete | PaymeState::CancelledAfterComplete => Err(
                ProtocolViolation::InvalidState("transaction is cancelled".into()).into(),
            ),
        }
    }

    pub async fn cancel_transaction(&self, params: &CancelParams) -> EngineResult<CancelResult> {
        let order_id = self.locate(&params.id).await?.order_id;
        self.engine
            .guard()
            .run(Provider::Payme, &order_id, || self.cancel_locked(params))
            .await
    }

    async fn cancel_locked(&self, params: &CancelParams) -> EngineResult<CancelResult> {
        let row = self.locate(&params.id).await?;
        let state = payme_state(&row)?;
        let settled = match state.state {
            PaymeState::Created => self.cancel_row(&row, params.reason).await?,
            PaymeState::Completed => self.refund_row(&row, params.reason).await?,
            PaymeState::CancelledBeforeComplete | PaymeState::CancelledAfterComplete => row,
        };
        let settled_state = payme_state(&settled)?;
        Ok(CancelResult {
            transaction: settled.id.to_string(),
            cancel_time: settled_state.cancel_time.unwrap_or_default(),
            state: settled_state.state.code(),
        })
    }

    pub async fn check_transaction(&self, id: &str) -> EngineResult<CheckTransactionResult> {
        let row = self.locate(id).await?;
        let state = payme_state(&row)?;
        Ok(CheckTransactionResult {
            create_time: state.create_time,
            perform_time: state.perform_time.unwrap_or_default(),
            cancel_time: state.cancel_time.unwrap_or_default(),
            transaction: row.id.to_string(),
            state: state.state.code(),
            reason: state.reason.map(|reason| reason.code()),
        })
    }

    pub async fn get_statement(&self, params: &StatementParams) -> EngineResult<StatementResult> {
        let rows = self
            .engine
            .ledger()
            .store()
            .list_payme_by_create_time(params.from, params.to)
            .await?;
        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            let state = payme_state(&row)?;
            transactions.push(StatementEntry {
                id: state.payme_id.clone(),
                time: state.payme_time,
                amount: tiyin_of(&row)?,
                account: StatementAccount {
                    order_id: row.order_id.clone(),
                },
                create_time: state.create_time,
                perform_time: state.perform_time.unwrap_or_default(),
                cancel_time: state.cancel_time.unwrap_or_default(),
                transaction: row.id.to_string(),
                state: state.state.code(),
                reason: state.reason.map(|reason| reason.code()),
            });
        }
        Ok(StatementResult { transactions })
    }

    /// Cancels the order's state-1 transaction with reason 4 if it has outlived
    /// the timeout. Returns whether a cancellation happened.
    pub async fn expire_if_timed_out(&self, order_id: &str) -> EngineResult<bool> {
        self.engine
            .guard()
            .run(Provider::Payme, order_id, || self.expire_locked(order_id))
            .await
    }

    async fn expire_locked(&self, order_id: &str) -> EngineResult<bool> {
        let Some(row) = self.engine.ledger().find_by_order_id(order_id).await? else {
            return Ok(false);
        };
        let now_ms = self.engine.clock().now_ms();
        let timed_out = row
            .payme_state()
            .map_or(false, |state| state.is_timed_out(now_ms, self.timeout_ms()));
        if !timed_out || !row.status.is_pending() {
            return Ok(false);
        }
        self.cancel_row(&row, PaymeCancelReason::Timeout).await?;
        Ok(true)
    }

    async fn locate(&self, id: &str) -> EngineResult<BillingTransaction> {
        self.engine
            .ledger()
            .find_by_provider_id(Provider::Payme, id)
            .await?
            .ok_or_else(|| ProtocolViolation::TransactionNotFound.into())
    }

    /// State 1 -> -1, status -> cancelled.
    async fn cancel_row(
        &self,
        row: &BillingTransaction,
        reason: PaymeCancelReason,
    ) -> EngineResult<BillingTransaction> {
        let now = self.engine.now();
        let mut cancelled_state = payme_state(row)?;
        cancelled_state.state = PaymeState::CancelledBeforeComplete;
        cancelled_state.cancel_time = Some(now.timestamp_millis());
        cancelled_state.reason = Some(reason);

        let mut next = row.clone();
        next.status = TransactionStatus::Cancelled;
        next.status_code = Some(i32::from(PaymeState::CancelledBeforeComplete.code()));
        next.cancelled_at = Some(now);
        next.cancel_reason = Some(reason.label().to_string());
        next.extension = Some(ProviderExtension::Payme(cancelled_state));

        let cancelled = self.engine.ledger().apply(row, next, now).await?;
        info!(
            order_id = %cancelled.order_id,
            reason = reason.code(),
            "payme transaction cancelled before completion"
        );
        Ok(cancelled)
    }

    /// State 2 -> -2, status -> refunded, followed by the compensating deactivation.
    async fn refund_row(
        &self,
        row: &BillingTransaction,
        reason: PaymeCancelReason,
    ) -> EngineResult<BillingTransaction> {
        let now = self.engine.now();
        let mut refunded_state = payme_state(row)?;
        refunded_state.state = PaymeState::CancelledAfterComplete;
        refunded_state.cancel_time = Some(now.timestamp_millis());
        refunded_state.reason = Some(reason);

        let mut next = row.clone();
        next.status = TransactionStatus::Refunded;
        next.status_code = Some(i32::from(PaymeState::CancelledAfterComplete.code()));
        next.cancelled_at = Some(now);
        next.cancel_reason = Some(reason.label().to_string());
        next.extension = Some(ProviderExtension::Payme(refunded_state));

        let refunded = self.engine.ledger().apply(row, next, now).await?;
        info!(
            order_id = %refunded.order_id,
            reason = reason.code(),
            "payme transaction cancelled after completion"
        );
        self.engine.notifier().deactivate(&refunded).await;
        Ok(refunded)
    }
}

fn payme_state(row: &BillingTransaction) -> EngineResult<PaymeTransactionState> {
    row.payme_state().cloned().ok_or_else(|| {
        StoreError::Corrupt(format!("order {} has no payme state", row.order_id)).into()
    })
}

fn tiyin_of(row: &BillingTransaction) -> EngineResult<i64> {
    to_tiyin(row.amount).map_err(|err| StoreError::Corrupt(err.to_string()).into())
}

fn ensure_amount(order: &BillingTransaction, tiyin: i64) -> EngineResult<()> {
    if tiyin_of(order)? != tiyin {
        return Err(ValidationFailure::AmountMismatch {
            expected: order.amount,
            received: from_tiyin(tiyin),
        }
        .into());
    }
    Ok(())
}
