use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

// key: ledger-provider -> payment gateway discriminant
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Payme,
    Click,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Payme => "payme",
            Provider::Click => "click",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "payme" => Some(Self::Payme),
            "click" => Some(Self::Click),
            _ => None,
        }
    }
}

// key: ledger-status -> superset state machine shared by both providers
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Created,
    Waiting,
    Processing,
    Paid,
    Cancelled,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Created => "created",
            TransactionStatus::Waiting => "waiting",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Paid => "paid",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "waiting" => Some(Self::Waiting),
            "processing" => Some(Self::Processing),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Paid
                | TransactionStatus::Cancelled
                | TransactionStatus::Failed
                | TransactionStatus::Refunded
        )
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Created | TransactionStatus::Waiting | TransactionStatus::Processing
        )
    }

    /// Forward edges only. `paid -> refunded` is the single way out of a terminal state.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, next) {
            (Created, Waiting | Cancelled | Failed) => true,
            (Waiting, Processing | Paid | Cancelled | Failed) => true,
            (Processing, Paid | Cancelled | Failed) => true,
            (Paid, Refunded) => true,
            (current, next) => *current == next && !current.is_terminal(),
        }
    }
}

/// Payme transaction state as reported on the wire.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymeState {
    Created,
    Completed,
    CancelledBeforeComplete,
    CancelledAfterComplete,
}

impl PaymeState {
    pub fn code(&self) -> i16 {
        match self {
            PaymeState::Created => 1,
            PaymeState::Completed => 2,
            PaymeState::CancelledBeforeComplete => -1,
            PaymeState::CancelledAfterComplete => -2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(Self::Created),
            2 => Some(Self::Completed),
            -1 => Some(Self::CancelledBeforeComplete),
            -2 => Some(Self::CancelledAfterComplete),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.code() < 0
    }

    pub fn can_transition_to(&self, next: PaymeState) -> bool {
        use PaymeState::*;
        matches!(
            (self, next),
            (Created, Completed) | (Created, CancelledBeforeComplete) | (Completed, CancelledAfterComplete)
        )
    }
}

/// Cancellation reasons documented by Payme.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymeCancelReason {
    ReceiversNotFound,
    DebitOperationError,
    TransactionError,
    Timeout,
    Refund,
}

impl PaymeCancelReason {
    pub fn code(&self) -> i16 {
        match self {
            PaymeCancelReason::ReceiversNotFound => 1,
            PaymeCancelReason::DebitOperationError => 2,
            PaymeCancelReason::TransactionError => 3,
            PaymeCancelReason::Timeout => 4,
            PaymeCancelReason::Refund => 5,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(Self::ReceiversNotFound),
            2 => Some(Self::DebitOperationError),
            3 => Some(Self::TransactionError),
            4 => Some(Self::Timeout),
            5 => Some(Self::Refund),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PaymeCancelReason::ReceiversNotFound => "payme: receivers not found",
            PaymeCancelReason::DebitOperationError => "payme: debit operation error",
            PaymeCancelReason::TransactionError => "payme: transaction error",
            PaymeCancelReason::Timeout => "payme: transaction timeout",
            PaymeCancelReason::Refund => "payme: refund",
        }
    }
}

// key: ledger-payme-extension -> 1:1 with a payme BillingTransaction
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymeTransactionState {
    pub payme_id: String,
    /// Provider-supplied `time` of the CreateTransaction call.
    pub payme_time: i64,
    pub state: PaymeState,
    pub create_time: i64,
    pub perform_time: Option<i64>,
    pub cancel_time: Option<i64>,
    pub reason: Option<PaymeCancelReason>,
}

impl PaymeTransactionState {
    pub fn created(payme_id: String, payme_time: i64, create_time: i64) -> Self {
        Self {
            payme_id,
            payme_time,
            state: PaymeState::Created,
            create_time,
            perform_time: None,
            cancel_time: None,
            reason: None,
        }
    }

    pub fn is_timed_out(&self, now_ms: i64, timeout_ms: i64) -> bool {
        self.state == PaymeState::Created && self.create_time + timeout_ms < now_ms
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClickAction {
    Prepare,
    Complete,
}

impl ClickAction {
    pub fn code(&self) -> i16 {
        match self {
            ClickAction::Prepare => 0,
            ClickAction::Complete => 1,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Prepare),
            1 => Some(Self::Complete),
            _ => None,
        }
    }
}

// key: ledger-click-extension -> 1:1 with a click BillingTransaction
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClickTransactionState {
    pub click_trans_id: i64,
    pub click_paydoc_id: Option<i64>,
    pub merchant_trans_id: String,
    pub merchant_prepare_id: i64,
    pub merchant_confirm_id: Option<i64>,
    pub action: ClickAction,
    pub error_code: i32,
    pub error_note: String,
    pub prepared_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderExtension {
    Payme(PaymeTransactionState),
    Click(ClickTransactionState),
}

impl ProviderExtension {
    pub fn provider(&self) -> Provider {
        match self {
            ProviderExtension::Payme(_) => Provider::Payme,
            ProviderExtension::Click(_) => Provider::Click,
        }
    }
}

// key: ledger-transaction -> canonical record of one payable order
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BillingTransaction {
    pub id: Uuid,
    pub order_id: String,
    pub provider: Provider,
    pub provider_transaction_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub status_code: Option<i32>,
    pub cancel_reason: Option<String>,
    pub performed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub activation_notified_at: Option<DateTime<Utc>>,
    pub deactivation_notified_at: Option<DateTime<Utc>>,
    pub payload: Value,
    pub metadata: Value,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub extension: Option<ProviderExtension>,
}

impl BillingTransaction {
    pub fn payme_state(&self) -> Option<&PaymeTransactionState> {
        match &self.extension {
            Some(ProviderExtension::Payme(state)) => Some(state),
            _ => None,
        }
    }

    pub fn click_state(&self) -> Option<&ClickTransactionState> {
        match &self.extension {
            Some(ProviderExtension::Click(state)) => Some(state),
            _ => None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            TransactionStatus::Created | TransactionStatus::Waiting
        ) && self.expires_at < now
    }

    /// Reference handed to the subscription collaborator.
    pub fn payment_ref(&self) -> String {
        self.provider_transaction_id
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal status transition {from} -> {to}")]
    Status { from: &'static str, to: &'static str },
    #[error("illegal payme state transition {from} -> {to}")]
    PaymeState { from: i16, to: i16 },
    #[error("{field} is immutable once the transaction is paid")]
    Immutable { field: &'static str },
    #[error("{field} is immutable")]
    Identity { field: &'static str },
    #[error("extension for {found} attached to a {expected} transaction")]
    ProviderMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

/// Validates that `next` is a legal successor of `current`.
pub fn validate_transition(
    current: &BillingTransaction,
    next: &BillingTransaction,
) -> Result<(), TransitionError> {
    if current.id != next.id {
        return Err(TransitionError::Identity { field: "id" });
    }
    if current.order_id != next.order_id {
        return Err(TransitionError::Identity { field: "order_id" });
    }
    if current.provider != next.provider {
        return Err(TransitionError::Identity { field: "provider" });
    }
    if current.amount != next.amount {
        let field = "amount";
        return Err(if current.status == TransactionStatus::Paid {
            TransitionError::Immutable { field }
        } else {
            TransitionError::Identity { field }
        });
    }
    if let Some(extension) = &next.extension {
        if extension.provider() != next.provider {
            return Err(TransitionError::ProviderMismatch {
                expected: next.provider.as_str(),
                found: extension.provider().as_str(),
            });
        }
    }

    if !current.status.can_transition_to(next.status) {
        return Err(TransitionError::Status {
            from: current.status.as_str(),
            to: next.status.as_str(),
        });
    }

    if matches!(
        current.status,
        TransactionStatus::Paid | TransactionStatus::Refunded
    ) && current.provider_transaction_id != next.provider_transaction_id
    {
        return Err(TransitionError::Immutable {
            field: "provider_transaction_id",
        });
    }

    if let (Some(before), Some(after)) = (current.payme_state(), next.payme_state()) {
        if before.payme_id != after.payme_id {
            return Err(TransitionError::Identity { field: "payme_id" });
        }
        if before.state != after.state && !before.state.can_transition_to(after.state) {
            return Err(TransitionError::PaymeState {
                from: before.state.code(),
                to: after.state.code(),
            });
        }
    }

    if current.status == TransactionStatus::Paid {
        if let (Some(before), Some(after)) = (current.click_state(), next.click_state()) {
            if before.click_trans_id != after.click_trans_id
                || before.merchant_prepare_id != after.merchant_prepare_id
            {
                return Err(TransitionError::Immutable {
                    field: "click_trans_id",
                });
            }
        }
    }

    Ok(())
}
