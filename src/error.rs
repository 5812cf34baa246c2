use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::collaborator::CollaboratorError;
use crate::ledger::{LedgerError, StoreError, TransitionError};

/// Request-shape or state problems attributable to the caller.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("authentication failed")]
    Unauthenticated,
    #[error("only POST is accepted")]
    MethodNotAllowed,
    #[error("request body is not parseable: {0}")]
    Parse(String),
    #[error("malformed field `{field}`: {reason}")]
    Malformed { field: String, reason: String },
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),
    #[error("transaction not found")]
    TransactionNotFound,
    #[error("operation not allowed: {0}")]
    InvalidState(String),
}

impl ProtocolViolation {
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ProtocolViolation::Malformed {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Business checks that reject an otherwise well-formed request.
#[derive(Debug, Error)]
pub enum ValidationFailure {
    #[error("order not found")]
    OrderNotFound,
    #[error("amount mismatch: expected {expected}, received {received}")]
    AmountMismatch { expected: Decimal, received: Decimal },
    #[error("order already paid")]
    AlreadyPaid,
    #[error("order is awaiting payment on another transaction")]
    AwaitingPayment,
    #[error("order expired")]
    Expired,
    #[error("order cancelled")]
    Cancelled,
}

// key: engine-error -> taxonomy every adapter maps to native codes
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
    #[error("order {order_id} already claimed by provider transaction {existing}")]
    Conflict { order_id: String, existing: String },
    #[error("order {0} is being processed by another request")]
    AlreadyProcessing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl EngineError {
    /// Errors the provider should retry rather than treat as a business answer.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            EngineError::AlreadyProcessing(_) | EngineError::Store(_) | EngineError::Collaborator(_)
        )
    }

    pub fn conflict(order_id: impl Into<String>, existing: impl Into<String>) -> Self {
        let order_id = order_id.into();
        let existing = existing.into();
        tracing::warn!(
            order_id = %order_id,
            existing = %existing,
            dispute_candidate = true,
            "second provider transaction claimed an order"
        );
        EngineError::Conflict { order_id, existing }
    }
}

impl From<TransitionError> for EngineError {
    fn from(error: TransitionError) -> Self {
        EngineError::Protocol(ProtocolViolation::InvalidState(error.to_string()))
    }
}

impl From<LedgerError> for EngineError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::Transition(err) => err.into(),
            LedgerError::Store(err) => EngineError::Store(err),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors of the operator-facing JSON API.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Engine(err) if !err.is_infrastructure() => StatusCode::BAD_REQUEST,
            AppError::Engine(_) | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(?self);
        }
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
