use crate::error::{EngineError, ProtocolViolation, ValidationFailure};

pub const SUCCESS: i32 = 0;
pub const SIGN_CHECK_FAILED: i32 = -1;
pub const INCORRECT_AMOUNT: i32 = -2;
pub const ACTION_NOT_FOUND: i32 = -3;
pub const ALREADY_PAID: i32 = -4;
pub const ORDER_NOT_FOUND: i32 = -5;
pub const TRANSACTION_NOT_FOUND: i32 = -6;
pub const FAILED_TO_UPDATE: i32 = -7;
pub const REQUEST_ERROR: i32 = -8;
pub const TRANSACTION_CANCELLED: i32 = -9;

pub fn error_note(code: i32) -> &'static str {
    match code {
        SUCCESS => "Success",
        SIGN_CHECK_FAILED => "SIGN CHECK FAILED!",
        INCORRECT_AMOUNT => "Incorrect parameter amount",
        ACTION_NOT_FOUND => "Action not found",
        ALREADY_PAID => "Already paid",
        ORDER_NOT_FOUND => "Order does not exist",
        TRANSACTION_NOT_FOUND => "Transaction does not exist",
        FAILED_TO_UPDATE => "Failed to update order",
        REQUEST_ERROR => "Error in request from click",
        _ => "Transaction cancelled",
    }
}

// key: click-error-mapping -> engine errors as Click `error` codes
pub fn code_for(error: &EngineError) -> i32 {
    match error {
        EngineError::Protocol(violation) => match violation {
            ProtocolViolation::Unauthenticated => SIGN_CHECK_FAILED,
            ProtocolViolation::UnknownOperation(_) => ACTION_NOT_FOUND,
            ProtocolViolation::TransactionNotFound => TRANSACTION_NOT_FOUND,
            ProtocolViolation::MethodNotAllowed
            | ProtocolViolation::Parse(_)
            | ProtocolViolation::Malformed { .. }
            | ProtocolViolation::InvalidState(_) => REQUEST_ERROR,
        },
        EngineError::Validation(failure) => match failure {
            ValidationFailure::OrderNotFound => ORDER_NOT_FOUND,
            ValidationFailure::AmountMismatch { .. } => INCORRECT_AMOUNT,
            ValidationFailure::AlreadyPaid => ALREADY_PAID,
            ValidationFailure::AwaitingPayment => REQUEST_ERROR,
            ValidationFailure::Expired | ValidationFailure::Cancelled => TRANSACTION_CANCELLED,
        },
        EngineError::Conflict { .. } => REQUEST_ERROR,
        EngineError::AlreadyProcessing(_)
        | EngineError::Store(_)
        | EngineError::Collaborator(_) => FAILED_TO_UPDATE,
    }
}
