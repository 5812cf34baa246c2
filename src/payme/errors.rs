use serde::Serialize;

use crate::error::{EngineError, ProtocolViolation, ValidationFailure};

pub const INVALID_AMOUNT: i32 = -31001;
pub const TRANSACTION_NOT_FOUND: i32 = -31003;
pub const CANNOT_CANCEL: i32 = -31007;
pub const CANNOT_PERFORM: i32 = -31008;
pub const ORDER_NOT_FOUND: i32 = -31050;
pub const ORDER_UNAVAILABLE: i32 = -31051;
pub const METHOD_NOT_POST: i32 = -32300;
pub const SYSTEM_ERROR: i32 = -32400;
pub const INSUFFICIENT_PRIVILEGE: i32 = -32504;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const PARSE_ERROR: i32 = -32700;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct LocalizedMessage {
    pub ru: &'static str,
    pub uz: &'static str,
    pub en: &'static str,
}

/// JSON-RPC `error` member.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PaymeError {
    pub code: i32,
    pub message: LocalizedMessage,
    pub data: Option<String>,
}

impl PaymeError {
    pub fn new(code: i32, data: Option<String>) -> Self {
        Self {
            code,
            message: message_for(code),
            data,
        }
    }

    /// Maps an engine error to the native code. `cancelling` selects -31007
    /// over -31008 for state errors raised by CancelTransaction.
    pub fn from_engine(error: &EngineError, cancelling: bool) -> Self {
        match error {
            EngineError::Protocol(violation) => match violation {
                ProtocolViolation::Unauthenticated => Self::new(INSUFFICIENT_PRIVILEGE, None),
                ProtocolViolation::MethodNotAllowed => Self::new(METHOD_NOT_POST, None),
                ProtocolViolation::Parse(_) => Self::new(PARSE_ERROR, None),
                ProtocolViolation::Malformed { field, .. } => {
                    Self::new(INVALID_REQUEST, Some(field.clone()))
                }
                ProtocolViolation::UnknownOperation(method) => {
                    Self::new(METHOD_NOT_FOUND, Some(method.clone()))
                }
                ProtocolViolation::TransactionNotFound => {
                    Self::new(TRANSACTION_NOT_FOUND, Some("id".into()))
                }
                ProtocolViolation::InvalidState(_) if cancelling => Self::new(CANNOT_CANCEL, None),
                ProtocolViolation::InvalidState(_) => Self::new(CANNOT_PERFORM, None),
            },
            EngineError::Validation(failure) => match failure {
                ValidationFailure::OrderNotFound => {
                    Self::new(ORDER_NOT_FOUND, Some("order_id".into()))
                }
                ValidationFailure::AmountMismatch { .. } => {
                    Self::new(INVALID_AMOUNT, Some("amount".into()))
                }
                ValidationFailure::AlreadyPaid | ValidationFailure::AwaitingPayment => {
                    Self::new(ORDER_UNAVAILABLE, Some("order_id".into()))
                }
                ValidationFailure::Expired | ValidationFailure::Cancelled => {
                    Self::new(CANNOT_PERFORM, None)
                }
            },
            EngineError::Conflict { .. } => Self::new(ORDER_UNAVAILABLE, Some("order_id".into())),
            EngineError::AlreadyProcessing(_)
            | EngineError::Store(_)
            | EngineError::Collaborator(_) => Self::new(SYSTEM_ERROR, None),
        }
    }
}

fn message_for(code: i32) -> LocalizedMessage {
    let (ru, uz, en) = match code {
        INVALID_AMOUNT => ("Неверная сумма", "Noto'g'ri summa", "Invalid amount"),
        TRANSACTION_NOT_FOUND => (
            "Транзакция не найдена",
            "Tranzaksiya topilmadi",
            "Transaction not found",
        ),
        CANNOT_CANCEL => (
            "Невозможно отменить транзакцию",
            "Tranzaksiyani bekor qilib bo'lmaydi",
            "Unable to cancel transaction",
        ),
        CANNOT_PERFORM => (
            "Невозможно выполнить операцию",
            "Operatsiyani bajarib bo'lmaydi",
            "Unable to perform operation",
        ),
        ORDER_NOT_FOUND => ("Заказ не найден", "Buyurtma topilmadi", "Order not found"),
        ORDER_UNAVAILABLE => (
            "Заказ уже оплачен или ожидает оплаты",
            "Buyurtma allaqachon to'langan yoki to'lov kutilmoqda",
            "Order already paid or awaiting payment",
        ),
        METHOD_NOT_POST => (
            "Метод запроса должен быть POST",
            "So'rov usuli POST bo'lishi kerak",
            "Request method must be POST",
        ),
        INSUFFICIENT_PRIVILEGE => (
            "Недостаточно привилегий",
            "Ruxsat yetarli emas",
            "Insufficient privilege",
        ),
        INVALID_REQUEST => (
            "Неверный запрос JSON-RPC",
            "Noto'g'ri JSON-RPC so'rovi",
            "Invalid JSON-RPC request",
        ),
        METHOD_NOT_FOUND => ("Метод не найден", "Metod topilmadi", "Method not found"),
        PARSE_ERROR => ("Ошибка разбора JSON", "JSON tahlil xatosi", "Parse error"),
        _ => ("Системная ошибка", "Tizim xatosi", "System error"),
    };
    LocalizedMessage { ru, uz, en }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::StoreError;
    use uuid::Uuid;

    #[test]
    fn state_errors_depend_on_method() {
        let err = EngineError::Protocol(ProtocolViolation::InvalidState("state -1".into()));
        assert_eq!(PaymeError::from_engine(&err, false).code, CANNOT_PERFORM);
        assert_eq!(PaymeError::from_engine(&err, true).code, CANNOT_CANCEL);
    }

    #[test]
    fn infrastructure_errors_are_system_errors() {
        let err = EngineError::Store(StoreError::StaleWrite(Uuid::new_v4()));
        let mapped = PaymeError::from_engine(&err, false);
        assert_eq!(mapped.code, SYSTEM_ERROR);
        assert_eq!(mapped.message.en, "System error");
    }

    #[test]
    fn amount_mismatch_names_the_field() {
        let err = EngineError::Validation(ValidationFailure::AmountMismatch {
            expected: rust_decimal::Decimal::new(500, 0),
            received: rust_decimal::Decimal::new(400, 0),
        });
        let mapped = PaymeError::from_engine(&err, false);
        assert_eq!(mapped.code, INVALID_AMOUNT);
        assert_eq!(mapped.data.as_deref(), Some("amount"));
    }
}
