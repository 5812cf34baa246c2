use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::amount::tiyin_from_wire;
use super::errors::PaymeError;
use crate::error::ProtocolViolation;
use crate::ledger::PaymeCancelReason;

/// Outer JSON-RPC object. `method` and `params` are validated afterwards so the
/// request id can be echoed on every error.
#[derive(Debug, Deserialize)]
pub struct RpcEnvelope {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
}

impl RpcEnvelope {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolViolation> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| ProtocolViolation::Parse(err.to_string()))?;
        if !value.is_object() {
            return Err(ProtocolViolation::malformed("request", "not a JSON object"));
        }
        serde_json::from_value(value).map_err(|err| ProtocolViolation::malformed("request", err.to_string()))
    }

    /// Best-effort id extraction for bodies that failed full parsing.
    pub fn peek_id(body: &[u8]) -> Value {
        serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|value| value.get("id").cloned())
            .unwrap_or(Value::Null)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckPerformParams {
    pub amount: i64,
    pub order_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateParams {
    pub id: String,
    pub time: i64,
    pub amount: i64,
    pub order_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelParams {
    pub id: String,
    pub reason: PaymeCancelReason,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatementParams {
    pub from: i64,
    pub to: i64,
}

// key: payme-request -> one variant per JSON-RPC method
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymeRequest {
    CheckPerformTransaction(CheckPerformParams),
    CreateTransaction(CreateParams),
    PerformTransaction { id: String },
    CancelTransaction(CancelParams),
    CheckTransaction { id: String },
    GetStatement(StatementParams),
}

impl PaymeRequest {
    pub fn parse(method: &str, params: &Value) -> Result<Self, ProtocolViolation> {
        match method {
            "CheckPerformTransaction" => Ok(Self::CheckPerformTransaction(CheckPerformParams {
                amount: wire_amount(params)?,
                order_id: account_order_id(params)?,
            })),
            "CreateTransaction" => Ok(Self::CreateTransaction(CreateParams {
                id: required_str(params, "id")?,
                time: required_i64(params, "time")?,
                amount: wire_amount(params)?,
                order_id: account_order_id(params)?,
            })),
            "PerformTransaction" => Ok(Self::PerformTransaction {
                id: required_str(params, "id")?,
            }),
            "CancelTransaction" => {
                let code = required_i64(params, "reason")?;
                let reason = i16::try_from(code)
                    .ok()
                    .and_then(PaymeCancelReason::from_code)
                    .ok_or_else(|| ProtocolViolation::malformed("reason", "unknown reason code"))?;
                Ok(Self::CancelTransaction(CancelParams {
                    id: required_str(params, "id")?,
                    reason,
                }))
            }
            "CheckTransaction" => Ok(Self::CheckTransaction {
                id: required_str(params, "id")?,
            }),
            "GetStatement" => {
                let from = required_i64(params, "from")?;
                let to = required_i64(params, "to")?;
                if from > to {
                    return Err(ProtocolViolation::malformed("from", "from is after to"));
                }
                Ok(Self::GetStatement(StatementParams { from, to }))
            }
            other => Err(ProtocolViolation::UnknownOperation(other.to_string())),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            PaymeRequest::CheckPerformTransaction(_) => "CheckPerformTransaction",
            PaymeRequest::CreateTransaction(_) => "CreateTransaction",
            PaymeRequest::PerformTransaction { .. } => "PerformTransaction",
            PaymeRequest::CancelTransaction(_) => "CancelTransaction",
            PaymeRequest::CheckTransaction { .. } => "CheckTransaction",
            PaymeRequest::GetStatement(_) => "GetStatement",
        }
    }
}

fn required_str(params: &Value, field: &str) -> Result<String, ProtocolViolation> {
    params
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProtocolViolation::malformed(field, "required string"))
}

fn required_i64(params: &Value, field: &str) -> Result<i64, ProtocolViolation> {
    params
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| ProtocolViolation::malformed(field, "required integer"))
}

fn wire_amount(params: &Value) -> Result<i64, ProtocolViolation> {
    let value = params
        .get("amount")
        .ok_or_else(|| ProtocolViolation::malformed("amount", "required"))?;
    tiyin_from_wire(value).map_err(|err| ProtocolViolation::malformed("amount", err.to_string()))
}

fn account_order_id(params: &Value) -> Result<String, ProtocolViolation> {
    let account = params
        .get("account")
        .ok_or_else(|| ProtocolViolation::malformed("account", "required object"))?;
    match account.get("order_id") {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Some(Value::Number(value)) => Ok(value.to_string()),
        _ => Err(ProtocolViolation::malformed("order_id", "required")),
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CheckPerformResult {
    pub allow: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CreateResult {
    pub create_time: i64,
    pub transaction: String,
    pub state: i16,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PerformResult {
    pub transaction: String,
    pub perform_time: i64,
    pub state: i16,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CancelResult {
    pub transaction: String,
    pub cancel_time: i64,
    pub state: i16,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CheckTransactionResult {
    pub create_time: i64,
    pub perform_time: i64,
    pub cancel_time: i64,
    pub transaction: String,
    pub state: i16,
    pub reason: Option<i16>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatementAccount {
    pub order_id: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatementEntry {
    pub id: String,
    pub time: i64,
    pub amount: i64,
    pub account: StatementAccount,
    pub create_time: i64,
    pub perform_time: i64,
    pub cancel_time: i64,
    pub transaction: String,
    pub state: i16,
    pub reason: Option<i16>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatementResult {
    pub transactions: Vec<StatementEntry>,
}

pub fn success(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub fn failure(id: &Value, error: &PaymeError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_transaction_params_are_typed() {
        let params = json!({
            "id": "5305e3bab097f420a62ced0b",
            "time": 1_399_114_284_039_i64,
            "amount": 50000,
            "account": {"order_id": "BP240101120000ABCD"}
        });
        let request = PaymeRequest::parse("CreateTransaction", &params).expect("parse");
        assert_eq!(
            request,
            PaymeRequest::CreateTransaction(CreateParams {
                id: "5305e3bab097f420a62ced0b".into(),
                time: 1_399_114_284_039,
                amount: 50_000,
                order_id: "BP240101120000ABCD".into(),
            })
        );
    }

    #[test]
    fn missing_account_names_the_field() {
        let err = PaymeRequest::parse("CheckPerformTransaction", &json!({"amount": 100}))
            .expect_err("account is required");
        assert!(matches!(err, ProtocolViolation::Malformed { field, .. } if field == "account"));
    }

    #[test]
    fn unknown_method_is_reported() {
        let err = PaymeRequest::parse("ChangePassword", &json!({})).expect_err("unknown");
        assert!(matches!(err, ProtocolViolation::UnknownOperation(method) if method == "ChangePassword"));
    }

    #[test]
    fn cancel_reason_must_be_known() {
        let err = PaymeRequest::parse("CancelTransaction", &json!({"id": "x", "reason": 9}))
            .expect_err("reason 9 is not defined");
        assert!(matches!(err, ProtocolViolation::Malformed { field, .. } if field == "reason"));
    }

    #[test]
    fn envelope_rejects_non_json() {
        assert!(matches!(
            RpcEnvelope::parse(b"{not json"),
            Err(ProtocolViolation::Parse(_))
        ));
        assert_eq!(RpcEnvelope::peek_id(br#"{"id": 42, "method": 1}"#), json!(42));
    }
}
