use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolViolation;
use crate::ledger::ClickAction;
use crate::signature::ClickSignInput;

/// Raw form fields as Click posts them. Everything stays text until the sign
/// has been checked against the exact wire values.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ClickForm {
    pub click_trans_id: Option<String>,
    pub service_id: Option<String>,
    pub click_paydoc_id: Option<String>,
    pub merchant_trans_id: Option<String>,
    pub merchant_prepare_id: Option<String>,
    pub amount: Option<String>,
    pub action: Option<String>,
    pub error: Option<String>,
    pub error_note: Option<String>,
    pub sign_time: Option<String>,
    pub sign_string: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClickPrepare {
    pub click_trans_id: i64,
    pub service_id: i64,
    pub click_paydoc_id: Option<i64>,
    pub merchant_trans_id: String,
    pub amount: Decimal,
    pub error: i32,
    pub error_note: String,
    pub sign_time: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClickComplete {
    pub click_trans_id: i64,
    pub service_id: i64,
    pub click_paydoc_id: Option<i64>,
    pub merchant_trans_id: String,
    pub merchant_prepare_id: i64,
    pub amount: Decimal,
    pub error: i32,
    pub error_note: String,
    pub sign_time: String,
}

// key: click-request -> typed prepare/complete phases
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClickRequest {
    Prepare(ClickPrepare),
    Complete(ClickComplete),
}

impl ClickRequest {
    pub fn action(&self) -> ClickAction {
        match self {
            ClickRequest::Prepare(_) => ClickAction::Prepare,
            ClickRequest::Complete(_) => ClickAction::Complete,
        }
    }

    pub fn merchant_trans_id(&self) -> &str {
        match self {
            ClickRequest::Prepare(prepare) => &prepare.merchant_trans_id,
            ClickRequest::Complete(complete) => &complete.merchant_trans_id,
        }
    }
}

impl ClickForm {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolViolation> {
        serde_urlencoded::from_bytes(body).map_err(|err| ProtocolViolation::Parse(err.to_string()))
    }

    pub fn action(&self) -> Result<ClickAction, ProtocolViolation> {
        let raw = required(&self.action, "action")?;
        raw.parse::<i16>()
            .ok()
            .and_then(ClickAction::from_code)
            .ok_or_else(|| ProtocolViolation::UnknownOperation(raw.to_string()))
    }

    /// Sign fields for `action`; Complete adds `merchant_prepare_id`.
    pub fn sign_input(&self, action: ClickAction) -> Result<ClickSignInput<'_>, ProtocolViolation> {
        let merchant_prepare_id = match action {
            ClickAction::Prepare => None,
            ClickAction::Complete => Some(required(&self.merchant_prepare_id, "merchant_prepare_id")?),
        };
        Ok(ClickSignInput {
            click_trans_id: required(&self.click_trans_id, "click_trans_id")?,
            service_id: required(&self.service_id, "service_id")?,
            merchant_trans_id: required(&self.merchant_trans_id, "merchant_trans_id")?,
            merchant_prepare_id,
            amount: required(&self.amount, "amount")?,
            action: required(&self.action, "action")?,
            sign_time: required(&self.sign_time, "sign_time")?,
        })
    }

    pub fn sign_string(&self) -> Result<&str, ProtocolViolation> {
        required(&self.sign_string, "sign_string")
    }

    pub fn into_request(self, action: ClickAction) -> Result<ClickRequest, ProtocolViolation> {
        let click_trans_id = parse_i64(&self.click_trans_id, "click_trans_id")?;
        let service_id = parse_i64(&self.service_id, "service_id")?;
        let click_paydoc_id = match self.click_paydoc_id.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(
                raw.parse::<i64>()
                    .map_err(|_| ProtocolViolation::malformed("click_paydoc_id", "not an integer"))?,
            ),
            _ => None,
        };
        let merchant_trans_id = required(&self.merchant_trans_id, "merchant_trans_id")?.to_string();
        let amount = parse_amount(&self.amount)?;
        let error = match self.error.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => raw
                .parse::<i32>()
                .map_err(|_| ProtocolViolation::malformed("error", "not an integer"))?,
            _ => 0,
        };
        let error_note = self.error_note.clone().unwrap_or_default();
        let sign_time = required(&self.sign_time, "sign_time")?.to_string();

        Ok(match action {
            ClickAction::Prepare => ClickRequest::Prepare(ClickPrepare {
                click_trans_id,
                service_id,
                click_paydoc_id,
                merchant_trans_id,
                amount,
                error,
                error_note,
                sign_time,
            }),
            ClickAction::Complete => ClickRequest::Complete(ClickComplete {
                click_trans_id,
                service_id,
                click_paydoc_id,
                merchant_trans_id,
                merchant_prepare_id: parse_i64(&self.merchant_prepare_id, "merchant_prepare_id")?,
                amount,
                error,
                error_note,
                sign_time,
            }),
        })
    }

    /// Identifiers echoed on error responses even when the form is invalid.
    pub fn echo_click_trans_id(&self) -> i64 {
        self.click_trans_id
            .as_deref()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or_default()
    }

    pub fn echo_merchant_trans_id(&self) -> String {
        self.merchant_trans_id.clone().unwrap_or_default()
    }

    pub fn echo_merchant_prepare_id(&self) -> Option<i64> {
        self.merchant_prepare_id
            .as_deref()
            .and_then(|raw| raw.trim().parse().ok())
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ProtocolViolation> {
    value
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .ok_or_else(|| ProtocolViolation::malformed(field, "required"))
}

fn parse_i64(value: &Option<String>, field: &str) -> Result<i64, ProtocolViolation> {
    required(value, field)?
        .trim()
        .parse::<i64>()
        .map_err(|_| ProtocolViolation::malformed(field, "not an integer"))
}

fn parse_amount(value: &Option<String>) -> Result<Decimal, ProtocolViolation> {
    let amount = Decimal::from_str(required(value, "amount")?.trim())
        .map_err(|err| ProtocolViolation::malformed("amount", err.to_string()))?;
    if amount <= Decimal::ZERO {
        return Err(ProtocolViolation::malformed("amount", "must be positive"));
    }
    Ok(amount)
}

/// Body of every Click answer, success or failure.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ClickResponse {
    pub click_trans_id: i64,
    pub merchant_trans_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_prepare_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_confirm_id: Option<i64>,
    pub error: i32,
    pub error_note: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREPARE_BODY: &[u8] = b"click_trans_id=1001&service_id=777&click_paydoc_id=555&\
merchant_trans_id=BP240101120000ABCD&amount=500.00&action=0&error=0&error_note=Success&\
sign_time=2024-01-01+12%3A00%3A00&sign_string=abc";

    #[test]
    fn prepare_form_becomes_typed_request() {
        let form = ClickForm::parse(PREPARE_BODY).expect("form");
        let action = form.action().expect("action");
        assert_eq!(action, ClickAction::Prepare);

        let sign = form.sign_input(action).expect("sign input");
        assert_eq!(sign.amount, "500.00");
        assert_eq!(sign.sign_time, "2024-01-01 12:00:00");
        assert!(sign.merchant_prepare_id.is_none());

        match form.into_request(action).expect("request") {
            ClickRequest::Prepare(prepare) => {
                assert_eq!(prepare.click_trans_id, 1001);
                assert_eq!(prepare.click_paydoc_id, Some(555));
                assert_eq!(prepare.amount, Decimal::new(500, 0));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn unknown_action_is_reported_as_such() {
        let form = ClickForm::parse(b"action=7&click_trans_id=1").expect("form");
        assert!(matches!(
            form.action(),
            Err(ProtocolViolation::UnknownOperation(action)) if action == "7"
        ));
    }

    #[test]
    fn complete_requires_prepare_id() {
        let form = ClickForm::parse(PREPARE_BODY).expect("form");
        let err = form
            .sign_input(ClickAction::Complete)
            .expect_err("prepare id missing");
        assert!(matches!(err, ProtocolViolation::Malformed { field, .. } if field == "merchant_prepare_id"));
    }

    #[test]
    fn error_response_omits_missing_ids() {
        let response = ClickResponse {
            click_trans_id: 1,
            merchant_trans_id: "BP1".into(),
            merchant_prepare_id: None,
            merchant_confirm_id: None,
            error: -5,
            error_note: "Order does not exist".into(),
        };
        let json = serde_json::to_value(&response).expect("json");
        assert!(json.get("merchant_prepare_id").is_none());
        assert_eq!(json["error"], -5);
    }
}
