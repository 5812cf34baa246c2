use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{WebhookLogId, WebhookOutcome};
use crate::click::errors::{self as click_errors, code_for};
use crate::click::{ClickForm, ClickOutcome, ClickRequest, ClickResponse};
use crate::engine::BillingEngine;
use crate::error::{EngineError, EngineResult, ProtocolViolation};
use crate::ledger::Provider;
use crate::payme::errors::SYSTEM_ERROR;
use crate::payme::wire::{failure, success};
use crate::payme::{PaymeError, PaymeRequest, PaymeResponse, RpcEnvelope};
use crate::signature::verify_payme_basic_auth;

// key: webhook-router-payme -> JSON-RPC endpoint, always HTTP 200
pub async fn payme_webhook(
    Extension(engine): Extension<BillingEngine>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let raw = String::from_utf8_lossy(&body);
    let handle = match engine.audit().begin(Provider::Payme, &headers, &raw).await {
        Ok(handle) => handle,
        Err(err) => {
            error!(?err, "failed to write payme webhook log");
            let body = failure(
                &RpcEnvelope::peek_id(&body),
                &PaymeError::new(SYSTEM_ERROR, None),
            );
            return (StatusCode::OK, Json(body)).into_response();
        }
    };

    let mut id = RpcEnvelope::peek_id(&body);
    let mut request = None;
    let result = handle_payme(&engine, &method, &headers, &body, &mut id, &mut request).await;

    let cancelling = matches!(request, Some(PaymeRequest::CancelTransaction(_)));
    let (response_body, error_code) = match &result {
        Ok(response) => match serde_json::to_value(response) {
            Ok(value) => (success(&id, value), None),
            Err(err) => {
                error!(?err, "failed to encode payme result");
                let error = PaymeError::new(SYSTEM_ERROR, None);
                (failure(&id, &error), Some(error.code))
            }
        },
        Err(err) => {
            let error = PaymeError::from_engine(err, cancelling);
            log_rejection(Provider::Payme, err, error.code);
            (failure(&id, &error), Some(error.code))
        }
    };

    let billing_transaction_id = match &request {
        Some(request) => resolve_payme_transaction(&engine, request).await,
        None => None,
    };
    finish(
        &engine,
        handle,
        WebhookOutcome {
            operation: request.as_ref().map(|request| request.method().to_string()),
            response_body: response_body.clone(),
            is_successful: error_code.is_none(),
            error_code,
            billing_transaction_id,
        },
    )
    .await;

    (StatusCode::OK, Json(response_body)).into_response()
}

async fn handle_payme(
    engine: &BillingEngine,
    method: &Method,
    headers: &HeaderMap,
    body: &[u8],
    id: &mut Value,
    request: &mut Option<PaymeRequest>,
) -> EngineResult<PaymeResponse> {
    if *method != Method::POST {
        return Err(ProtocolViolation::MethodNotAllowed.into());
    }
    let payme = &engine.config().payme;
    if !verify_payme_basic_auth(headers, &payme.login, &payme.merchant_key) {
        return Err(ProtocolViolation::Unauthenticated.into());
    }

    let envelope = RpcEnvelope::parse(body)?;
    *id = envelope.id.clone();
    let rpc_method = envelope
        .method
        .as_deref()
        .ok_or_else(|| ProtocolViolation::malformed("method", "required"))?;
    let parsed = PaymeRequest::parse(rpc_method, &envelope.params)?;
    let response = engine.payme().dispatch(&parsed).await;
    *request = Some(parsed);
    response
}

async fn resolve_payme_transaction(engine: &BillingEngine, request: &PaymeRequest) -> Option<Uuid> {
    let found = match request {
        PaymeRequest::CheckPerformTransaction(params) => {
            engine.ledger().find_by_order_id(&params.order_id).await
        }
        PaymeRequest::CreateTransaction(params) => {
            match engine
                .ledger()
                .find_by_provider_id(Provider::Payme, &params.id)
                .await
            {
                Ok(None) => engine.ledger().find_by_order_id(&params.order_id).await,
                other => other,
            }
        }
        PaymeRequest::PerformTransaction { id } | PaymeRequest::CheckTransaction { id } => {
            engine.ledger().find_by_provider_id(Provider::Payme, id).await
        }
        PaymeRequest::CancelTransaction(params) => {
            engine
                .ledger()
                .find_by_provider_id(Provider::Payme, &params.id)
                .await
        }
        PaymeRequest::GetStatement(_) => return None,
    };
    found
        .ok()
        .flatten()
        .filter(|row| row.provider == Provider::Payme)
        .map(|row| row.id)
}

// key: webhook-router-click -> form endpoint for Prepare and Complete
pub async fn click_webhook(
    Extension(engine): Extension<BillingEngine>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let raw = String::from_utf8_lossy(&body);
    let form = ClickForm::parse(&body).ok();
    let (click_trans_id, merchant_trans_id, echoed_prepare_id) =
        form.as_ref().map_or((0, String::new(), None), |form| {
            (
                form.echo_click_trans_id(),
                form.echo_merchant_trans_id(),
                form.echo_merchant_prepare_id(),
            )
        });

    let handle = match engine.audit().begin(Provider::Click, &headers, &raw).await {
        Ok(handle) => handle,
        Err(err) => {
            error!(?err, "failed to write click webhook log");
            let response = click_failure(
                click_trans_id,
                merchant_trans_id,
                echoed_prepare_id,
                click_errors::FAILED_TO_UPDATE,
            );
            return (StatusCode::OK, Json(response)).into_response();
        }
    };

    let mut request = None;
    let result = handle_click(&engine, &method, &body, form, &mut request).await;

    let response = match &result {
        Ok(ClickOutcome::Prepared(prepared)) => ClickResponse {
            click_trans_id,
            merchant_trans_id: merchant_trans_id.clone(),
            merchant_prepare_id: Some(prepared.merchant_prepare_id),
            merchant_confirm_id: None,
            error: click_errors::SUCCESS,
            error_note: click_errors::error_note(click_errors::SUCCESS).to_string(),
        },
        Ok(ClickOutcome::Completed(completed)) => ClickResponse {
            click_trans_id,
            merchant_trans_id: merchant_trans_id.clone(),
            merchant_prepare_id: echoed_prepare_id,
            merchant_confirm_id: Some(completed.merchant_confirm_id),
            error: click_errors::SUCCESS,
            error_note: click_errors::error_note(click_errors::SUCCESS).to_string(),
        },
        Err(err) => {
            let code = code_for(err);
            log_rejection(Provider::Click, err, code);
            click_failure(click_trans_id, merchant_trans_id.clone(), echoed_prepare_id, code)
        }
    };

    let billing_transaction_id = match &result {
        Ok(ClickOutcome::Prepared(prepared)) => Some(prepared.transaction_id),
        Ok(ClickOutcome::Completed(completed)) => Some(completed.transaction_id),
        Err(_) => match &request {
            Some(request) => resolve_click_transaction(&engine, request).await,
            None => None,
        },
    };
    let response_body = serde_json::to_value(&response).unwrap_or_default();
    finish(
        &engine,
        handle,
        WebhookOutcome {
            operation: request
                .as_ref()
                .map(|request| click_operation(request).to_string()),
            response_body,
            is_successful: response.error == click_errors::SUCCESS,
            error_code: (response.error != click_errors::SUCCESS).then_some(response.error),
            billing_transaction_id,
        },
    )
    .await;

    (StatusCode::OK, Json(response)).into_response()
}

async fn handle_click(
    engine: &BillingEngine,
    method: &Method,
    body: &[u8],
    form: Option<ClickForm>,
    request: &mut Option<ClickRequest>,
) -> EngineResult<ClickOutcome> {
    if *method != Method::POST {
        return Err(ProtocolViolation::MethodNotAllowed.into());
    }
    let form = match form {
        Some(form) => form,
        None => ClickForm::parse(body)?,
    };
    let action = form.action()?;
    let click = engine.click();
    click.authenticate(&form, action)?;
    let parsed = form.into_request(action)?;
    let outcome = click.dispatch(&parsed).await;
    *request = Some(parsed);
    outcome
}

async fn resolve_click_transaction(engine: &BillingEngine, request: &ClickRequest) -> Option<Uuid> {
    engine
        .ledger()
        .find_by_order_id(request.merchant_trans_id())
        .await
        .ok()
        .flatten()
        .filter(|row| row.provider == Provider::Click)
        .map(|row| row.id)
}

fn click_operation(request: &ClickRequest) -> &'static str {
    match request {
        ClickRequest::Prepare(_) => "prepare",
        ClickRequest::Complete(_) => "complete",
    }
}

fn click_failure(
    click_trans_id: i64,
    merchant_trans_id: String,
    merchant_prepare_id: Option<i64>,
    code: i32,
) -> ClickResponse {
    ClickResponse {
        click_trans_id,
        merchant_trans_id,
        merchant_prepare_id,
        merchant_confirm_id: None,
        error: code,
        error_note: click_errors::error_note(code).to_string(),
    }
}

fn log_rejection(provider: Provider, err: &EngineError, code: i32) {
    if err.is_infrastructure() {
        warn!(?err, provider = provider.as_str(), code, "webhook failed on infrastructure");
    } else {
        info!(%err, provider = provider.as_str(), code, "webhook rejected");
    }
}

async fn finish(engine: &BillingEngine, handle: WebhookLogId, outcome: WebhookOutcome) {
    let log_id = handle.id;
    if let Err(err) = engine.audit().complete(handle, outcome).await {
        error!(?err, %log_id, "failed to complete webhook log");
    }
}
