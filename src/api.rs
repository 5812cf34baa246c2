use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};

use crate::audit::{WebhookLog, WebhookLogFilter};
use crate::checkout::{self, CheckoutLink, CreateOrder};
use crate::engine::BillingEngine;
use crate::error::{AppError, AppResult};
use crate::extractor::Operator;
use crate::ledger::BillingTransaction;

// key: billing-api -> operator read endpoints and checkout
pub async fn get_transaction(
    _operator: Operator,
    Extension(engine): Extension<BillingEngine>,
    Path(order_id): Path<String>,
) -> AppResult<Json<BillingTransaction>> {
    let transaction = engine
        .ledger()
        .find_by_order_id(&order_id)
        .await
        .map_err(|err| AppError::Engine(err.into()))?
        .ok_or(AppError::NotFound)?;
    Ok(Json(transaction))
}

pub async fn list_webhook_logs(
    _operator: Operator,
    Extension(engine): Extension<BillingEngine>,
    Query(filter): Query<WebhookLogFilter>,
) -> AppResult<Json<Vec<WebhookLog>>> {
    if let (Some(start), Some(end)) = (filter.start, filter.end) {
        if start > end {
            return Err(AppError::BadRequest("start is after end".into()));
        }
    }
    let logs = engine.audit().list(&filter).await?;
    Ok(Json(logs))
}

pub async fn create_order(
    _operator: Operator,
    Extension(engine): Extension<BillingEngine>,
    Json(payload): Json<CreateOrder>,
) -> AppResult<(StatusCode, Json<CheckoutLink>)> {
    let transaction = checkout::create_order(&engine, payload).await?;
    let payment_url = checkout::payment_url(engine.config(), &transaction)?;
    Ok((
        StatusCode::CREATED,
        Json(CheckoutLink {
            order_id: transaction.order_id,
            amount: transaction.amount,
            provider: transaction.provider,
            payment_url,
        }),
    ))
}
