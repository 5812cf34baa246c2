use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::BillingEngine;
use crate::error::{EngineResult, ProtocolViolation};
use crate::ledger::{BillingTransaction, Provider, StoreError, TransactionStatus};
use crate::payme::amount::to_tiyin;

const ORDER_SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ORDER_SUFFIX_LEN: usize = 4;
const MINT_ATTEMPTS: usize = 3;

// key: checkout-order -> request to open a new order for one provider
#[derive(Clone, Debug, Deserialize)]
pub struct CreateOrder {
    pub provider: Provider,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CheckoutLink {
    pub order_id: String,
    pub amount: Decimal,
    pub provider: Provider,
    pub payment_url: String,
}

/// Inserts a `created` row with a fresh order id. A colliding id is re-minted.
pub async fn create_order(
    engine: &BillingEngine,
    request: CreateOrder,
) -> EngineResult<BillingTransaction> {
    if request.amount <= Decimal::ZERO {
        return Err(ProtocolViolation::malformed("amount", "must be positive").into());
    }
    if request.provider == Provider::Payme {
        to_tiyin(request.amount)
            .map_err(|err| ProtocolViolation::malformed("amount", err.to_string()))?;
    }

    let checkout = &engine.config().checkout;
    let now = engine.now();
    let currency = request
        .currency
        .clone()
        .unwrap_or_else(|| checkout.currency.clone());

    let mut attempt = 0;
    loop {
        attempt += 1;
        let transaction = BillingTransaction {
            id: Uuid::new_v4(),
            order_id: mint_order_id(&checkout.order_prefix, now),
            provider: request.provider,
            provider_transaction_id: None,
            amount: request.amount,
            currency: currency.clone(),
            status: TransactionStatus::Created,
            status_code: None,
            cancel_reason: None,
            performed_at: None,
            cancelled_at: None,
            expires_at: now + Duration::hours(checkout.order_ttl_hours),
            activation_notified_at: None,
            deactivation_notified_at: None,
            payload: json!({}),
            metadata: normalize_metadata(&request.metadata),
            version: 0,
            created_at: now,
            updated_at: now,
            extension: None,
        };
        match engine.ledger().store().insert(&transaction).await {
            Ok(()) => {
                info!(
                    order_id = %transaction.order_id,
                    provider = transaction.provider.as_str(),
                    amount = %transaction.amount,
                    "billing order created"
                );
                return Ok(transaction);
            }
            Err(StoreError::UniqueViolation(_)) if attempt < MINT_ATTEMPTS => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

fn normalize_metadata(metadata: &Value) -> Value {
    match metadata {
        Value::Null => json!({}),
        other => other.clone(),
    }
}

/// `{prefix}{yymmddHHMMSS}{4 uppercase alphanumerics}`.
pub fn mint_order_id(prefix: &str, now: DateTime<Utc>) -> String {
    let mut order_id = format!("{prefix}{}", now.format("%y%m%d%H%M%S"));
    let alphabet_len = ORDER_SUFFIX_ALPHABET.len() as u32;
    let zone = u32::MAX - (u32::MAX % alphabet_len);
    let mut produced = 0;
    while produced < ORDER_SUFFIX_LEN {
        let value = OsRng.next_u32();
        if value >= zone {
            continue;
        }
        order_id.push(char::from(ORDER_SUFFIX_ALPHABET[(value % alphabet_len) as usize]));
        produced += 1;
    }
    order_id
}

// key: checkout-url -> hosted payment page for the order's provider
pub fn payment_url(config: &EngineConfig, transaction: &BillingTransaction) -> EngineResult<String> {
    match transaction.provider {
        Provider::Payme => payme_url(config, transaction),
        Provider::Click => click_url(config, transaction),
    }
}

fn payme_url(config: &EngineConfig, transaction: &BillingTransaction) -> EngineResult<String> {
    let tiyin = to_tiyin(transaction.amount)
        .map_err(|err| StoreError::Corrupt(err.to_string()))?;
    let mut params = format!(
        "m={};ac.order_id={};a={};l=uz",
        config.payme.merchant_id, transaction.order_id, tiyin
    );
    if let Some(return_url) = return_url(config, transaction)? {
        params.push_str(";c=");
        params.push_str(&return_url);
    }
    Ok(format!(
        "{}/{}",
        config.payme.checkout_url.trim_end_matches('/'),
        STANDARD.encode(params)
    ))
}

fn click_url(config: &EngineConfig, transaction: &BillingTransaction) -> EngineResult<String> {
    let mut url = parse_url(&config.click.checkout_url, "click checkout url")?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("service_id", &config.click.service_id.to_string())
            .append_pair("merchant_id", &config.click.merchant_id)
            .append_pair("amount", &transaction.amount.to_string())
            .append_pair("transaction_param", &transaction.order_id);
        if let Some(return_url) = return_url(config, transaction)? {
            query.append_pair("return_url", &return_url);
        }
    }
    Ok(url.into())
}

fn return_url(config: &EngineConfig, transaction: &BillingTransaction) -> EngineResult<Option<String>> {
    let Some(base) = config.checkout.return_url.as_deref() else {
        return Ok(None);
    };
    let mut url = parse_url(base, "return url")?;
    url.query_pairs_mut()
        .append_pair("order_id", &transaction.order_id);
    Ok(Some(url.into()))
}

fn parse_url(raw: &str, what: &str) -> EngineResult<Url> {
    Url::parse(raw).map_err(|err| StoreError::Corrupt(format!("invalid {what}: {err}")).into())
}
