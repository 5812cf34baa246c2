use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::ledger::{Provider, StoreResult};

const REDACTED: &str = "[redacted]";
const REDACTED_HEADERS: &[&str] = &["authorization", "cookie", "x-auth"];

// key: audit-webhook-log -> write-ahead record of one inbound provider call
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WebhookLog {
    pub id: Uuid,
    pub provider: Provider,
    pub operation: Option<String>,
    pub request_headers: Value,
    pub request_body: String,
    pub response_body: Option<Value>,
    pub is_successful: bool,
    pub error_code: Option<i32>,
    pub billing_transaction_id: Option<Uuid>,
    pub received_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Result of processing, written once onto the log row.
#[derive(Clone, Debug, PartialEq)]
pub struct WebhookOutcome {
    pub operation: Option<String>,
    pub response_body: Value,
    pub is_successful: bool,
    pub error_code: Option<i32>,
    pub billing_transaction_id: Option<Uuid>,
}

// key: audit-webhook-filter
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookLogFilter {
    pub provider: Option<Provider>,
    pub successful: Option<bool>,
    pub billing_transaction_id: Option<Uuid>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl WebhookLogFilter {
    pub fn matches(&self, log: &WebhookLog) -> bool {
        self.provider.map_or(true, |provider| log.provider == provider)
            && self
                .successful
                .map_or(true, |successful| log.is_successful == successful)
            && self
                .billing_transaction_id
                .map_or(true, |id| log.billing_transaction_id == Some(id))
            && self.start.map_or(true, |start| log.received_at >= start)
            && self.end.map_or(true, |end| log.received_at <= end)
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }
}

#[async_trait]
pub trait WebhookLogStore: Send + Sync {
    async fn insert_log(&self, log: &WebhookLog) -> StoreResult<()>;

    /// Writes the outcome only if the row has not been completed yet.
    async fn complete_log(
        &self,
        id: Uuid,
        outcome: &WebhookOutcome,
        completed_at: DateTime<Utc>,
        duration_ms: i64,
    ) -> StoreResult<bool>;

    /// Newest first.
    async fn list_logs(&self, filter: &WebhookLogFilter) -> StoreResult<Vec<WebhookLog>>;
}

/// Handle returned by [`AuditLogger::begin`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WebhookLogId {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
}

// key: audit-logger -> begin before processing, complete exactly once after
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn WebhookLogStore>,
    clock: Arc<dyn Clock>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn WebhookLogStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn begin(
        &self,
        provider: Provider,
        headers: &HeaderMap,
        body: &str,
    ) -> StoreResult<WebhookLogId> {
        let received_at = self.clock.now();
        let log = WebhookLog {
            id: Uuid::new_v4(),
            provider,
            operation: None,
            request_headers: redact_headers(headers),
            request_body: body.to_string(),
            response_body: None,
            is_successful: false,
            error_code: None,
            billing_transaction_id: None,
            received_at,
            completed_at: None,
            duration_ms: None,
        };
        self.store.insert_log(&log).await?;
        debug!(log_id = %log.id, provider = provider.as_str(), "webhook received");
        Ok(WebhookLogId {
            id: log.id,
            received_at,
        })
    }

    pub async fn complete(&self, handle: WebhookLogId, outcome: WebhookOutcome) -> StoreResult<()> {
        let completed_at = self.clock.now();
        let duration_ms = (completed_at - handle.received_at).num_milliseconds().max(0);
        let written = self
            .store
            .complete_log(handle.id, &outcome, completed_at, duration_ms)
            .await?;
        if !written {
            warn!(log_id = %handle.id, "webhook log already completed; outcome dropped");
        }
        Ok(())
    }

    pub async fn list(&self, filter: &WebhookLogFilter) -> StoreResult<Vec<WebhookLog>> {
        self.store.list_logs(filter).await
    }
}

/// Header map as a JSON object with credentials masked.
pub fn redact_headers(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        let key = name.as_str().to_ascii_lowercase();
        let rendered = if REDACTED_HEADERS.contains(&key.as_str()) {
            REDACTED.to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        map.insert(key, Value::String(rendered));
    }
    Value::Object(map)
}
