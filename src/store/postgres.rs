use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::audit::{WebhookLog, WebhookLogFilter, WebhookLogStore, WebhookOutcome};
use crate::guard::LeaseStore;
use crate::ledger::{
    BillingTransaction, CasExpectation, ClickAction, ClickTransactionState, LedgerStore,
    PaymeCancelReason, PaymeState, PaymeTransactionState, Provider, ProviderExtension,
    StoreError, StoreResult, TransactionStatus,
};

const SELECT_TRANSACTION: &str = r#"
    SELECT
        t.id, t.order_id, t.provider, t.provider_transaction_id, t.amount, t.currency,
        t.status, t.status_code, t.cancel_reason, t.performed_at, t.cancelled_at,
        t.expires_at, t.activation_notified_at, t.deactivation_notified_at,
        t.payload, t.metadata, t.version, t.created_at, t.updated_at,
        p.payme_id, p.payme_time, p.state AS payme_state,
        p.create_time AS payme_create_time, p.perform_time AS payme_perform_time,
        p.cancel_time AS payme_cancel_time, p.reason AS payme_reason,
        c.click_trans_id, c.click_paydoc_id, c.merchant_trans_id, c.merchant_prepare_id,
        c.merchant_confirm_id, c.action AS click_action, c.error_code AS click_error_code,
        c.error_note AS click_error_note, c.prepared_at AS click_prepared_at
    FROM billing_transactions t
    LEFT JOIN billing_payme_transactions p ON p.billing_transaction_id = t.id
    LEFT JOIN billing_click_transactions c ON c.billing_transaction_id = t.id
"#;

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    order_id: String,
    provider: String,
    provider_transaction_id: Option<String>,
    amount: Decimal,
    currency: String,
    status: String,
    status_code: Option<i32>,
    cancel_reason: Option<String>,
    performed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    activation_notified_at: Option<DateTime<Utc>>,
    deactivation_notified_at: Option<DateTime<Utc>>,
    payload: Value,
    metadata: Value,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    payme_id: Option<String>,
    payme_time: Option<i64>,
    payme_state: Option<i16>,
    payme_create_time: Option<i64>,
    payme_perform_time: Option<i64>,
    payme_cancel_time: Option<i64>,
    payme_reason: Option<i16>,
    click_trans_id: Option<i64>,
    click_paydoc_id: Option<i64>,
    merchant_trans_id: Option<String>,
    merchant_prepare_id: Option<i64>,
    merchant_confirm_id: Option<i64>,
    click_action: Option<i16>,
    click_error_code: Option<i32>,
    click_error_note: Option<String>,
    click_prepared_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    fn payme_extension(&self) -> StoreResult<Option<PaymeTransactionState>> {
        let Some(payme_id) = self.payme_id.clone() else {
            return Ok(None);
        };
        let state = self
            .payme_state
            .and_then(PaymeState::from_code)
            .ok_or_else(|| corrupt(self.id, "payme state"))?;
        let reason = match self.payme_reason {
            Some(code) => Some(
                PaymeCancelReason::from_code(code).ok_or_else(|| corrupt(self.id, "payme reason"))?,
            ),
            None => None,
        };
        Ok(Some(PaymeTransactionState {
            payme_id,
            payme_time: self.payme_time.unwrap_or_default(),
            state,
            create_time: self
                .payme_create_time
                .ok_or_else(|| corrupt(self.id, "payme create_time"))?,
            perform_time: self.payme_perform_time,
            cancel_time: self.payme_cancel_time,
            reason,
        }))
    }

    fn click_extension(&self) -> StoreResult<Option<ClickTransactionState>> {
        let Some(click_trans_id) = self.click_trans_id else {
            return Ok(None);
        };
        Ok(Some(ClickTransactionState {
            click_trans_id,
            click_paydoc_id: self.click_paydoc_id,
            merchant_trans_id: self
                .merchant_trans_id
                .clone()
                .ok_or_else(|| corrupt(self.id, "merchant_trans_id"))?,
            merchant_prepare_id: self
                .merchant_prepare_id
                .ok_or_else(|| corrupt(self.id, "merchant_prepare_id"))?,
            merchant_confirm_id: self.merchant_confirm_id,
            action: self
                .click_action
                .and_then(ClickAction::from_code)
                .ok_or_else(|| corrupt(self.id, "click action"))?,
            error_code: self.click_error_code.unwrap_or_default(),
            error_note: self.click_error_note.clone().unwrap_or_default(),
            prepared_at: self
                .click_prepared_at
                .ok_or_else(|| corrupt(self.id, "click prepared_at"))?,
        }))
    }
}

impl TryFrom<TransactionRow> for BillingTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let provider =
            Provider::from_str(&row.provider).ok_or_else(|| corrupt(row.id, "provider"))?;
        let status =
            TransactionStatus::from_str(&row.status).ok_or_else(|| corrupt(row.id, "status"))?;
        let extension = match provider {
            Provider::Payme => row.payme_extension()?.map(ProviderExtension::Payme),
            Provider::Click => row.click_extension()?.map(ProviderExtension::Click),
        };

        Ok(BillingTransaction {
            id: row.id,
            order_id: row.order_id,
            provider,
            provider_transaction_id: row.provider_transaction_id,
            amount: row.amount,
            currency: row.currency,
            status,
            status_code: row.status_code,
            cancel_reason: row.cancel_reason,
            performed_at: row.performed_at,
            cancelled_at: row.cancelled_at,
            expires_at: row.expires_at,
            activation_notified_at: row.activation_notified_at,
            deactivation_notified_at: row.deactivation_notified_at,
            payload: row.payload,
            metadata: row.metadata,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            extension,
        })
    }
}

fn corrupt(id: Uuid, field: &str) -> StoreError {
    StoreError::Corrupt(format!("billing transaction {id}: invalid {field}"))
}

#[derive(Debug, FromRow)]
struct WebhookLogRow {
    id: Uuid,
    provider: String,
    operation: Option<String>,
    request_headers: Value,
    request_body: String,
    response_body: Option<Value>,
    is_successful: bool,
    error_code: Option<i32>,
    billing_transaction_id: Option<Uuid>,
    received_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
}

impl TryFrom<WebhookLogRow> for WebhookLog {
    type Error = StoreError;

    fn try_from(row: WebhookLogRow) -> Result<Self, Self::Error> {
        let provider = Provider::from_str(&row.provider)
            .ok_or_else(|| StoreError::Corrupt(format!("webhook log {}: provider", row.id)))?;
        Ok(WebhookLog {
            id: row.id,
            provider,
            operation: row.operation,
            request_headers: row.request_headers,
            request_body: row.request_body,
            response_body: row.response_body,
            is_successful: row.is_successful,
            error_code: row.error_code,
            billing_transaction_id: row.billing_transaction_id,
            received_at: row.received_at,
            completed_at: row.completed_at,
            duration_ms: row.duration_ms,
        })
    }
}

// key: postgres-store -> sqlx implementation of the ledger, lease and audit stores
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        bind: &str,
    ) -> StoreResult<Option<BillingTransaction>> {
        let sql = format!("{SELECT_TRANSACTION} WHERE {clause}");
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await?;
        row.map(BillingTransaction::try_from).transpose()
    }

    async fn fetch_many(
        &self,
        builder: &mut QueryBuilder<'_, Postgres>,
    ) -> StoreResult<Vec<BillingTransaction>> {
        let rows = builder
            .build_query_as::<TransactionRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(BillingTransaction::try_from).collect()
    }
}

async fn upsert_extension(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: Uuid,
    extension: &ProviderExtension,
) -> StoreResult<()> {
    match extension {
        ProviderExtension::Payme(state) => {
            sqlx::query(
                r#"
                INSERT INTO billing_payme_transactions
                    (billing_transaction_id, payme_id, payme_time, state, create_time,
                     perform_time, cancel_time, reason)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (billing_transaction_id) DO UPDATE SET
                    state = EXCLUDED.state,
                    perform_time = EXCLUDED.perform_time,
                    cancel_time = EXCLUDED.cancel_time,
                    reason = EXCLUDED.reason
                "#,
            )
            .bind(transaction_id)
            .bind(&state.payme_id)
            .bind(state.payme_time)
            .bind(state.state.code())
            .bind(state.create_time)
            .bind(state.perform_time)
            .bind(state.cancel_time)
            .bind(state.reason.map(|reason| reason.code()))
            .execute(&mut *tx)
            .await?;
        }
        ProviderExtension::Click(state) => {
            sqlx::query(
                r#"
                INSERT INTO billing_click_transactions
                    (billing_transaction_id, click_trans_id, click_paydoc_id, merchant_trans_id,
                     merchant_prepare_id, merchant_confirm_id, action, error_code, error_note,
                     prepared_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (billing_transaction_id) DO UPDATE SET
                    click_trans_id = EXCLUDED.click_trans_id,
                    click_paydoc_id = EXCLUDED.click_paydoc_id,
                    merchant_prepare_id = EXCLUDED.merchant_prepare_id,
                    merchant_confirm_id = EXCLUDED.merchant_confirm_id,
                    action = EXCLUDED.action,
                    error_code = EXCLUDED.error_code,
                    error_note = EXCLUDED.error_note,
                    prepared_at = EXCLUDED.prepared_at
                "#,
            )
            .bind(transaction_id)
            .bind(state.click_trans_id)
            .bind(state.click_paydoc_id)
            .bind(&state.merchant_trans_id)
            .bind(state.merchant_prepare_id)
            .bind(state.merchant_confirm_id)
            .bind(state.action.code())
            .bind(state.error_code)
            .bind(&state.error_note)
            .bind(state.prepared_at)
            .execute(&mut *tx)
            .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn insert(&self, transaction: &BillingTransaction) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO billing_transactions
                (id, order_id, provider, provider_transaction_id, amount, currency, status,
                 status_code, cancel_reason, performed_at, cancelled_at, expires_at,
                 payload, metadata, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(transaction.id)
        .bind(&transaction.order_id)
        .bind(transaction.provider.as_str())
        .bind(&transaction.provider_transaction_id)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.status.as_str())
        .bind(transaction.status_code)
        .bind(&transaction.cancel_reason)
        .bind(transaction.performed_at)
        .bind(transaction.cancelled_at)
        .bind(transaction.expires_at)
        .bind(&transaction.payload)
        .bind(&transaction.metadata)
        .bind(transaction.version)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&mut *tx)
        .await?;

        if let Some(extension) = &transaction.extension {
            upsert_extension(&mut tx, transaction.id, extension).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<BillingTransaction>> {
        let sql = format!("{SELECT_TRANSACTION} WHERE t.id = $1");
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(BillingTransaction::try_from).transpose()
    }

    async fn find_by_order_id(&self, order_id: &str) -> StoreResult<Option<BillingTransaction>> {
        self.fetch_one_where("t.order_id = $1", order_id).await
    }

    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_transaction_id: &str,
    ) -> StoreResult<Option<BillingTransaction>> {
        let sql = format!(
            "{SELECT_TRANSACTION} WHERE t.provider = $1 AND t.provider_transaction_id = $2"
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(provider.as_str())
            .bind(provider_transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(BillingTransaction::try_from).transpose()
    }

    async fn compare_and_swap(
        &self,
        expected: CasExpectation,
        next: &BillingTransaction,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE billing_transactions
            SET provider_transaction_id = $4,
                status = $5,
                status_code = $6,
                cancel_reason = $7,
                performed_at = $8,
                cancelled_at = $9,
                expires_at = $10,
                payload = $11,
                metadata = $12,
                version = $13,
                updated_at = $14
            WHERE id = $1 AND version = $2 AND status = $3
            "#,
        )
        .bind(expected.id)
        .bind(expected.version)
        .bind(expected.status.as_str())
        .bind(&next.provider_transaction_id)
        .bind(next.status.as_str())
        .bind(next.status_code)
        .bind(&next.cancel_reason)
        .bind(next.performed_at)
        .bind(next.cancelled_at)
        .bind(next.expires_at)
        .bind(&next.payload)
        .bind(&next.metadata)
        .bind(next.version)
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(extension) = &next.extension {
            upsert_extension(&mut tx, expected.id, extension).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn mark_activation_notified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE billing_transactions
            SET activation_notified_at = $2
            WHERE id = $1 AND activation_notified_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_deactivation_notified(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE billing_transactions
            SET deactivation_notified_at = $2
            WHERE id = $1 AND deactivation_notified_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_payme_by_create_time(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> StoreResult<Vec<BillingTransaction>> {
        let mut builder = QueryBuilder::new(SELECT_TRANSACTION);
        builder.push(" WHERE t.provider = 'payme' AND p.create_time >= ");
        builder.push_bind(from_ms);
        builder.push(" AND p.create_time <= ");
        builder.push_bind(to_ms);
        builder.push(" ORDER BY p.create_time ASC");
        self.fetch_many(&mut builder).await
    }

    async fn list_sweep_candidates(
        &self,
        now: DateTime<Utc>,
        payme_created_before_ms: i64,
        limit: i64,
    ) -> StoreResult<Vec<BillingTransaction>> {
        let mut builder = QueryBuilder::new(SELECT_TRANSACTION);
        builder.push(
            " WHERE t.status IN ('created', 'waiting', 'processing') \
             AND ((t.expires_at < ",
        );
        builder.push_bind(now);
        builder.push(" AND (p.state IS NULL OR p.state <> 1)) OR (p.state = 1 AND p.create_time < ");
        builder.push_bind(payme_created_before_ms);
        builder.push(")) ORDER BY t.created_at ASC LIMIT ");
        builder.push_bind(limit);
        self.fetch_many(&mut builder).await
    }

    async fn list_pending_notifications(
        &self,
        limit: i64,
    ) -> StoreResult<Vec<BillingTransaction>> {
        let mut builder = QueryBuilder::new(SELECT_TRANSACTION);
        builder.push(
            " WHERE (t.status = 'paid' AND t.activation_notified_at IS NULL) \
             OR (t.status = 'refunded' AND t.deactivation_notified_at IS NULL) \
             ORDER BY t.updated_at ASC LIMIT ",
        );
        builder.push_bind(limit);
        self.fetch_many(&mut builder).await
    }

    async fn next_click_prepare_id(&self) -> StoreResult<i64> {
        let id = sqlx::query_scalar::<_, i64>("SELECT nextval('billing_click_prepare_seq')")
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl LeaseStore for PgStore {
    async fn try_acquire(
        &self,
        provider: Provider,
        key: &str,
        holder: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let granted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO billing_leases (provider, lease_key, holder, acquired_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (provider, lease_key) DO UPDATE SET
                holder = EXCLUDED.holder,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at
            WHERE billing_leases.expires_at < EXCLUDED.acquired_at
            RETURNING holder
            "#,
        )
        .bind(provider.as_str())
        .bind(key)
        .bind(holder)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(granted == Some(holder))
    }

    async fn release(&self, provider: Provider, key: &str, holder: Uuid) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM billing_leases WHERE provider = $1 AND lease_key = $2 AND holder = $3",
        )
        .bind(provider.as_str())
        .bind(key)
        .bind(holder)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WebhookLogStore for PgStore {
    async fn insert_log(&self, log: &WebhookLog) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_webhook_logs
                (id, provider, operation, request_headers, request_body, response_body,
                 is_successful, error_code, billing_transaction_id, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(log.id)
        .bind(log.provider.as_str())
        .bind(&log.operation)
        .bind(&log.request_headers)
        .bind(&log.request_body)
        .bind(&log.response_body)
        .bind(log.is_successful)
        .bind(log.error_code)
        .bind(log.billing_transaction_id)
        .bind(log.received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_log(
        &self,
        id: Uuid,
        outcome: &WebhookOutcome,
        completed_at: DateTime<Utc>,
        duration_ms: i64,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE billing_webhook_logs
            SET operation = COALESCE($2, operation),
                response_body = $3,
                is_successful = $4,
                error_code = $5,
                billing_transaction_id = $6,
                completed_at = $7,
                duration_ms = $8
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(&outcome.operation)
        .bind(&outcome.response_body)
        .bind(outcome.is_successful)
        .bind(outcome.error_code)
        .bind(outcome.billing_transaction_id)
        .bind(completed_at)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_logs(&self, filter: &WebhookLogFilter) -> StoreResult<Vec<WebhookLog>> {
        let mut builder = QueryBuilder::new(
            "SELECT id, provider, operation, request_headers, request_body, response_body, \
             is_successful, error_code, billing_transaction_id, received_at, completed_at, \
             duration_ms FROM billing_webhook_logs WHERE 1 = 1",
        );

        if let Some(provider) = filter.provider {
            builder.push(" AND provider = ");
            builder.push_bind(provider.as_str());
        }

        if let Some(successful) = filter.successful {
            builder.push(" AND is_successful = ");
            builder.push_bind(successful);
        }

        if let Some(transaction_id) = filter.billing_transaction_id {
            builder.push(" AND billing_transaction_id = ");
            builder.push_bind(transaction_id);
        }

        if let Some(start) = filter.start {
            builder.push(" AND received_at >= ");
            builder.push_bind(start);
        }

        if let Some(end) = filter.end {
            builder.push(" AND received_at <= ");
            builder.push_bind(end);
        }

        builder.push(" ORDER BY received_at DESC LIMIT ");
        builder.push_bind(filter.effective_limit());

        let rows = builder
            .build_query_as::<WebhookLogRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WebhookLog::try_from).collect()
    }
}
