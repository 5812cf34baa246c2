use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::{WebhookLog, WebhookLogFilter, WebhookLogStore, WebhookOutcome};
use crate::guard::LeaseStore;
use crate::ledger::{
    BillingTransaction, CasExpectation, LedgerStore, PaymeState, Provider, StoreError,
    StoreResult, TransactionStatus,
};

#[derive(Default)]
struct LedgerTables {
    rows: HashMap<Uuid, BillingTransaction>,
    by_order: HashMap<String, Uuid>,
    by_provider: HashMap<(Provider, String), Uuid>,
}

impl LedgerTables {
    fn claim_provider_id(
        &mut self,
        transaction: &BillingTransaction,
    ) -> StoreResult<()> {
        if let Some(provider_id) = &transaction.provider_transaction_id {
            let key = (transaction.provider, provider_id.clone());
            match self.by_provider.get(&key) {
                Some(owner) if *owner != transaction.id => {
                    return Err(StoreError::UniqueViolation(
                        "billing_transactions_provider_transaction_id_key".into(),
                    ));
                }
                _ => {
                    self.by_provider.insert(key, transaction.id);
                }
            }
        }
        Ok(())
    }
}

struct LeaseRow {
    holder: Uuid,
    expires_at: DateTime<Utc>,
}

// key: memory-store -> in-process ledger, leases and webhook log
///
/// The ledger mutex stands in for Postgres row atomicity; every write is
/// still a compare-and-swap on `(id, version, status)`.
pub struct MemoryStore {
    ledger: Mutex<LedgerTables>,
    leases: DashMap<(Provider, String), LeaseRow>,
    logs: Mutex<Vec<WebhookLog>>,
    prepare_seq: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(LedgerTables::default()),
            leases: DashMap::new(),
            logs: Mutex::new(Vec::new()),
            prepare_seq: AtomicI64::new(0),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert(&self, transaction: &BillingTransaction) -> StoreResult<()> {
        let mut tables = self.ledger.lock().await;
        if tables.rows.contains_key(&transaction.id) {
            return Err(StoreError::UniqueViolation("billing_transactions_pkey".into()));
        }
        if tables.by_order.contains_key(&transaction.order_id) {
            return Err(StoreError::UniqueViolation(
                "billing_transactions_order_id_key".into(),
            ));
        }
        tables.claim_provider_id(transaction)?;
        tables
            .by_order
            .insert(transaction.order_id.clone(), transaction.id);
        tables.rows.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<BillingTransaction>> {
        Ok(self.ledger.lock().await.rows.get(&id).cloned())
    }

    async fn find_by_order_id(&self, order_id: &str) -> StoreResult<Option<BillingTransaction>> {
        let tables = self.ledger.lock().await;
        Ok(tables
            .by_order
            .get(order_id)
            .and_then(|id| tables.rows.get(id))
            .cloned())
    }

    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_transaction_id: &str,
    ) -> StoreResult<Option<BillingTransaction>> {
        let tables = self.ledger.lock().await;
        Ok(tables
            .by_provider
            .get(&(provider, provider_transaction_id.to_string()))
            .and_then(|id| tables.rows.get(id))
            .cloned())
    }

    async fn compare_and_swap(
        &self,
        expected: CasExpectation,
        next: &BillingTransaction,
    ) -> StoreResult<bool> {
        let mut tables = self.ledger.lock().await;
        let (activation, deactivation, previous_provider_id) = match tables.rows.get(&expected.id) {
            Some(row) if row.version == expected.version && row.status == expected.status => (
                row.activation_notified_at,
                row.deactivation_notified_at,
                row.provider_transaction_id.clone(),
            ),
            _ => return Ok(false),
        };
        tables.claim_provider_id(next)?;
        if let Some(previous) = previous_provider_id {
            if next.provider_transaction_id.as_ref() != Some(&previous) {
                tables.by_provider.remove(&(next.provider, previous));
            }
        }

        let mut stored = next.clone();
        stored.activation_notified_at = activation;
        stored.deactivation_notified_at = deactivation;
        tables.rows.insert(expected.id, stored);
        Ok(true)
    }

    async fn mark_activation_notified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut tables = self.ledger.lock().await;
        match tables.rows.get_mut(&id) {
            Some(row) if row.activation_notified_at.is_none() => {
                row.activation_notified_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_deactivation_notified(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.ledger.lock().await;
        match tables.rows.get_mut(&id) {
            Some(row) if row.deactivation_notified_at.is_none() => {
                row.deactivation_notified_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_payme_by_create_time(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> StoreResult<Vec<BillingTransaction>> {
        let tables = self.ledger.lock().await;
        let mut rows: Vec<BillingTransaction> = tables
            .rows
            .values()
            .filter(|row| {
                row.payme_state()
                    .map_or(false, |state| (from_ms..=to_ms).contains(&state.create_time))
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.payme_state().map(|state| state.create_time));
        Ok(rows)
    }

    async fn list_sweep_candidates(
        &self,
        now: DateTime<Utc>,
        payme_created_before_ms: i64,
        limit: i64,
    ) -> StoreResult<Vec<BillingTransaction>> {
        let tables = self.ledger.lock().await;
        let mut rows: Vec<BillingTransaction> = tables
            .rows
            .values()
            .filter(|row| row.status.is_pending())
            .filter(|row| match row.payme_state() {
                Some(state) if state.state == PaymeState::Created => {
                    state.create_time < payme_created_before_ms
                }
                _ => row.expires_at < now,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.created_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_pending_notifications(
        &self,
        limit: i64,
    ) -> StoreResult<Vec<BillingTransaction>> {
        let tables = self.ledger.lock().await;
        let mut rows: Vec<BillingTransaction> = tables
            .rows
            .values()
            .filter(|row| match row.status {
                TransactionStatus::Paid => row.activation_notified_at.is_none(),
                TransactionStatus::Refunded => row.deactivation_notified_at.is_none(),
                _ => false,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.updated_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn next_click_prepare_id(&self) -> StoreResult<i64> {
        Ok(self.prepare_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn try_acquire(
        &self,
        provider: Provider,
        key: &str,
        holder: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        match self.leases.entry((provider, key.to_string())) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at < now {
                    entry.insert(LeaseRow { holder, expires_at });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(LeaseRow { holder, expires_at });
                Ok(true)
            }
        }
    }

    async fn release(&self, provider: Provider, key: &str, holder: Uuid) -> StoreResult<()> {
        self.leases
            .remove_if(&(provider, key.to_string()), |_, row| row.holder == holder);
        Ok(())
    }
}

#[async_trait]
impl WebhookLogStore for MemoryStore {
    async fn insert_log(&self, log: &WebhookLog) -> StoreResult<()> {
        let mut logs = self.logs.lock().await;
        if logs.iter().any(|existing| existing.id == log.id) {
            return Err(StoreError::UniqueViolation("billing_webhook_logs_pkey".into()));
        }
        logs.push(log.clone());
        Ok(())
    }

    async fn complete_log(
        &self,
        id: Uuid,
        outcome: &WebhookOutcome,
        completed_at: DateTime<Utc>,
        duration_ms: i64,
    ) -> StoreResult<bool> {
        let mut logs = self.logs.lock().await;
        match logs
            .iter_mut()
            .find(|log| log.id == id && log.completed_at.is_none())
        {
            Some(log) => {
                if outcome.operation.is_some() {
                    log.operation = outcome.operation.clone();
                }
                log.response_body = Some(outcome.response_body.clone());
                log.is_successful = outcome.is_successful;
                log.error_code = outcome.error_code;
                log.billing_transaction_id = outcome.billing_transaction_id;
                log.completed_at = Some(completed_at);
                log.duration_ms = Some(duration_ms);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_logs(&self, filter: &WebhookLogFilter) -> StoreResult<Vec<WebhookLog>> {
        let logs = self.logs.lock().await;
        let mut matched: Vec<WebhookLog> = logs
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        matched.truncate(filter.effective_limit() as usize);
        Ok(matched)
    }
}
