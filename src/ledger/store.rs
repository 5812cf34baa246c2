use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::{BillingTransaction, Provider, TransactionStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("stale write for transaction {0}")]
    StaleWrite(Uuid),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &error {
            if db.code().as_deref() == Some("23505") {
                let constraint = db.constraint().unwrap_or("unknown").to_string();
                return StoreError::UniqueViolation(constraint);
            }
        }
        StoreError::Database(error)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The row state a compare-and-swap expects to find.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CasExpectation {
    pub id: Uuid,
    pub version: i64,
    pub status: TransactionStatus,
}

impl From<&BillingTransaction> for CasExpectation {
    fn from(transaction: &BillingTransaction) -> Self {
        Self {
            id: transaction.id,
            version: transaction.version,
            status: transaction.status,
        }
    }
}

// key: ledger-store -> persistence seam for billing transactions
///
/// Notification markers are owned by the `mark_*` operations; `compare_and_swap`
/// leaves them untouched.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert(&self, transaction: &BillingTransaction) -> StoreResult<()>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<BillingTransaction>>;

    async fn find_by_order_id(&self, order_id: &str) -> StoreResult<Option<BillingTransaction>>;

    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_transaction_id: &str,
    ) -> StoreResult<Option<BillingTransaction>>;

    /// Writes `next` only when the stored row still matches `expected`.
    /// Returns `false` when another writer got there first.
    async fn compare_and_swap(
        &self,
        expected: CasExpectation,
        next: &BillingTransaction,
    ) -> StoreResult<bool>;

    /// Sets `activation_notified_at` if it is still unset.
    async fn mark_activation_notified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Sets `deactivation_notified_at` if it is still unset.
    async fn mark_deactivation_notified(&self, id: Uuid, at: DateTime<Utc>)
        -> StoreResult<bool>;

    /// Payme transactions whose `create_time` lies in `[from_ms, to_ms]`, ordered by it.
    async fn list_payme_by_create_time(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> StoreResult<Vec<BillingTransaction>>;

    /// Pending rows that are past `expires_at`, plus Payme state-1 rows created
    /// before `payme_created_before_ms`.
    async fn list_sweep_candidates(
        &self,
        now: DateTime<Utc>,
        payme_created_before_ms: i64,
        limit: i64,
    ) -> StoreResult<Vec<BillingTransaction>>;

    /// Paid rows missing an activation marker and refunded rows missing a
    /// deactivation marker.
    async fn list_pending_notifications(&self, limit: i64)
        -> StoreResult<Vec<BillingTransaction>>;

    async fn next_click_prepare_id(&self) -> StoreResult<i64>;
}
