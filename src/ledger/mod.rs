pub mod models;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

pub use models::{
    validate_transition, BillingTransaction, ClickAction, ClickTransactionState,
    PaymeCancelReason, PaymeState, PaymeTransactionState, Provider, ProviderExtension,
    TransactionStatus, TransitionError,
};
pub use store::{CasExpectation, LedgerStore, StoreError, StoreResult};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// key: ledger -> validated writes over a `LedgerStore`
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn insert(&self, transaction: &BillingTransaction) -> Result<(), LedgerError> {
        self.store.insert(transaction).await?;
        Ok(())
    }

    pub async fn find_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<BillingTransaction>, LedgerError> {
        Ok(self.store.find_by_order_id(order_id).await?)
    }

    pub async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_transaction_id: &str,
    ) -> Result<Option<BillingTransaction>, LedgerError> {
        Ok(self
            .store
            .find_by_provider_id(provider, provider_transaction_id)
            .await?)
    }

    /// Moves `current` to `next` after checking the edge is legal. The write is a
    /// compare-and-swap on `(id, version, status)`; losing it yields `StaleWrite`.
    pub async fn apply(
        &self,
        current: &BillingTransaction,
        mut next: BillingTransaction,
        now: DateTime<Utc>,
    ) -> Result<BillingTransaction, LedgerError> {
        validate_transition(current, &next)?;

        next.version = current.version + 1;
        next.updated_at = now;
        next.activation_notified_at = current.activation_notified_at;
        next.deactivation_notified_at = current.deactivation_notified_at;

        let swapped = self
            .store
            .compare_and_swap(CasExpectation::from(current), &next)
            .await?;
        if !swapped {
            return Err(StoreError::StaleWrite(current.id).into());
        }

        debug!(
            order_id = %next.order_id,
            provider = next.provider.as_str(),
            from = current.status.as_str(),
            to = next.status.as_str(),
            version = next.version,
            "ledger transition applied"
        );
        Ok(next)
    }
}
