//! Backends for the ledger, lease and webhook log stores.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use crate::audit::WebhookLogStore;
use crate::guard::LeaseStore;
use crate::ledger::LedgerStore;

/// One backend seen through the three store seams.
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn LedgerStore>,
    pub leases: Arc<dyn LeaseStore>,
    pub logs: Arc<dyn WebhookLogStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self::from_backend(Arc::new(memory::MemoryStore::new()))
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self::from_backend(Arc::new(postgres::PgStore::new(pool)))
    }

    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: LedgerStore + LeaseStore + WebhookLogStore + 'static,
    {
        Self {
            ledger: backend.clone(),
            leases: backend.clone(),
            logs: backend,
        }
    }
}
