use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::audit::AuditLogger;
use crate::click::ClickService;
use crate::clock::Clock;
use crate::collaborator::SubscriptionCollaborator;
use crate::config::EngineConfig;
use crate::error::{EngineResult, ValidationFailure};
use crate::guard::IdempotencyGuard;
use crate::ledger::{BillingTransaction, Ledger, Provider, TransactionStatus};
use crate::notifier::Notifier;
use crate::payme::PaymeService;
use crate::store::Stores;

// key: billing-engine -> shared context handed to adapters, router and sweep
#[derive(Clone)]
pub struct BillingEngine {
    config: Arc<EngineConfig>,
    ledger: Ledger,
    guard: IdempotencyGuard,
    audit: AuditLogger,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl BillingEngine {
    pub fn new(
        config: EngineConfig,
        stores: Stores,
        collaborator: Arc<dyn SubscriptionCollaborator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = IdempotencyGuard::new(stores.leases, clock.clone(), config.lease.clone());
        Self {
            config: Arc::new(config),
            ledger: Ledger::new(stores.ledger.clone()),
            guard,
            audit: AuditLogger::new(stores.logs, clock.clone()),
            notifier: Notifier::new(stores.ledger, collaborator, clock.clone()),
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn payme(&self) -> PaymeService {
        PaymeService::new(self.clone())
    }

    pub fn click(&self) -> ClickService {
        ClickService::new(self.clone())
    }

    /// Loads the ledger row for `order_id` if it belongs to `provider`.
    pub async fn load_order(
        &self,
        provider: Provider,
        order_id: &str,
    ) -> EngineResult<BillingTransaction> {
        match self.ledger.find_by_order_id(order_id).await? {
            Some(order) if order.provider == provider => Ok(order),
            _ => Err(ValidationFailure::OrderNotFound.into()),
        }
    }

    /// Rejects orders that can no longer take a payment.
    pub fn ensure_open(&self, order: &BillingTransaction) -> EngineResult<()> {
        match order.status {
            TransactionStatus::Paid | TransactionStatus::Refunded => {
                Err(ValidationFailure::AlreadyPaid.into())
            }
            TransactionStatus::Cancelled | TransactionStatus::Failed => {
                Err(ValidationFailure::Cancelled.into())
            }
            _ if order.is_expired(self.now()) => Err(ValidationFailure::Expired.into()),
            _ => Ok(()),
        }
    }

    /// Asks the subscription side whether the order is still payable at the
    /// ledger amount.
    pub async fn confirm_payable(&self, order: &BillingTransaction) -> EngineResult<()> {
        let payable = self
            .notifier
            .collaborator()
            .lookup_payable_order(&order.order_id)
            .await?
            .ok_or(ValidationFailure::OrderNotFound)?;
        if payable.is_paid {
            return Err(ValidationFailure::AlreadyPaid.into());
        }
        if payable.is_expired {
            return Err(ValidationFailure::Expired.into());
        }
        if payable.amount != order.amount {
            return Err(ValidationFailure::AmountMismatch {
                expected: order.amount,
                received: payable.amount,
            }
            .into());
        }
        Ok(())
    }
}
