use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::collaborator::SubscriptionCollaborator;
use crate::ledger::{BillingTransaction, LedgerStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Collaborator answered and the marker was written by this call.
    Delivered,
    /// The marker was already set; the collaborator was not called again.
    AlreadyRecorded,
    /// Left for the sweep to redeliver.
    Failed,
}

// key: business-effect-notifier -> activation/deactivation with durable markers
#[derive(Clone)]
pub struct Notifier {
    ledger: Arc<dyn LedgerStore>,
    collaborator: Arc<dyn SubscriptionCollaborator>,
    clock: Arc<dyn Clock>,
}

impl Notifier {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        collaborator: Arc<dyn SubscriptionCollaborator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            collaborator,
            clock,
        }
    }

    pub fn collaborator(&self) -> &Arc<dyn SubscriptionCollaborator> {
        &self.collaborator
    }

    pub async fn activate(&self, transaction: &BillingTransaction) -> NotifyOutcome {
        if transaction.activation_notified_at.is_some() {
            return NotifyOutcome::AlreadyRecorded;
        }
        let payment_ref = transaction.payment_ref();
        let activation = match self
            .collaborator
            .activate_subscription(&transaction.order_id, &payment_ref)
            .await
        {
            Ok(activation) => activation,
            Err(err) => {
                warn!(
                    ?err,
                    order_id = %transaction.order_id,
                    provider = transaction.provider.as_str(),
                    "subscription activation failed; sweep will retry"
                );
                return NotifyOutcome::Failed;
            }
        };

        match self
            .ledger
            .mark_activation_notified(transaction.id, self.clock.now())
            .await
        {
            Ok(true) => {
                info!(
                    order_id = %transaction.order_id,
                    provider = transaction.provider.as_str(),
                    payment_ref = %payment_ref,
                    ?activation,
                    "subscription activated"
                );
                NotifyOutcome::Delivered
            }
            Ok(false) => NotifyOutcome::AlreadyRecorded,
            Err(err) => {
                warn!(
                    ?err,
                    order_id = %transaction.order_id,
                    "activation delivered but marker write failed"
                );
                NotifyOutcome::Failed
            }
        }
    }

    pub async fn deactivate(&self, transaction: &BillingTransaction) -> NotifyOutcome {
        if transaction.deactivation_notified_at.is_some() {
            return NotifyOutcome::AlreadyRecorded;
        }
        let payment_ref = transaction.payment_ref();
        let deactivation = match self
            .collaborator
            .deactivate_subscription(&transaction.order_id, &payment_ref)
            .await
        {
            Ok(deactivation) => deactivation,
            Err(err) => {
                warn!(
                    ?err,
                    order_id = %transaction.order_id,
                    provider = transaction.provider.as_str(),
                    "subscription deactivation failed; sweep will retry"
                );
                return NotifyOutcome::Failed;
            }
        };

        match self
            .ledger
            .mark_deactivation_notified(transaction.id, self.clock.now())
            .await
        {
            Ok(true) => {
                info!(
                    order_id = %transaction.order_id,
                    provider = transaction.provider.as_str(),
                    payment_ref = %payment_ref,
                    ?deactivation,
                    "subscription deactivated"
                );
                NotifyOutcome::Delivered
            }
            Ok(false) => NotifyOutcome::AlreadyRecorded,
            Err(err) => {
                warn!(
                    ?err,
                    order_id = %transaction.order_id,
                    "deactivation delivered but marker write failed"
                );
                NotifyOutcome::Failed
            }
        }
    }
}
