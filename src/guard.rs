use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::LeaseConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{Provider, StoreResult};

// key: idempotency-guard-store -> constraint-backed lease rows
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Inserts the lease, or takes over a row whose `expires_at` is before `now`.
    async fn try_acquire(
        &self,
        provider: Provider,
        key: &str,
        holder: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Deletes the lease if `holder` still owns it.
    async fn release(&self, provider: Provider, key: &str, holder: Uuid) -> StoreResult<()>;
}

/// Exclusive right to mutate one order until released or expired.
pub struct Lease {
    provider: Provider,
    key: String,
    holder: Uuid,
    store: Arc<dyn LeaseStore>,
}

impl Lease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder(&self) -> Uuid {
        self.holder
    }

    pub async fn release(self) -> StoreResult<()> {
        self.store
            .release(self.provider, &self.key, self.holder)
            .await
    }
}

pub enum Acquisition {
    Acquired(Lease),
    AlreadyProcessing,
}

// key: idempotency-guard -> linearizes every mutation of an order
#[derive(Clone)]
pub struct IdempotencyGuard {
    leases: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    config: LeaseConfig,
}

impl IdempotencyGuard {
    pub fn new(leases: Arc<dyn LeaseStore>, clock: Arc<dyn Clock>, config: LeaseConfig) -> Self {
        Self {
            leases,
            clock,
            config,
        }
    }

    /// Single attempt, no waiting.
    pub async fn acquire(&self, provider: Provider, key: &str) -> StoreResult<Acquisition> {
        let holder = Uuid::new_v4();
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::seconds(self.config.ttl_secs);
        let acquired = self
            .leases
            .try_acquire(provider, key, holder, now, expires_at)
            .await?;
        if !acquired {
            return Ok(Acquisition::AlreadyProcessing);
        }
        Ok(Acquisition::Acquired(Lease {
            provider,
            key: key.to_string(),
            holder,
            store: self.leases.clone(),
        }))
    }

    /// Retries with capped exponential backoff; exhaustion is `AlreadyProcessing`.
    pub async fn acquire_with_backoff(&self, provider: Provider, key: &str) -> EngineResult<Lease> {
        let mut delay = self.config.retry_base;
        for attempt in 0..=self.config.retry_attempts {
            match self.acquire(provider, key).await? {
                Acquisition::Acquired(lease) => return Ok(lease),
                Acquisition::AlreadyProcessing if attempt < self.config.retry_attempts => {
                    debug!(
                        provider = provider.as_str(),
                        key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "lease busy, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, self.config.retry_cap);
                }
                Acquisition::AlreadyProcessing => break,
            }
        }
        warn!(
            provider = provider.as_str(),
            key, "lease retries exhausted"
        );
        Err(EngineError::AlreadyProcessing(key.to_string()))
    }

    /// Runs `work` while holding the lease on `key`. The lease is released
    /// whether `work` succeeds or fails.
    pub async fn run<T, F, Fut>(&self, provider: Provider, key: &str, work: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let lease = self.acquire_with_backoff(provider, key).await?;
        let outcome = work().await;
        let holder = lease.holder();
        if let Err(err) = lease.release().await {
            warn!(
                ?err,
                provider = provider.as_str(),
                key,
                %holder,
                "failed to release lease; it will expire"
            );
        }
        outcome
    }
}

fn next_delay(current: Duration, cap: Duration) -> Duration {
    current.saturating_mul(2).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::test_config;
    use crate::store::memory::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn guard(clock: Arc<ManualClock>) -> IdempotencyGuard {
        let store = Arc::new(MemoryStore::new());
        IdempotencyGuard::new(store, clock, test_config().lease)
    }

    #[tokio::test]
    async fn second_acquire_sees_already_processing() {
        let guard = guard(Arc::new(ManualClock::new(Utc::now())));
        let first = match guard.acquire(Provider::Payme, "BP1").await.expect("acquire") {
            Acquisition::Acquired(lease) => lease,
            Acquisition::AlreadyProcessing => panic!("first acquire must win"),
        };
        assert!(matches!(
            guard.acquire(Provider::Payme, "BP1").await.expect("acquire"),
            Acquisition::AlreadyProcessing
        ));
        assert!(matches!(
            guard.acquire(Provider::Payme, "BP2").await.expect("acquire"),
            Acquisition::Acquired(_)
        ));

        first.release().await.expect("release");
        assert!(matches!(
            guard.acquire(Provider::Payme, "BP1").await.expect("acquire"),
            Acquisition::Acquired(_)
        ));
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let guard = guard(clock.clone());
        let _stuck = guard.acquire(Provider::Click, "BP1").await.expect("acquire");
        clock.advance(chrono::Duration::seconds(31));
        assert!(matches!(
            guard.acquire(Provider::Click, "BP1").await.expect("acquire"),
            Acquisition::Acquired(_)
        ));
    }

    #[tokio::test]
    async fn exhausted_backoff_reports_already_processing() {
        let guard = guard(Arc::new(ManualClock::new(Utc::now())));
        let _held = guard.acquire(Provider::Payme, "BP1").await.expect("acquire");
        let err = guard
            .acquire_with_backoff(Provider::Payme, "BP1")
            .await
            .err()
            .expect("held lease must not be granted");
        assert!(matches!(err, EngineError::AlreadyProcessing(key) if key == "BP1"));
    }

    #[tokio::test]
    async fn run_releases_after_failure() {
        let guard = guard(Arc::new(ManualClock::new(Utc::now())));
        let calls = AtomicUsize::new(0);
        let failed: EngineResult<()> = guard
            .run(Provider::Payme, "BP1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::AlreadyProcessing("inner".into()))
            })
            .await;
        assert!(failed.is_err());

        let value = guard
            .run(Provider::Payme, "BP1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await
            .expect("lease must be free again");
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_is_capped() {
        let cap = Duration::from_millis(100);
        assert_eq!(next_delay(Duration::from_millis(25), cap), Duration::from_millis(50));
        assert_eq!(next_delay(Duration::from_millis(80), cap), cap);
    }
}
