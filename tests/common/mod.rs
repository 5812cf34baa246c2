#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use billing_engine::checkout::{self, CreateOrder};
use billing_engine::clock::ManualClock;
use billing_engine::collaborator::{
    Activation, CollaboratorError, Deactivation, PayableOrder, SubscriptionCollaborator,
};
use billing_engine::config::{
    CheckoutConfig, ClickConfig, EngineConfig, LeaseConfig, PaymeConfig,
};
use billing_engine::ledger::{BillingTransaction, Provider};
use billing_engine::signature::{click_sign, ClickSignInput};
use billing_engine::store::Stores;
use billing_engine::BillingEngine;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;

pub const PAYME_KEY: &str = "payme-test-key";
pub const CLICK_SECRET: &str = "click-secret";
pub const CLICK_SERVICE_ID: i64 = 777;
pub const OPERATOR_TOKEN: &str = "operator-test-token";

/// Subscription side double that counts every activation and deactivation.
#[derive(Default)]
pub struct CountingCollaborator {
    orders: Mutex<HashMap<String, PayableOrder>>,
    pub activations: AtomicUsize,
    pub deactivations: AtomicUsize,
    pub fail_activations: AtomicBool,
    /// Holds every activation call open for this many milliseconds.
    pub activation_delay_ms: AtomicU64,
}

impl CountingCollaborator {
    pub fn register(&self, order_id: &str, amount: Decimal) {
        self.orders.lock().unwrap().insert(
            order_id.to_string(),
            PayableOrder {
                amount,
                currency: "UZS".into(),
                is_paid: false,
                is_expired: false,
            },
        );
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriptionCollaborator for CountingCollaborator {
    async fn lookup_payable_order(
        &self,
        order_id: &str,
    ) -> Result<Option<PayableOrder>, CollaboratorError> {
        Ok(self.orders.lock().unwrap().get(order_id).cloned())
    }

    async fn activate_subscription(
        &self,
        _order_id: &str,
        _payment_ref: &str,
    ) -> Result<Activation, CollaboratorError> {
        let delay = self.activation_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_activations.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(Activation::Activated)
    }

    async fn deactivate_subscription(
        &self,
        _order_id: &str,
        _payment_ref: &str,
    ) -> Result<Deactivation, CollaboratorError> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        Ok(Deactivation::Deactivated)
    }
}

pub fn config() -> EngineConfig {
    EngineConfig {
        payme: PaymeConfig {
            login: "Paycom".into(),
            merchant_key: PAYME_KEY.into(),
            merchant_id: "merchant-123".into(),
            transaction_timeout_ms: 43_200_000,
            checkout_url: "https://checkout.paycom.uz".into(),
        },
        click: ClickConfig {
            service_id: CLICK_SERVICE_ID,
            merchant_id: "555".into(),
            secret_key: CLICK_SECRET.into(),
            prepare_ttl_secs: 1800,
            checkout_url: "https://my.click.uz/services/pay".into(),
        },
        lease: LeaseConfig {
            ttl_secs: 30,
            retry_base: Duration::from_millis(1),
            retry_cap: Duration::from_millis(10),
            retry_attempts: 200,
        },
        checkout: CheckoutConfig {
            order_prefix: "BP".into(),
            currency: "UZS".into(),
            order_ttl_hours: 24,
            return_url: None,
        },
        sweep_batch_size: 100,
        operator_token: Some(OPERATOR_TOKEN.into()),
    }
}

pub struct Harness {
    pub engine: BillingEngine,
    pub clock: Arc<ManualClock>,
    pub collaborator: Arc<CountingCollaborator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stores(Stores::memory())
    }

    pub fn with_stores(stores: Stores) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let collaborator = Arc::new(CountingCollaborator::default());
        let engine = BillingEngine::new(
            config(),
            stores,
            collaborator.clone(),
            clock.clone(),
        );
        Self {
            engine,
            clock,
            collaborator,
        }
    }

    /// Creates a checkout order and makes it payable on the subscription side.
    pub async fn open_order(&self, provider: Provider, amount: Decimal) -> BillingTransaction {
        let order = checkout::create_order(
            &self.engine,
            CreateOrder {
                provider,
                amount,
                currency: None,
                metadata: json!({"plan": "pro"}),
            },
        )
        .await
        .unwrap();
        self.collaborator.register(&order.order_id, amount);
        order
    }

    pub async fn reload(&self, order_id: &str) -> BillingTransaction {
        self.engine
            .ledger()
            .find_by_order_id(order_id)
            .await
            .unwrap()
            .expect("order row")
    }
}

pub fn payme_auth() -> String {
    format!("Basic {}", STANDARD.encode(format!("Paycom:{PAYME_KEY}")))
}

/// Form-encoded Click callback with a valid sign string.
pub fn click_form(
    action: i16,
    click_trans_id: i64,
    merchant_trans_id: &str,
    merchant_prepare_id: Option<i64>,
    amount: &str,
    error: i32,
) -> String {
    let click_trans_id = click_trans_id.to_string();
    let service_id = CLICK_SERVICE_ID.to_string();
    let prepare_id = merchant_prepare_id.map(|id| id.to_string());
    let action = action.to_string();
    let sign_time = "2024-01-01 12:00:00";
    let sign = click_sign(
        &ClickSignInput {
            click_trans_id: &click_trans_id,
            service_id: &service_id,
            merchant_trans_id,
            merchant_prepare_id: prepare_id.as_deref(),
            amount,
            action: &action,
            sign_time,
        },
        CLICK_SECRET,
    );

    let error = error.to_string();
    let mut fields = vec![
        ("click_trans_id", click_trans_id.as_str()),
        ("service_id", service_id.as_str()),
        ("click_paydoc_id", "9001"),
        ("merchant_trans_id", merchant_trans_id),
        ("amount", amount),
        ("action", action.as_str()),
        ("error", error.as_str()),
        ("error_note", "Success"),
        ("sign_time", sign_time),
        ("sign_string", sign.as_str()),
    ];
    if let Some(prepare_id) = prepare_id.as_deref() {
        fields.push(("merchant_prepare_id", prepare_id));
    }
    serde_urlencoded::to_string(&fields).unwrap()
}
