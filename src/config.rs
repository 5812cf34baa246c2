use once_cell::sync::Lazy;
use std::fs;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| read_flag("ALLOW_MIGRATION_FAILURE"));

/// Ledger backend: `postgres` (default) or `memory` for local development.
pub static BILLING_STORE: Lazy<String> = Lazy::new(|| {
    read_optional_env("BILLING_STORE")
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| "postgres".to_string())
});

// key: payme-config -> Basic auth login, always `Paycom` in production
pub static PAYME_LOGIN: Lazy<String> =
    Lazy::new(|| read_optional_env("PAYME_LOGIN").unwrap_or_else(|| "Paycom".to_string()));

/// Merchant key issued by Payme. `PAYME_MERCHANT_KEY_FILE` takes precedence.
pub static PAYME_MERCHANT_KEY: Lazy<Option<String>> =
    Lazy::new(|| read_secret_env("PAYME_MERCHANT_KEY", "PAYME_MERCHANT_KEY_FILE"));

pub static PAYME_MERCHANT_ID: Lazy<String> =
    Lazy::new(|| read_optional_env("PAYME_MERCHANT_ID").unwrap_or_default());

// key: payme-config -> state-1 lifetime, 12 hours unless overridden
pub static PAYME_TRANSACTION_TIMEOUT_MS: Lazy<i64> = Lazy::new(|| {
    std::env::var("PAYME_TRANSACTION_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(43_200_000)
});

pub static PAYME_CHECKOUT_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("PAYME_CHECKOUT_URL")
        .unwrap_or_else(|| "https://checkout.paycom.uz".to_string())
});

pub static CLICK_SERVICE_ID: Lazy<Option<i64>> = Lazy::new(|| {
    read_optional_env("CLICK_SERVICE_ID").and_then(|value| value.parse::<i64>().ok())
});

pub static CLICK_MERCHANT_ID: Lazy<String> =
    Lazy::new(|| read_optional_env("CLICK_MERCHANT_ID").unwrap_or_default());

/// Shared secret mixed into the Click sign string. `CLICK_SECRET_KEY_FILE` takes precedence.
pub static CLICK_SECRET_KEY: Lazy<Option<String>> =
    Lazy::new(|| read_secret_env("CLICK_SECRET_KEY", "CLICK_SECRET_KEY_FILE"));

// key: click-config -> how long a Prepare stays completable
pub static CLICK_PREPARE_TTL_SECS: Lazy<i64> = Lazy::new(|| {
    std::env::var("CLICK_PREPARE_TTL_SECS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(1800)
});

pub static CLICK_CHECKOUT_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("CLICK_CHECKOUT_URL")
        .unwrap_or_else(|| "https://my.click.uz/services/pay".to_string())
});

// key: billing-config -> order id prefix
pub static BILLING_ORDER_PREFIX: Lazy<String> =
    Lazy::new(|| read_optional_env("BILLING_ORDER_PREFIX").unwrap_or_else(|| "BP".to_string()));

pub static BILLING_CURRENCY: Lazy<String> =
    Lazy::new(|| read_optional_env("BILLING_CURRENCY").unwrap_or_else(|| "UZS".to_string()));

// key: billing-config -> lifetime of an unpaid order
pub static BILLING_ORDER_TTL_HOURS: Lazy<i64> = Lazy::new(|| {
    std::env::var("BILLING_ORDER_TTL_HOURS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(24)
});

/// Page the payer is sent back to after checkout; `?order_id=` is appended.
pub static BILLING_RETURN_URL: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("BILLING_RETURN_URL"));

pub static BILLING_LEASE_TTL_SECS: Lazy<i64> = Lazy::new(|| {
    std::env::var("BILLING_LEASE_TTL_SECS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(30)
});

pub static BILLING_LEASE_RETRY_BASE_MS: Lazy<u64> = Lazy::new(|| {
    std::env::var("BILLING_LEASE_RETRY_BASE_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(25)
});

pub static BILLING_LEASE_RETRY_ATTEMPTS: Lazy<u32> = Lazy::new(|| {
    std::env::var("BILLING_LEASE_RETRY_ATTEMPTS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(8)
});

// key: billing-sweep -> cadence of the expiry and redelivery sweep
pub static BILLING_SWEEP_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("BILLING_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(60)
});

pub static BILLING_SWEEP_BATCH_SIZE: Lazy<i64> = Lazy::new(|| {
    std::env::var("BILLING_SWEEP_BATCH_SIZE")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(200)
});

/// Bearer token guarding the operator read API. Unset disables the API.
pub static BILLING_OPERATOR_TOKEN: Lazy<Option<String>> =
    Lazy::new(|| read_secret_env("BILLING_OPERATOR_TOKEN", "BILLING_OPERATOR_TOKEN_FILE"));

// key: subscription-collaborator-config -> base URL of the subscription service
pub static SUBSCRIPTION_SERVICE_URL: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("SUBSCRIPTION_SERVICE_URL"));

pub static SUBSCRIPTION_SERVICE_TOKEN: Lazy<Option<String>> = Lazy::new(|| {
    read_secret_env("SUBSCRIPTION_SERVICE_TOKEN", "SUBSCRIPTION_SERVICE_TOKEN_FILE")
});

pub static SUBSCRIPTION_SERVICE_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("SUBSCRIPTION_SERVICE_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(10)
});

#[derive(Clone, Debug)]
pub struct PaymeConfig {
    pub login: String,
    pub merchant_key: String,
    pub merchant_id: String,
    pub transaction_timeout_ms: i64,
    pub checkout_url: String,
}

#[derive(Clone, Debug)]
pub struct ClickConfig {
    pub service_id: i64,
    pub merchant_id: String,
    pub secret_key: String,
    pub prepare_ttl_secs: i64,
    pub checkout_url: String,
}

#[derive(Clone, Debug)]
pub struct LeaseConfig {
    pub ttl_secs: i64,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub retry_attempts: u32,
}

#[derive(Clone, Debug)]
pub struct CheckoutConfig {
    pub order_prefix: String,
    pub currency: String,
    pub order_ttl_hours: i64,
    pub return_url: Option<String>,
}

// key: engine-config -> everything the adapters read, injected rather than global
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub payme: PaymeConfig,
    pub click: ClickConfig,
    pub lease: LeaseConfig,
    pub checkout: CheckoutConfig,
    pub sweep_batch_size: i64,
    /// Bearer token for the operator API; `None` disables it.
    pub operator_token: Option<String>,
}

impl EngineConfig {
    /// Collects the environment statics, failing on missing provider credentials.
    pub fn from_env() -> Result<Self> {
        let merchant_key = PAYME_MERCHANT_KEY
            .clone()
            .ok_or_else(|| anyhow!("PAYME_MERCHANT_KEY must be set"))?;
        let secret_key = CLICK_SECRET_KEY
            .clone()
            .ok_or_else(|| anyhow!("CLICK_SECRET_KEY must be set"))?;
        let service_id =
            (*CLICK_SERVICE_ID).ok_or_else(|| anyhow!("CLICK_SERVICE_ID must be set"))?;

        Ok(Self {
            payme: PaymeConfig {
                login: PAYME_LOGIN.clone(),
                merchant_key,
                merchant_id: PAYME_MERCHANT_ID.clone(),
                transaction_timeout_ms: *PAYME_TRANSACTION_TIMEOUT_MS,
                checkout_url: PAYME_CHECKOUT_URL.clone(),
            },
            click: ClickConfig {
                service_id,
                merchant_id: CLICK_MERCHANT_ID.clone(),
                secret_key,
                prepare_ttl_secs: *CLICK_PREPARE_TTL_SECS,
                checkout_url: CLICK_CHECKOUT_URL.clone(),
            },
            lease: LeaseConfig {
                ttl_secs: *BILLING_LEASE_TTL_SECS,
                retry_base: Duration::from_millis(*BILLING_LEASE_RETRY_BASE_MS),
                retry_cap: Duration::from_secs(2),
                retry_attempts: *BILLING_LEASE_RETRY_ATTEMPTS,
            },
            checkout: CheckoutConfig {
                order_prefix: BILLING_ORDER_PREFIX.clone(),
                currency: BILLING_CURRENCY.clone(),
                order_ttl_hours: *BILLING_ORDER_TTL_HOURS,
                return_url: BILLING_RETURN_URL.clone(),
            },
            sweep_batch_size: *BILLING_SWEEP_BATCH_SIZE,
            operator_token: BILLING_OPERATOR_TOKEN.clone(),
        })
    }
}

fn read_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
}

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_secret_env(value_key: &str, file_key: &str) -> Option<String> {
    if let Some(path) = read_optional_env(file_key) {
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let trimmed = contents.trim().to_string();
                if !trimmed.is_empty() {
                    return Some(trimmed);
                }
            }
            Err(err) => {
                tracing::warn!(%err, key = file_key, %path, "failed to read secret file");
            }
        }
    }

    read_optional_env(value_key)
}

#[cfg(test)]
pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        payme: PaymeConfig {
            login: "Paycom".into(),
            merchant_key: "payme-test-key".into(),
            merchant_id: "merchant-123".into(),
            transaction_timeout_ms: 43_200_000,
            checkout_url: "https://checkout.paycom.uz".into(),
        },
        click: ClickConfig {
            service_id: 777,
            merchant_id: "555".into(),
            secret_key: "click-secret".into(),
            prepare_ttl_secs: 1800,
            checkout_url: "https://my.click.uz/services/pay".into(),
        },
        lease: LeaseConfig {
            ttl_secs: 30,
            retry_base: Duration::from_millis(1),
            retry_cap: Duration::from_millis(20),
            retry_attempts: 6,
        },
        checkout: CheckoutConfig {
            order_prefix: "BP".into(),
            currency: "UZS".into(),
            order_ttl_hours: 24,
            return_url: Some("https://app.example.uz/billing/success".into()),
        },
        sweep_batch_size: 100,
        operator_token: Some("operator-test-token".into()),
    }
}
