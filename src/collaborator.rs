use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// What the subscription side knows about an order at payment time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PayableOrder {
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default)]
    pub is_expired: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Activated,
    AlreadyActive,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Deactivation {
    Deactivated,
    AlreadyInactive,
}

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("subscription service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("subscription service answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid subscription service url: {0}")]
    InvalidUrl(String),
}

// key: subscription-collaborator -> business side of a payment
///
/// Every call must be idempotent: the engine retries activation and
/// deactivation until it records a marker.
#[async_trait]
pub trait SubscriptionCollaborator: Send + Sync {
    async fn lookup_payable_order(
        &self,
        order_id: &str,
    ) -> Result<Option<PayableOrder>, CollaboratorError>;

    async fn activate_subscription(
        &self,
        order_id: &str,
        payment_ref: &str,
    ) -> Result<Activation, CollaboratorError>;

    async fn deactivate_subscription(
        &self,
        order_id: &str,
        payment_ref: &str,
    ) -> Result<Deactivation, CollaboratorError>;
}

#[derive(Serialize)]
struct SubscriptionCall<'a> {
    order_id: &'a str,
    payment_ref: &'a str,
}

#[derive(Deserialize)]
struct ActivationResponse {
    status: Activation,
}

#[derive(Deserialize)]
struct DeactivationResponse {
    status: Deactivation,
}

/// REST client for the subscription service.
///
/// - `GET  {base}/orders/{order_id}` returns a [`PayableOrder`] or 404
/// - `POST {base}/subscriptions/activate` returns `{"status": "activated" | "already_active"}`
/// - `POST {base}/subscriptions/deactivate` returns `{"status": "deactivated" | "already_inactive"}`
#[derive(Clone)]
pub struct HttpSubscriptionCollaborator {
    base_url: Url,
    token: Option<String>,
    client: Client,
}

impl HttpSubscriptionCollaborator {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let base_url =
            Url::parse(base_url).map_err(|err| CollaboratorError::InvalidUrl(err.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(CollaboratorError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, CollaboratorError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CollaboratorError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_call<T: for<'de> Deserialize<'de>>(
        &self,
        action: &str,
        order_id: &str,
        payment_ref: &str,
    ) -> Result<T, CollaboratorError> {
        let url = self.endpoint(&["subscriptions", action])?;
        let response = self
            .authorize(self.client.post(url))
            .json(&SubscriptionCall {
                order_id,
                payment_ref,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status { status, body });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SubscriptionCollaborator for HttpSubscriptionCollaborator {
    async fn lookup_payable_order(
        &self,
        order_id: &str,
    ) -> Result<Option<PayableOrder>, CollaboratorError> {
        let url = self.endpoint(&["orders", order_id])?;
        let response = self.authorize(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status { status, body });
        }
        Ok(Some(response.json::<PayableOrder>().await?))
    }

    async fn activate_subscription(
        &self,
        order_id: &str,
        payment_ref: &str,
    ) -> Result<Activation, CollaboratorError> {
        let response: ActivationResponse =
            self.post_call("activate", order_id, payment_ref).await?;
        Ok(response.status)
    }

    async fn deactivate_subscription(
        &self,
        order_id: &str,
        payment_ref: &str,
    ) -> Result<Deactivation, CollaboratorError> {
        let response: DeactivationResponse =
            self.post_call("deactivate", order_id, payment_ref).await?;
        Ok(response.status)
    }
}
