use axum::{
    routing::{any, get, post},
    Router,
};

use crate::{api, webhooks};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/billing/payme", any(webhooks::payme_webhook))
        .route("/api/billing/click", any(webhooks::click_webhook))
        .route("/api/billing/orders", post(api::create_order))
        .route(
            "/api/billing/transactions/:order_id",
            get(api::get_transaction),
        )
        .route("/api/billing/webhook-logs", get(api::list_webhook_logs))
}
