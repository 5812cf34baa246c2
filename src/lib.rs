pub mod api;
pub mod audit;
pub mod checkout;
pub mod click;
pub mod clock;
pub mod collaborator;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod guard;
pub mod ledger;
pub mod notifier;
pub mod payme;
pub mod routes;
pub mod signature;
pub mod store;
pub mod sweep;
pub mod webhooks;

pub use config::EngineConfig;
pub use engine::BillingEngine;
pub use routes::api_routes;
