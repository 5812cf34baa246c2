//! Payme merchant API: JSON-RPC 2.0 over a single POST endpoint.

pub mod amount;
pub mod errors;
pub mod service;
pub mod wire;

pub use errors::PaymeError;
pub use service::{PaymeResponse, PaymeService};
pub use wire::{PaymeRequest, RpcEnvelope};
