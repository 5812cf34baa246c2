//! Click SHOP API: form-encoded Prepare (action 0) and Complete (action 1).

pub mod errors;
pub mod service;
pub mod wire;

pub use service::{ClickCompleted, ClickOutcome, ClickPrepared, ClickService};
pub use wire::{ClickForm, ClickRequest, ClickResponse};
