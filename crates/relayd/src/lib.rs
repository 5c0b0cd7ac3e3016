//! Relay daemon crate: webhook intake, task lifecycle and persistence.

pub mod broadcaster;
pub mod error;
pub mod gate;
pub mod github;
pub mod health;
pub mod intake;
pub mod journal;
pub mod lifecycle;
pub mod retry;
pub mod router;
pub mod service;
pub mod signature;
pub mod state_machine;
pub mod store;
pub mod telemetry;
pub mod trigger;

pub use broadcaster::*;
pub use error::*;
pub use gate::*;
pub use github::*;
pub use health::*;
pub use intake::*;
pub use journal::*;
pub use lifecycle::*;
pub use retry::*;
pub use router::*;
pub use service::*;
pub use signature::*;
pub use state_machine::*;
pub use store::*;
pub use telemetry::*;
pub use trigger::*;

#[cfg(test)]
mod scenarios;
