//! Bidirectional cross-chain relayer core.
//!
//! Two independent pipelines shuttle block headers and event inclusion
//! proofs between a relay chain and a target chain, tracking every
//! submission through a durable confirm/retry state machine.

pub mod chains;
pub mod codec;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod keys;
pub mod proofs;
pub mod wallet;

pub use config::Config;
pub use engine::Context;
pub use error::{RelayError, Result};
