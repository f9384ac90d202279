//! Shared types, error taxonomy, configuration and logging for the broker.
//!
//! This crate has no async runtime dependency beyond what `tracing`/`config`
//! pull in; it is meant to be a cheap, stable base that both `broker-core`
//! and `broker-http` depend on without pulling each other in.

pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod thread;

pub use config::BrokerConfig;
pub use error::{BrokerError, BrokerResult};
pub use message::{Message, MessageState, Priority};
pub use thread::ThreadMetadata;
