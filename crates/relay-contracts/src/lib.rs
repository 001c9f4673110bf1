//! # relay-contracts
//!
//! Wire envelope, data model, and error types for the relay agent protocol.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate: only data definitions, field validation and error types.

pub mod agent;
pub mod command;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod log;
pub mod message;
pub mod receipt;
