//! # relay-core
//!
//! The agent runtime: lifecycle state, the heartbeat loop, and the
//! dispatcher that takes each Command to exactly one terminal event.
//!
//! This crate provides:
//! - The trait seams (`RoleHandler`, `LlmCaller`, `ArtifactSink`, `ReceiptStore`)
//! - The `(role, action)` `DispatchTable`
//! - The `Dispatcher` that enforces version pinning and idempotent replay
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_core::{Dispatcher, DispatchTable, traits::{RoleHandler, ReceiptStore, ArtifactSink}};
//! ```

pub mod dispatcher;
pub mod heartbeat;
pub mod outcome;
pub mod state;
pub mod table;
pub mod traits;

pub use dispatcher::Dispatcher;
pub use heartbeat::{HeartbeatSettings, Heartbeater};
pub use outcome::{OutputDocument, RoleOutcome};
pub use state::AgentState;
pub use table::DispatchTable;
