//! Core trait definitions for the relay dispatcher.
//!
//! These traits are the seams between the dispatcher and everything it
//! drives:
//!
//! - `RoleHandler`   : role logic for one `(role, action)` pair
//! - `LlmCaller`     : the external language-model collaborator
//! - `ArtifactSink`  : durable, path-safe artifact writes
//! - `ReceiptStore`  : idempotency receipts
//!
//! Role handlers only propose an outcome. The dispatcher performs every
//! side effect (artifact writes, events, receipts) in a fixed order, which
//! is what makes replay safe.

use std::path::PathBuf;

use async_trait::async_trait;

use relay_contracts::{
    command::{Action, Command},
    error::RelayResult,
    event::Artifact,
    receipt::Receipt,
};

use crate::outcome::RoleOutcome;

/// Role-specific logic for the actions a role supports.
#[async_trait]
pub trait RoleHandler: Send + Sync {
    /// Produce the outcome for `cmd`.
    ///
    /// Called at most once per `(task_id, action, idempotency_key)` that has
    /// not yet been completed; on a receipt hit the dispatcher replays
    /// instead. Implementations must not write artifacts or emit events
    /// themselves.
    async fn handle(&self, cmd: &Command) -> RelayResult<RoleOutcome>;
}

/// The external language-model collaborator.
///
/// Implementations are expected to enforce their own timeout and to bound
/// the size of what they return.
#[async_trait]
pub trait LlmCaller: Send + Sync {
    async fn call(&self, prompt: &str) -> RelayResult<String>;
}

/// Destination for produced files.
pub trait ArtifactSink: Send + Sync {
    /// Durably write `content` at the workspace-relative `relative_path`
    /// and describe the bytes that ended up on disk.
    fn write_artifact(&self, relative_path: &str, content: &[u8]) -> RelayResult<Artifact>;
}

/// Which tier answered a receipt lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Index,
    Scan,
    Miss,
}

/// Result of `ReceiptStore::find_receipt_by_ik`.
#[derive(Debug, Clone)]
pub struct ReceiptLookup {
    pub receipt: Option<Receipt>,
    /// The receipt file on a hit, otherwise the directory that was searched.
    pub location: PathBuf,
    pub source: LookupSource,
}

/// A receipt as persisted, with the step the store assigned.
#[derive(Debug, Clone)]
pub struct StoredReceipt {
    pub receipt: Receipt,
    pub location: PathBuf,
}

/// Idempotency receipt persistence.
///
/// Receipts are append-only: a stored receipt is never modified or deleted.
pub trait ReceiptStore: Send + Sync {
    fn find_receipt_by_ik(
        &self,
        task_id: &str,
        action: Action,
        idempotency_key: &str,
    ) -> RelayResult<ReceiptLookup>;

    /// Persist `receipt` under the next free step for its `(task, action)`,
    /// then index it on a best-effort basis. Only the receipt write may
    /// fail the call.
    fn save_receipt_with_index(&self, receipt: Receipt) -> RelayResult<StoredReceipt>;
}
