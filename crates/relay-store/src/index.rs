//! Best-effort idempotency-key index.
//!
//! `receipts/<task_id>/index/by-ik/<8-hex>.json` holds
//! `{"receipt_path": "..."}`. The index only speeds up lookups: any entry
//! may be missing, stale, or point at a receipt for a different key, and
//! readers must treat it accordingly.

use std::fs;
use std::io;

use serde::{Deserialize, Serialize};
use tracing::debug;

use relay_contracts::error::{RelayError, RelayResult};

use crate::{artifact::AtomicArtifactWriter, digest::ik_hash, receipts::RECEIPTS_DIR};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Workspace-relative path of the receipt.
    pub receipt_path: String,
}

#[derive(Debug, Clone)]
pub struct IkIndex {
    writer: AtomicArtifactWriter,
}

impl IkIndex {
    pub fn new(writer: AtomicArtifactWriter) -> Self {
        Self { writer }
    }

    /// Workspace-relative path of the entry for `(task_id, idempotency_key)`.
    pub fn entry_path(task_id: &str, idempotency_key: &str) -> String {
        format!(
            "{}/{}/index/by-ik/{}.json",
            RECEIPTS_DIR,
            task_id,
            ik_hash(idempotency_key)
        )
    }

    /// The receipt path recorded for the key, if a readable entry exists.
    pub fn get(&self, task_id: &str, idempotency_key: &str) -> Option<String> {
        let relative = Self::entry_path(task_id, idempotency_key);
        let path = match self.writer.resolve(&relative) {
            Ok(path) => path,
            Err(e) => {
                debug!(entry = %relative, error = %e, "index entry unresolvable");
                return None;
            }
        };
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                debug!(entry = %relative, error = %e, "index entry unreadable");
                return None;
            }
        };
        match serde_json::from_slice::<IndexEntry>(&bytes) {
            Ok(entry) => Some(entry.receipt_path),
            Err(e) => {
                debug!(entry = %relative, error = %e, "index entry corrupt");
                None
            }
        }
    }

    /// Point the key's entry at `receipt_path`, replacing any previous one.
    pub fn put(&self, task_id: &str, idempotency_key: &str, receipt_path: &str) -> RelayResult<()> {
        let entry = IndexEntry {
            receipt_path: receipt_path.to_string(),
        };
        let body = serde_json::to_vec(&entry).map_err(|e| RelayError::Encode {
            reason: e.to_string(),
        })?;
        self.writer
            .write(&Self::entry_path(task_id, idempotency_key), &body)
            .map(|_| ())
    }
}
