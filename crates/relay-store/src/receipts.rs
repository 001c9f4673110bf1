//! Filesystem receipt store.
//!
//! Layout, relative to the workspace:
//!
//!   receipts/<task_id>/<action>-<step>.json          one receipt, never rewritten
//!   receipts/<task_id>/index/by-ik/<8-hex>.json      best-effort index entry
//!
//! The receipt files are the authoritative record. `scan` answers every
//! lookup correctly on its own; the index is consulted first and trusted
//! only after the loaded receipt's key has been compared with the request.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};

use relay_contracts::{
    command::Action,
    error::{RelayError, RelayResult},
    receipt::Receipt,
};
use relay_core::traits::{LookupSource, ReceiptLookup, ReceiptStore, StoredReceipt};

use crate::{artifact::AtomicArtifactWriter, index::IkIndex};

pub const RECEIPTS_DIR: &str = "receipts";

#[derive(Debug, Clone)]
pub struct FsReceiptStore {
    writer: AtomicArtifactWriter,
    index: IkIndex,
}

impl FsReceiptStore {
    pub fn new(workspace: &Path) -> RelayResult<Self> {
        Ok(Self::from_writer(AtomicArtifactWriter::new(workspace)?))
    }

    /// Store receipts through an existing writer, sharing its root.
    pub fn from_writer(writer: AtomicArtifactWriter) -> Self {
        Self {
            index: IkIndex::new(writer.clone()),
            writer,
        }
    }

    pub fn index(&self) -> &IkIndex {
        &self.index
    }

    /// `receipts/<task_id>/<action>-<step>.json`
    pub fn receipt_path(task_id: &str, action: Action, step: u32) -> String {
        format!("{}/{}/{}-{}.json", RECEIPTS_DIR, task_id, action.as_str(), step)
    }

    /// Read a receipt by workspace-relative path.
    pub fn load(&self, relative: &str) -> RelayResult<Receipt> {
        let path = self.writer.resolve(relative)?;
        let bytes = fs::read(&path).map_err(|e| RelayError::ReceiptLookup {
            reason: format!("cannot read {}: {}", relative, e),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| RelayError::ReceiptLookup {
            reason: format!("corrupt receipt {}: {}", relative, e),
        })
    }

    /// Steps recorded for `(task_id, action)`, ascending.
    pub fn steps(&self, task_id: &str, action: Action) -> RelayResult<Vec<u32>> {
        let dir = task_dir(task_id)?;
        let path = self.writer.resolve(&dir)?;
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RelayError::ReceiptLookup {
                    reason: format!("cannot list {}: {}", dir, e),
                })
            }
        };

        let mut steps = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RelayError::ReceiptLookup {
                reason: format!("cannot list {}: {}", dir, e),
            })?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            if let Some(step) = name.to_str().and_then(|n| parse_step(n, action)) {
                steps.push(step);
            }
        }
        steps.sort_unstable();
        Ok(steps)
    }

    /// Authoritative lookup: every receipt of `(task_id, action)` in step
    /// order, first exact key match wins.
    pub fn scan(
        &self,
        task_id: &str,
        action: Action,
        idempotency_key: &str,
    ) -> RelayResult<Option<(Receipt, String)>> {
        for step in self.steps(task_id, action)? {
            let relative = Self::receipt_path(task_id, action, step);
            match self.load(&relative) {
                Ok(receipt) if receipt.matches(task_id, action, idempotency_key) => {
                    return Ok(Some((receipt, relative)));
                }
                Ok(_) => {}
                Err(e) => warn!(receipt = %relative, error = %e, "skipping unreadable receipt"),
            }
        }
        Ok(None)
    }

    fn from_index(
        &self,
        task_id: &str,
        action: Action,
        idempotency_key: &str,
    ) -> Option<(Receipt, String)> {
        let relative = self.index.get(task_id, idempotency_key)?;
        let expected_prefix = format!("{}/", task_dir(task_id).ok()?);
        if !relative.starts_with(&expected_prefix) {
            warn!(task_id, entry = %relative, "index entry points outside the task; ignoring");
            return None;
        }
        match self.load(&relative) {
            Ok(receipt) if receipt.matches(task_id, action, idempotency_key) => {
                Some((receipt, relative))
            }
            Ok(_) => {
                debug!(task_id, entry = %relative, "index entry belongs to another key");
                None
            }
            Err(e) => {
                warn!(task_id, entry = %relative, error = %e, "index entry unusable");
                None
            }
        }
    }
}

impl ReceiptStore for FsReceiptStore {
    fn find_receipt_by_ik(
        &self,
        task_id: &str,
        action: Action,
        idempotency_key: &str,
    ) -> RelayResult<ReceiptLookup> {
        let dir = task_dir(task_id)?;

        if let Some((receipt, relative)) = self.from_index(task_id, action, idempotency_key) {
            return Ok(ReceiptLookup {
                receipt: Some(receipt),
                location: self.writer.root().join(relative),
                source: LookupSource::Index,
            });
        }

        match self.scan(task_id, action, idempotency_key)? {
            Some((receipt, relative)) => {
                if let Err(e) = self.index.put(task_id, idempotency_key, &relative) {
                    debug!(task_id, error = %e, "index repair failed");
                }
                Ok(ReceiptLookup {
                    receipt: Some(receipt),
                    location: self.writer.root().join(relative),
                    source: LookupSource::Scan,
                })
            }
            None => Ok(ReceiptLookup {
                receipt: None,
                location: self.writer.root().join(dir),
                source: LookupSource::Miss,
            }),
        }
    }

    fn save_receipt_with_index(&self, mut receipt: Receipt) -> RelayResult<StoredReceipt> {
        let write_err = |e: RelayError| RelayError::ReceiptWrite {
            reason: e.to_string(),
        };

        task_dir(&receipt.task_id).map_err(write_err)?;
        let step = self
            .steps(&receipt.task_id, receipt.action)
            .map_err(write_err)?
            .last()
            .map_or(1, |last| last + 1);
        receipt.step = step;

        let relative = Self::receipt_path(&receipt.task_id, receipt.action, step);
        let target = self.writer.resolve(&relative).map_err(write_err)?;
        if target.exists() {
            return Err(RelayError::ReceiptWrite {
                reason: format!("{} already exists", relative),
            });
        }
        let body = serde_json::to_vec_pretty(&receipt).map_err(|e| RelayError::ReceiptWrite {
            reason: e.to_string(),
        })?;
        self.writer.write(&relative, &body).map_err(write_err)?;

        if let Err(e) = self
            .index
            .put(&receipt.task_id, &receipt.idempotency_key, &relative)
        {
            warn!(task_id = %receipt.task_id, error = %e, "index write failed; scans still find the receipt");
        }

        info!(task_id = %receipt.task_id, action = %receipt.action, step, "receipt stored");
        Ok(StoredReceipt {
            location: self.writer.root().join(&relative),
            receipt,
        })
    }
}

/// `receipts/<task_id>`, with `task_id` checked to be one plain path segment.
fn task_dir(task_id: &str) -> RelayResult<String> {
    let plain = !task_id.is_empty()
        && task_id != "."
        && task_id != ".."
        && !task_id.contains(['/', '\\', '\0']);
    if plain {
        Ok(format!("{}/{}", RECEIPTS_DIR, task_id))
    } else {
        Err(RelayError::ReceiptLookup {
            reason: format!("task id '{}' is not a plain path segment", task_id),
        })
    }
}

/// `implement-3.json` → `Some(3)` for `Action::Implement`.
fn parse_step(file_name: &str, action: Action) -> Option<u32> {
    file_name
        .strip_prefix(action.as_str())?
        .strip_prefix('-')?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Map;
    use tempfile::TempDir;

    use relay_contracts::{event::Artifact, receipt::TerminalRecord};

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn store() -> (TempDir, FsReceiptStore) {
        let dir = TempDir::new().unwrap();
        let store = FsReceiptStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn receipt(task_id: &str, action: Action, ik: &str) -> Receipt {
        Receipt {
            task_id: task_id.to_string(),
            action,
            step: 0,
            idempotency_key: ik.to_string(),
            artifacts: vec![Artifact {
                path: "out/plan.json".to_string(),
                sha256: format!("sha256:{}", "0".repeat(64)),
                size: 12,
            }],
            events: vec!["evt-1".to_string()],
            terminal: TerminalRecord {
                message_id: "evt-1".to_string(),
                event: "orchestration.proposed_tasks".to_string(),
                status: "success".to_string(),
                payload: Map::new(),
            },
            created_at: Utc::now(),
        }
    }

    fn index_file(dir: &TempDir, task_id: &str, ik: &str) -> std::path::PathBuf {
        dir.path().join(IkIndex::entry_path(task_id, ik))
    }

    // ── Save ──────────────────────────────────────────────────────────────────

    #[test]
    fn save_writes_receipt_and_index_entry() {
        let (dir, store) = store();
        let stored = store
            .save_receipt_with_index(receipt("task-1", Action::Intake, "ik-1"))
            .unwrap();

        assert_eq!(stored.receipt.step, 1);
        assert!(dir.path().join("receipts/task-1/intake-1.json").is_file());
        assert_eq!(
            store.index().get("task-1", "ik-1").as_deref(),
            Some("receipts/task-1/intake-1.json")
        );
        let entry = IkIndex::entry_path("task-1", "ik-1");
        assert!(entry.starts_with("receipts/task-1/index/by-ik/"));
        assert_eq!(entry.len(), "receipts/task-1/index/by-ik/".len() + 8 + ".json".len());
    }

    #[test]
    fn steps_increase_per_task_and_action() {
        let (_dir, store) = store();
        let a = store.save_receipt_with_index(receipt("task-1", Action::Implement, "a")).unwrap();
        let b = store.save_receipt_with_index(receipt("task-1", Action::Implement, "b")).unwrap();
        let c = store
            .save_receipt_with_index(receipt("task-1", Action::ImplementChanges, "c"))
            .unwrap();

        assert_eq!((a.receipt.step, b.receipt.step, c.receipt.step), (1, 2, 1));
        assert_eq!(store.steps("task-1", Action::Implement).unwrap(), vec![1, 2]);
        assert_eq!(store.steps("task-1", Action::ImplementChanges).unwrap(), vec![1]);
    }

    #[test]
    fn index_failure_does_not_fail_the_save() {
        let (dir, store) = store();
        fs::create_dir_all(dir.path().join("receipts/task-1")).unwrap();
        fs::write(dir.path().join("receipts/task-1/index"), b"not a directory").unwrap();

        let stored = store
            .save_receipt_with_index(receipt("task-1", Action::Intake, "ik-1"))
            .unwrap();
        assert_eq!(stored.receipt.step, 1);

        let lookup = store.find_receipt_by_ik("task-1", Action::Intake, "ik-1").unwrap();
        assert_eq!(lookup.source, LookupSource::Scan);
        assert!(lookup.receipt.is_some());
    }

    // ── Lookup ────────────────────────────────────────────────────────────────

    #[test]
    fn lookup_miss_reports_task_directory() {
        let (dir, store) = store();
        let lookup = store.find_receipt_by_ik("task-1", Action::Intake, "ik-1").unwrap();
        assert!(lookup.receipt.is_none());
        assert_eq!(lookup.source, LookupSource::Miss);
        assert_eq!(
            lookup.location,
            fs::canonicalize(dir.path()).unwrap().join("receipts/task-1")
        );
    }

    #[test]
    fn lookup_uses_index_when_present() {
        let (_dir, store) = store();
        store.save_receipt_with_index(receipt("task-1", Action::Intake, "ik-1")).unwrap();

        let lookup = store.find_receipt_by_ik("task-1", Action::Intake, "ik-1").unwrap();
        assert_eq!(lookup.source, LookupSource::Index);
        assert_eq!(lookup.receipt.unwrap().idempotency_key, "ik-1");
    }

    #[test]
    fn lookup_falls_back_to_scan_without_index_and_repairs_it() {
        let (dir, store) = store();
        store.save_receipt_with_index(receipt("task-1", Action::Intake, "ik-1")).unwrap();
        fs::remove_file(index_file(&dir, "task-1", "ik-1")).unwrap();

        let lookup = store.find_receipt_by_ik("task-1", Action::Intake, "ik-1").unwrap();
        assert_eq!(lookup.source, LookupSource::Scan);
        assert_eq!(lookup.receipt.unwrap().step, 1);

        let again = store.find_receipt_by_ik("task-1", Action::Intake, "ik-1").unwrap();
        assert_eq!(again.source, LookupSource::Index);
    }

    #[test]
    fn corrupted_index_entry_falls_back_to_scan() {
        let (dir, store) = store();
        store.save_receipt_with_index(receipt("task-1", Action::Intake, "ik-1")).unwrap();
        fs::write(index_file(&dir, "task-1", "ik-1"), b"{ this is not json").unwrap();

        let lookup = store.find_receipt_by_ik("task-1", Action::Intake, "ik-1").unwrap();
        assert_eq!(lookup.source, LookupSource::Scan);
        assert_eq!(lookup.receipt.unwrap().idempotency_key, "ik-1");
    }

    #[test]
    fn mismatched_index_entry_is_not_trusted() {
        let (dir, store) = store();
        store.save_receipt_with_index(receipt("task-1", Action::Intake, "ik-1")).unwrap();
        store.save_receipt_with_index(receipt("task-1", Action::Intake, "ik-2")).unwrap();

        // Point ik-1's entry at ik-2's receipt, as a hash collision would.
        fs::write(
            index_file(&dir, "task-1", "ik-1"),
            br#"{"receipt_path":"receipts/task-1/intake-2.json"}"#,
        )
        .unwrap();
        let lookup = store.find_receipt_by_ik("task-1", Action::Intake, "ik-1").unwrap();
        assert_eq!(lookup.source, LookupSource::Scan);
        assert_eq!(lookup.receipt.unwrap().idempotency_key, "ik-1");

        // A mismatched entry for a key that was never stored is a miss.
        fs::create_dir_all(index_file(&dir, "task-1", "ik-3").parent().unwrap()).unwrap();
        fs::write(
            index_file(&dir, "task-1", "ik-3"),
            br#"{"receipt_path":"receipts/task-1/intake-1.json"}"#,
        )
        .unwrap();
        let lookup = store.find_receipt_by_ik("task-1", Action::Intake, "ik-3").unwrap();
        assert_eq!(lookup.source, LookupSource::Miss);
        assert!(lookup.receipt.is_none());
    }

    #[test]
    fn index_entry_outside_the_task_is_ignored() {
        let (dir, store) = store();
        store.save_receipt_with_index(receipt("task-2", Action::Intake, "ik-1")).unwrap();
        store.save_receipt_with_index(receipt("task-1", Action::Intake, "ik-1")).unwrap();
        fs::write(
            index_file(&dir, "task-1", "ik-1"),
            br#"{"receipt_path":"receipts/task-2/intake-1.json"}"#,
        )
        .unwrap();

        let lookup = store.find_receipt_by_ik("task-1", Action::Intake, "ik-1").unwrap();
        assert_eq!(lookup.source, LookupSource::Scan);
        assert_eq!(lookup.receipt.unwrap().task_id, "task-1");
    }

    #[test]
    fn same_key_under_another_action_is_a_miss() {
        let (_dir, store) = store();
        store.save_receipt_with_index(receipt("task-1", Action::Intake, "ik-1")).unwrap();

        let lookup = store
            .find_receipt_by_ik("task-1", Action::TaskDiscovery, "ik-1")
            .unwrap();
        assert!(lookup.receipt.is_none());
    }

    #[test]
    fn scan_skips_unreadable_receipts() {
        let (dir, store) = store();
        fs::create_dir_all(dir.path().join("receipts/task-1")).unwrap();
        fs::write(dir.path().join("receipts/task-1/intake-1.json"), b"garbage").unwrap();
        let stored = store
            .save_receipt_with_index(receipt("task-1", Action::Intake, "ik-1"))
            .unwrap();
        assert_eq!(stored.receipt.step, 2);

        fs::remove_file(index_file(&dir, "task-1", "ik-1")).unwrap();
        let found = store.scan("task-1", Action::Intake, "ik-1").unwrap().unwrap();
        assert_eq!(found.1, "receipts/task-1/intake-2.json");
    }

    #[test]
    fn unsafe_task_ids_are_rejected() {
        let (_dir, store) = store();
        for task_id in ["", ".", "..", "a/b", "..\\x"] {
            let err = store.find_receipt_by_ik(task_id, Action::Intake, "ik").unwrap_err();
            assert_eq!(err.code(), "receipt_lookup_failed", "task id {:?}", task_id);
            let err = store
                .save_receipt_with_index(receipt(task_id, Action::Intake, "ik"))
                .unwrap_err();
            assert_eq!(err.code(), "receipt_write_failed", "task id {:?}", task_id);
        }
    }

    #[test]
    fn step_parsing_does_not_confuse_action_prefixes() {
        assert_eq!(parse_step("implement-3.json", Action::Implement), Some(3));
        assert_eq!(parse_step("implement_changes-3.json", Action::Implement), None);
        assert_eq!(parse_step("implement-x.json", Action::Implement), None);
        assert_eq!(parse_step("implement-3.json.tmp", Action::Implement), None);
    }
}
