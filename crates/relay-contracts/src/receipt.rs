//! Idempotency receipts.
//!
//! A `Receipt` is written once per completed `(task_id, action,
//! idempotency_key)` and never modified afterwards. It holds enough to
//! replay the Command's artifacts and terminal event without re-running
//! any side effect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{command::Action, event::Artifact};

/// The terminal event of the Command a receipt records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalRecord {
    /// Message id of the original terminal event.
    pub message_id: String,
    pub event: String,
    pub status: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub task_id: String,
    pub action: Action,
    /// Position of this receipt among the receipts of `(task_id, action)`,
    /// starting at 1.
    pub step: u32,
    pub idempotency_key: String,
    pub artifacts: Vec<Artifact>,
    /// Message ids of the events considered terminal for this Command.
    pub events: Vec<String>,
    pub terminal: TerminalRecord,
    pub created_at: DateTime<Utc>,
}

impl Receipt {
    /// True if this receipt answers the given lookup triple.
    pub fn matches(&self, task_id: &str, action: Action, idempotency_key: &str) -> bool {
        self.task_id == task_id && self.action == action && self.idempotency_key == idempotency_key
    }
}
