//! Events and artifact references.
//!
//! An `Event` answers a Command (or reports something autonomously). Exactly
//! one terminal event, one whose status is success, failed or needs_input,
//! is expected per Command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::AgentRef;
use crate::command::Version;

/// Dotted event names used by this runtime.
pub mod names {
    pub const ARTIFACT_PRODUCED: &str = "artifact.produced";
    pub const ERROR: &str = "error";
    pub const PROPOSED_TASKS: &str = "orchestration.proposed_tasks";
    pub const NEEDS_CLARIFICATION: &str = "orchestration.needs_clarification";
    pub const PLAN_CONFLICT: &str = "orchestration.plan_conflict";
    pub const BUILD_COMPLETED: &str = "build.completed";
    pub const BUILD_CHANGES_APPLIED: &str = "build.changes_applied";
    pub const REVIEW_COMPLETED: &str = "review.completed";
    pub const SPEC_UPDATED: &str = "spec.updated";
}

/// Status values with terminal meaning.
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const FAILED: &str = "failed";
    pub const NEEDS_INPUT: &str = "needs_input";
}

/// A produced file, referenced by workspace-relative path.
///
/// `sha256` and `size` always describe the bytes read back from disk after
/// the write was made durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    /// `sha256:` followed by 64 lowercase hex characters.
    pub sha256: String,
    pub size: u64,
}

impl Artifact {
    pub const SHA256_PREFIX: &'static str = "sha256:";
}

/// A message emitted by an agent in response to a Command or on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub message_id: String,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub task_id: String,
    pub from: AgentRef,
    /// Dotted name, e.g. `orchestration.proposed_tasks`.
    pub event: String,
    /// Free-form per event family; see `status` for the terminal values.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_version: Option<Version>,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// True for success, failed and needs_input.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            status::SUCCESS | status::FAILED | status::NEEDS_INPUT
        )
    }

    /// The `code` field of an `error` event payload, if any.
    pub fn error_code(&self) -> Option<&str> {
        self.payload.get("code").and_then(Value::as_str)
    }
}
