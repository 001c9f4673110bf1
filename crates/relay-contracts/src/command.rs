//! Commands: the unit of work a coordinator sends to one agent.
//!
//! Decoding is lenient about missing fields (they default to empty) so that
//! `Command::validate()` can report every problem at once as a recoverable
//! `invalid_command` error instead of a fatal stream decode failure.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::Role;
use crate::error::{RelayError, RelayResult};

/// Highest accepted `Command::priority`.
pub const MAX_PRIORITY: u8 = 10;

/// The work a Command asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Implement,
    ImplementChanges,
    Review,
    UpdateSpec,
    Intake,
    TaskDiscovery,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Implement => "implement",
            Action::ImplementChanges => "implement_changes",
            Action::Review => "review",
            Action::UpdateSpec => "update_spec",
            Action::Intake => "intake",
            Action::TaskDiscovery => "task_discovery",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_required() -> bool {
    true
}

/// A workspace-relative path the Command expects the agent to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedOutput {
    pub path: String,
    /// Required outputs fail the Command when they cannot be written;
    /// optional ones only produce a warning log.
    #[serde(default = "default_required")]
    pub required: bool,
}

impl ExpectedOutput {
    pub fn required(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            required: true,
        }
    }

    pub fn optional(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            required: false,
        }
    }
}

/// The workspace view a Command was issued against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub snapshot_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub content_hashes: BTreeMap<String, String>,
}

impl Version {
    pub fn snapshot(snapshot_id: impl Into<String>) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            content_hashes: BTreeMap::new(),
        }
    }
}

/// Retry bookkeeping supplied by the coordinator. The agent never schedules
/// retries itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryInfo {
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub max_attempts: u32,
}

/// A unit of work addressed to one agent.
///
/// Immutable once decoded; the dispatcher borrows it for the duration of a
/// single dispatch call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub idempotency_key: String,
    /// The role this Command was addressed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub expected_outputs: Vec<ExpectedOutput>,
    #[serde(default)]
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry: RetryInfo,
    #[serde(default)]
    pub priority: u8,
}

impl Command {
    /// Check the field contract. All problems are reported in one error.
    pub fn validate(&self) -> RelayResult<()> {
        let mut problems = Vec::new();

        for (name, value) in [
            ("message_id", &self.message_id),
            ("task_id", &self.task_id),
            ("idempotency_key", &self.idempotency_key),
            ("version.snapshot_id", &self.version.snapshot_id),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("missing {}", name));
            }
        }

        if self.action.is_none() {
            problems.push("missing action".to_string());
        }

        if self.priority > MAX_PRIORITY {
            problems.push(format!(
                "priority {} exceeds maximum {}",
                self.priority, MAX_PRIORITY
            ));
        }

        if self.retry.max_attempts > 0 && self.retry.attempt > self.retry.max_attempts {
            problems.push(format!(
                "retry attempt {} exceeds max_attempts {}",
                self.retry.attempt, self.retry.max_attempts
            ));
        }

        if self.expected_outputs.iter().any(|o| o.path.trim().is_empty()) {
            problems.push("expected output with empty path".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RelayError::InvalidCommand {
                reason: problems.join("; "),
            })
        }
    }

    /// The requested action, or `InvalidCommand` when it is absent.
    pub fn require_action(&self) -> RelayResult<Action> {
        self.action.ok_or_else(|| RelayError::InvalidCommand {
            reason: "missing action".to_string(),
        })
    }

    /// True when the deadline is set and lies before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| deadline < now)
    }
}
