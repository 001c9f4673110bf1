//! Agent identity and lifecycle types.
//!
//! Every message an agent writes names its sender through an `AgentRef`.
//! The lifecycle `AgentStatus` is reported on each heartbeat.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::command::Action;
use crate::error::RelayError;

/// The role an agent process is configured to play.
///
/// Each role supports a fixed subset of `Action`s; see `Role::supports`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Builder,
    Reviewer,
    SpecMaintainer,
    Orchestration,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Builder,
        Role::Reviewer,
        Role::SpecMaintainer,
        Role::Orchestration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Builder => "builder",
            Role::Reviewer => "reviewer",
            Role::SpecMaintainer => "spec_maintainer",
            Role::Orchestration => "orchestration",
        }
    }

    /// The actions this role accepts.
    pub fn actions(&self) -> &'static [Action] {
        match self {
            Role::Builder => &[Action::Implement, Action::ImplementChanges],
            Role::Reviewer => &[Action::Review],
            Role::SpecMaintainer => &[Action::UpdateSpec],
            Role::Orchestration => &[Action::Intake, Action::TaskDiscovery],
        }
    }

    pub fn supports(&self, action: Action) -> bool {
        self.actions().contains(&action)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| RelayError::Config {
                reason: format!(
                    "unknown role '{}' (expected builder, reviewer, spec_maintainer or orchestration)",
                    s
                ),
            })
    }
}

/// Reference to a specific agent process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    /// The role the agent plays.
    pub agent_type: Role,
    /// Stable identifier for this agent instance (e.g. "orchestration-4242").
    pub agent_id: String,
}

impl AgentRef {
    pub fn new(agent_type: Role, agent_id: impl Into<String>) -> Self {
        Self {
            agent_type,
            agent_id: agent_id.into(),
        }
    }
}

/// Lifecycle state reported on heartbeats.
///
/// `Starting → Ready ⇄ Busy → Stopping`, with `Backoff` reachable from
/// `Ready` or `Busy` when the caller signals rate-limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Starting,
    Ready,
    Busy,
    Stopping,
    Backoff,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Starting => "starting",
            AgentStatus::Ready => "ready",
            AgentStatus::Busy => "busy",
            AgentStatus::Stopping => "stopping",
            AgentStatus::Backoff => "backoff",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
