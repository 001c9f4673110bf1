//! Agent configuration schema.
//!
//! An `AgentConfig` is deserialized from TOML; every field except `role`
//! has a default, and `role` may also come from the command line. Call
//! `validate()` once all overrides have been applied.
//!
//! ```toml
//! role = "orchestration"
//! workspace = "/srv/build"
//! heartbeat_interval_secs = 5
//!
//! [llm]
//! command = ["llm-cli", "--json"]
//! timeout_secs = 120
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use relay_contracts::{
    agent::Role,
    error::{RelayError, RelayResult},
};

pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024;
/// Smallest accepted message cap; truncated previews need room to fit.
pub const MIN_MAX_MESSAGE_BYTES: usize = 4096;
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 1 << 30;
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_LLM_MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

fn default_max_artifact_bytes() -> u64 {
    DEFAULT_MAX_ARTIFACT_BYTES
}

fn default_llm_timeout_secs() -> u64 {
    DEFAULT_LLM_TIMEOUT_SECS
}

fn default_llm_max_output_bytes() -> usize {
    DEFAULT_LLM_MAX_OUTPUT_BYTES
}

/// The external LLM command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// Program and arguments. The prompt is written to its stdin and the
    /// response read from its stdout.
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Output beyond this many bytes fails the call.
    #[serde(default = "default_llm_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_LLM_MAX_OUTPUT_BYTES,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub role: Option<Role>,

    /// Defaults to `<role>-<pid>`.
    #[serde(default)]
    pub agent_id: Option<String>,

    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Include rss and cpu usage in heartbeats.
    #[serde(default = "default_true")]
    pub heartbeat_stats: bool,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,

    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            role: None,
            agent_id: None,
            workspace: default_workspace(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            heartbeat_stats: true,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            llm: LlmConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Parse `s` as TOML.
    ///
    /// Returns `RelayError::Config` if the TOML is malformed or has fields
    /// outside the schema. Values are not validated here.
    pub fn from_toml_str(s: &str) -> RelayResult<Self> {
        toml::from_str(s).map_err(|e| RelayError::Config {
            reason: format!("failed to parse agent config TOML: {}", e),
        })
    }

    /// Read the file at `path` and parse it as TOML.
    pub fn from_file(path: &Path) -> RelayResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| RelayError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        let config = Self::from_toml_str(&contents)?;
        debug!(path = %path.display(), "loaded agent config");
        Ok(config)
    }

    /// Check every value. All problems are reported in one error.
    pub fn validate(&self) -> RelayResult<()> {
        let mut problems = Vec::new();

        if self.role.is_none() {
            problems.push("role is required".to_string());
        }
        if self.agent_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            problems.push("agent_id must not be empty".to_string());
        }
        if self.heartbeat_interval_secs == 0 {
            problems.push("heartbeat_interval_secs must be greater than 0".to_string());
        }
        if self.max_message_bytes < MIN_MAX_MESSAGE_BYTES {
            problems.push(format!(
                "max_message_bytes {} is below the minimum {}",
                self.max_message_bytes, MIN_MAX_MESSAGE_BYTES
            ));
        }
        if self.max_artifact_bytes == 0 {
            problems.push("max_artifact_bytes must be greater than 0".to_string());
        }
        if self.llm.command.is_empty() {
            problems.push("llm.command is required".to_string());
        } else if self.llm.command[0].trim().is_empty() {
            problems.push("llm.command program must not be empty".to_string());
        }
        if self.llm.timeout_secs == 0 {
            problems.push("llm.timeout_secs must be greater than 0".to_string());
        }
        if self.llm.max_output_bytes == 0 {
            problems.push("llm.max_output_bytes must be greater than 0".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RelayError::Config {
                reason: problems.join("; "),
            })
        }
    }

    pub fn role(&self) -> RelayResult<Role> {
        self.role.ok_or_else(|| RelayError::Config {
            reason: "role is required".to_string(),
        })
    }

    /// The configured agent id, or `<role>-<pid>`.
    pub fn agent_id(&self) -> RelayResult<String> {
        match &self.agent_id {
            Some(id) => Ok(id.clone()),
            None => Ok(format!("{}-{}", self.role()?, std::process::id())),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}
