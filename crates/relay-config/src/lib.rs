//! # relay-config
//!
//! TOML configuration for relay agents.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use relay_config::AgentConfig;
//!
//! let mut config = AgentConfig::from_file(Path::new("agent.toml"))?;
//! config.workspace = "/srv/build".into();
//! config.validate()?;
//! ```

pub mod config;

pub use config::{AgentConfig, LlmConfig};

// ── Tests ─────────────────────────────────────────────────────────────────────
