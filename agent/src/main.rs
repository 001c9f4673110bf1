//! relay-agent: one role of the build-orchestration system.
//!
//! Reads Commands as NDJSON on stdin and writes Events, heartbeats and
//! logs as NDJSON on stdout. Operator diagnostics go to stderr.
//!
//! Usage:
//!   relay-agent --config agent.toml
//!   relay-agent --role builder --workspace /srv/build -- llm-cli --json
//!
//! Exit status is 0 on end of input or shutdown signal, 1 on a stream or
//! configuration failure.

mod llm;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relay_config::AgentConfig;
use relay_contracts::{
    agent::{AgentRef, Role},
    error::RelayResult,
};
use relay_core::{
    traits::{ArtifactSink, LlmCaller, ReceiptStore},
    Dispatcher, HeartbeatSettings,
};
use relay_emit::{Emitter, LineWriter};
use relay_store::{AtomicArtifactWriter, FsReceiptStore};

use crate::llm::ProcessLlmCaller;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Relay agent: speaks the NDJSON command/event protocol on stdio.
///
/// Flags override values from the config file.
#[derive(Parser, Debug)]
#[command(name = "relay-agent", about = "NDJSON build-orchestration agent")]
struct Cli {
    /// TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// builder, reviewer, spec_maintainer or orchestration.
    #[arg(long)]
    role: Option<Role>,

    #[arg(long)]
    agent_id: Option<String>,

    /// Root for artifacts and receipts.
    #[arg(long)]
    workspace: Option<PathBuf>,

    #[arg(long)]
    heartbeat_interval_secs: Option<u64>,

    /// Leave rss and cpu usage out of heartbeats.
    #[arg(long)]
    no_heartbeat_stats: bool,

    #[arg(long)]
    max_message_bytes: Option<usize>,

    #[arg(long)]
    max_artifact_bytes: Option<u64>,

    #[arg(long)]
    llm_timeout_secs: Option<u64>,

    /// LLM program and arguments, given after `--`.
    #[arg(last = true)]
    llm_command: Vec<String>,
}

impl Cli {
    fn into_config(self) -> RelayResult<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_file(path)?,
            None => AgentConfig::default(),
        };
        if self.role.is_some() {
            config.role = self.role;
        }
        if self.agent_id.is_some() {
            config.agent_id = self.agent_id;
        }
        if let Some(workspace) = self.workspace {
            config.workspace = workspace;
        }
        if let Some(secs) = self.heartbeat_interval_secs {
            config.heartbeat_interval_secs = secs;
        }
        if self.no_heartbeat_stats {
            config.heartbeat_stats = false;
        }
        if let Some(bytes) = self.max_message_bytes {
            config.max_message_bytes = bytes;
        }
        if let Some(bytes) = self.max_artifact_bytes {
            config.max_artifact_bytes = bytes;
        }
        if let Some(secs) = self.llm_timeout_secs {
            config.llm.timeout_secs = secs;
        }
        if !self.llm_command.is_empty() {
            config.llm.command = self.llm_command;
        }
        config.validate()?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // stdout carries the protocol; keep diagnostics on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    // Exit explicitly: a pending stdin read would otherwise hold the
    // runtime open after a signal.
    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("relay-agent: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> RelayResult<()> {
    let config = cli.into_config()?;
    let role = config.role()?;
    let agent_id = config.agent_id()?;

    let writer = AtomicArtifactWriter::new(&config.workspace)?
        .with_max_bytes(config.max_artifact_bytes);
    let receipts = FsReceiptStore::from_writer(writer.clone());
    let llm: Arc<dyn LlmCaller> = Arc::new(ProcessLlmCaller::from_config(&config.llm)?);
    let table = relay_roles::dispatch_table(role, llm)?;

    let emitter = Emitter::new(
        LineWriter::new(tokio::io::stdout()),
        AgentRef::new(role, agent_id.clone()),
    )
    .with_max_message_bytes(config.max_message_bytes);

    let dispatcher = Dispatcher::new(
        role,
        emitter,
        table,
        Arc::new(receipts) as Arc<dyn ReceiptStore>,
        Arc::new(writer) as Arc<dyn ArtifactSink>,
    )
    .with_heartbeat(HeartbeatSettings {
        interval: config.heartbeat_interval(),
        include_stats: config.heartbeat_stats,
    });

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received"),
            Err(e) => warn!(error = %e, "cannot listen for interrupt"),
        }
        signal_cancel.cancel();
    });

    info!(
        role = %role,
        agent_id = %agent_id,
        workspace = %config.workspace.display(),
        "starting agent"
    );
    dispatcher
        .run(BufReader::new(tokio::io::stdin()), cancel)
        .await
}
