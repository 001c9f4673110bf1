//! The relay dispatcher: lifecycle owner and per-Command step runner.
//!
//! Every Command goes through the same pipeline:
//!
//!   Validate → Pin version → Deadline → Busy → Route → Receipt lookup
//!     → (hit) Replay
//!     → (miss) Role handler → Write artifacts → Emit artifacts → Emit terminal → Save receipt
//!
//! A role handler is never invoked for a `(task_id, action, idempotency_key)`
//! that already has a receipt. Artifacts are written and announced before
//! the receipt that records them, so a crash in between can only cause a
//! re-execution on retry, never a receipt pointing at missing files.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relay_contracts::{
    agent::{AgentStatus, Role},
    command::Command,
    error::{RelayError, RelayResult},
    event::Artifact,
    log::LogLevel,
    message::{decode_line, Message},
    receipt::{Receipt, TerminalRecord},
};
use relay_emit::Emitter;

use crate::{
    heartbeat::{HeartbeatSettings, Heartbeater},
    outcome::{OutputDocument, RoleOutcome},
    state::AgentState,
    table::DispatchTable,
    traits::{ArtifactSink, ReceiptStore},
};

/// Drives one agent process.
///
/// Construct one dispatcher per process. It owns the session's pinned
/// snapshot and processes at most one Command at a time.
pub struct Dispatcher<W> {
    role: Role,
    emitter: Emitter<W>,
    state: AgentState,
    table: DispatchTable,
    receipts: Arc<dyn ReceiptStore>,
    artifacts: Arc<dyn ArtifactSink>,
    heartbeat: HeartbeatSettings,
    pinned_snapshot: Option<String>,
}

impl<W> Dispatcher<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        role: Role,
        emitter: Emitter<W>,
        table: DispatchTable,
        receipts: Arc<dyn ReceiptStore>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            role,
            emitter,
            state: AgentState::new(),
            table,
            receipts,
            artifacts,
            heartbeat: HeartbeatSettings::default(),
            pinned_snapshot: None,
        }
    }

    pub fn with_heartbeat(mut self, settings: HeartbeatSettings) -> Self {
        self.heartbeat = settings;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn emitter(&self) -> &Emitter<W> {
        &self.emitter
    }

    pub fn pinned_snapshot(&self) -> Option<&str> {
        self.pinned_snapshot.as_deref()
    }

    // ── Run loop ──────────────────────────────────────────────────────────────

    /// Run until end of input, cancellation, or a fatal error.
    ///
    /// The first heartbeat (`seq` 1, `starting`) is written before any
    /// Command is read. On every exit path the heartbeat task is stopped and
    /// one final `stopping` heartbeat is written.
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned: malformed input and output stream
    /// failures. End of input and cancellation return `Ok(())`.
    pub async fn run<R>(mut self, reader: R, cancel: CancellationToken) -> RelayResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut heartbeater = Heartbeater::new(
            self.emitter.clone(),
            self.state.clone(),
            self.heartbeat.include_stats,
        );
        heartbeater.beat().await?;
        self.state.set_status(AgentStatus::Ready);
        info!(
            role = %self.role,
            agent_id = %self.emitter.agent().agent_id,
            "agent ready"
        );

        let heartbeat_cancel = cancel.child_token();
        let heartbeat_task = tokio::spawn(
            heartbeater.run(self.heartbeat.interval, heartbeat_cancel.clone()),
        );

        let result = self.command_loop(reader, &cancel).await;

        self.state.set_status(AgentStatus::Stopping);
        heartbeat_cancel.cancel();
        match heartbeat_task.await {
            Ok(mut heartbeater) => {
                let final_beat = heartbeater.beat().await;
                result.and(final_beat)
            }
            Err(e) => {
                error!(error = %e, "heartbeat task failed; no final heartbeat");
                result
            }
        }
    }

    async fn command_loop<R>(&mut self, reader: R, cancel: &CancellationToken) -> RelayResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("cancellation received, stopping");
                    return Ok(());
                }
                next = lines.next_line() => next.map_err(|e| RelayError::Decode {
                    reason: format!("cannot read input: {}", e),
                })?,
            };

            let Some(line) = next else {
                info!("input closed, stopping");
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }

            match decode_line(&line)? {
                Message::Command(cmd) => self.dispatch(&cmd).await?,
                other => debug!(kind = ?other.kind(), "ignoring non-command message"),
            }
        }
    }

    // ── Per-Command pipeline ──────────────────────────────────────────────────

    /// Process one Command to its terminal event.
    ///
    /// Every non-fatal failure is reported as an `error` event and swallowed;
    /// only output stream failures are returned.
    pub async fn dispatch(&mut self, cmd: &Command) -> RelayResult<()> {
        self.state.touch();

        if let Err(err) = self.admit(cmd) {
            warn!(
                message_id = %cmd.message_id,
                task_id = %cmd.task_id,
                code = err.code(),
                reason = %err,
                "command rejected"
            );
            return self.report(cmd, &err).await;
        }

        let _busy = self.state.busy_guard(&cmd.task_id);
        info!(
            message_id = %cmd.message_id,
            task_id = %cmd.task_id,
            action = ?cmd.action,
            "dispatching command"
        );

        match self.execute(cmd).await {
            Ok(()) => Ok(()),
            Err(err @ RelayError::Transport { .. }) => Err(err),
            Err(err) => {
                let err = if err.has_specific_code() {
                    err
                } else {
                    RelayError::CommandFailed {
                        reason: err.to_string(),
                    }
                };
                warn!(task_id = %cmd.task_id, code = err.code(), reason = %err, "command failed");
                self.report(cmd, &err).await
            }
        }
    }

    /// Checks that run before the agent turns busy: field contract, version
    /// pin, deadline.
    fn admit(&mut self, cmd: &Command) -> RelayResult<()> {
        cmd.validate()?;

        let received = &cmd.version.snapshot_id;
        match &self.pinned_snapshot {
            None => {
                info!(snapshot_id = %received, "pinning session snapshot");
                self.pinned_snapshot = Some(received.clone());
            }
            Some(pinned) if pinned != received => {
                return Err(RelayError::VersionMismatch {
                    pinned: pinned.clone(),
                    received: received.clone(),
                });
            }
            Some(_) => {}
        }

        if cmd.is_expired(Utc::now()) {
            return Err(RelayError::DeadlineExceeded {
                deadline: cmd
                    .deadline
                    .map(|deadline| deadline.to_rfc3339())
                    .unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn execute(&self, cmd: &Command) -> RelayResult<()> {
        let action = cmd.require_action()?;

        let handler = match self.table.lookup(self.role, action) {
            Ok(handler) => handler,
            Err(err) => return self.report(cmd, &err).await,
        };

        let lookup = self
            .receipts
            .find_receipt_by_ik(&cmd.task_id, action, &cmd.idempotency_key)
            .map_err(|e| match e {
                RelayError::ReceiptLookup { .. } => e,
                other => RelayError::ReceiptLookup {
                    reason: other.to_string(),
                },
            })?;

        if let Some(receipt) = lookup.receipt {
            info!(
                task_id = %cmd.task_id,
                step = receipt.step,
                source = ?lookup.source,
                location = %lookup.location.display(),
                "receipt found, replaying"
            );
            return self.replay(cmd, &receipt).await;
        }

        debug!(task_id = %cmd.task_id, action = %action, "no receipt, invoking role handler");
        let RoleOutcome {
            event,
            status: outcome_status,
            payload,
            outputs,
        } = handler.handle(cmd).await?;

        let artifacts = self.write_outputs(cmd, outputs).await?;
        for artifact in &artifacts {
            self.emitter.emit_artifact(cmd, artifact).await?;
        }

        let mut terminal = self.emitter.new_event(cmd, &event);
        terminal.status = outcome_status;
        terminal.payload = payload;
        terminal.artifacts = artifacts.clone();
        self.emitter.emit(&terminal).await?;

        let receipt = Receipt {
            task_id: cmd.task_id.clone(),
            action,
            step: 0,
            idempotency_key: cmd.idempotency_key.clone(),
            artifacts,
            events: vec![terminal.message_id.clone()],
            terminal: TerminalRecord {
                message_id: terminal.message_id,
                event: terminal.event,
                status: terminal.status,
                payload: terminal.payload,
            },
            created_at: Utc::now(),
        };
        match self.receipts.save_receipt_with_index(receipt) {
            Ok(stored) => {
                info!(
                    task_id = %cmd.task_id,
                    step = stored.receipt.step,
                    location = %stored.location.display(),
                    "receipt saved"
                );
            }
            Err(err) => {
                // The terminal event is already out; a second terminal event
                // would break the one-per-Command contract.
                warn!(task_id = %cmd.task_id, error = %err, "receipt write failed");
                self.emitter
                    .send_log(LogLevel::Warn, "receipt write failed", error_fields(cmd, &err))
                    .await?;
            }
        }
        Ok(())
    }

    /// Write role outputs through the artifact sink.
    ///
    /// A failed required output fails the Command; a failed optional output
    /// is logged and skipped.
    async fn write_outputs(
        &self,
        cmd: &Command,
        outputs: Vec<OutputDocument>,
    ) -> RelayResult<Vec<Artifact>> {
        let mut artifacts = Vec::with_capacity(outputs.len());
        for OutputDocument {
            path,
            content,
            required,
        } in outputs
        {
            let sink = Arc::clone(&self.artifacts);
            let target = path.clone();
            let written = tokio::task::spawn_blocking(move || sink.write_artifact(&target, &content))
                .await
                .map_err(|e| RelayError::ArtifactWrite {
                    path: path.clone(),
                    reason: e.to_string(),
                })
                .and_then(|result| result);

            match written {
                Ok(artifact) => {
                    debug!(path = %artifact.path, size = artifact.size, "artifact written");
                    artifacts.push(artifact);
                }
                Err(err) if required => return Err(as_artifact_error(&path, err)),
                Err(err) => {
                    warn!(path = %path, error = %err, "optional artifact write failed");
                    let mut fields = error_fields(cmd, &err);
                    fields.insert("path".to_string(), Value::String(path));
                    self.emitter
                        .send_log(LogLevel::Warn, "optional artifact write failed", fields)
                        .await?;
                }
            }
        }
        Ok(artifacts)
    }

    /// Re-announce a completed Command from its receipt.
    async fn replay(&self, cmd: &Command, receipt: &Receipt) -> RelayResult<()> {
        for artifact in &receipt.artifacts {
            self.emitter.emit_artifact(cmd, artifact).await?;
        }
        let mut terminal = self.emitter.new_event(cmd, &receipt.terminal.event);
        terminal.status = receipt.terminal.status.clone();
        terminal.payload = receipt.terminal.payload.clone();
        terminal.artifacts = receipt.artifacts.clone();
        self.emitter.emit(&terminal).await
    }

    /// Emit `err` as the Command's terminal `error` event.
    async fn report(&self, cmd: &Command, err: &RelayError) -> RelayResult<()> {
        self.emitter.emit_relay_error(cmd, err).await.map(|_| ())
    }
}

fn as_artifact_error(path: &str, err: RelayError) -> RelayError {
    match err {
        RelayError::WorkspaceEscape { .. }
        | RelayError::ArtifactTooLarge { .. }
        | RelayError::ArtifactWrite { .. } => err,
        other => RelayError::ArtifactWrite {
            path: path.to_string(),
            reason: other.to_string(),
        },
    }
}

fn error_fields(cmd: &Command, err: &RelayError) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("task_id".to_string(), Value::String(cmd.task_id.clone()));
    fields.insert("code".to_string(), Value::String(err.code().to_string()));
    fields.insert("error".to_string(), Value::String(err.to_string()));
    fields
}

// ── Tests ─────────────────────────────────────────────────────────────────────
