//! The event emitter: envelope construction and stream output.
//!
//! `Emitter::new_event` stamps identity, correlation and version from the
//! originating Command so callers cannot forget them. Every message leaves
//! through the shared `LineWriter`, events via the size-capped encoder and
//! logs after redaction.

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::io::AsyncWrite;
use tracing::debug;
use uuid::Uuid;

use relay_contracts::{
    agent::AgentRef,
    command::Command,
    error::{RelayError, RelayResult},
    event::{names, status, Artifact, Event},
    heartbeat::Heartbeat,
    log::{LogLevel, LogRecord},
    message::{encode_line, Message},
};

use crate::{
    redact::redact_fields,
    truncate::{encode_event_capped, preview_payload, DEFAULT_MAX_MESSAGE_BYTES},
    writer::LineWriter,
};

pub struct Emitter<W> {
    writer: LineWriter<W>,
    agent: AgentRef,
    max_message_bytes: usize,
}

impl<W> Clone for Emitter<W> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            agent: self.agent.clone(),
            max_message_bytes: self.max_message_bytes,
        }
    }
}

impl<W> Emitter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: LineWriter<W>, agent: AgentRef) -> Self {
        Self {
            writer,
            agent,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    pub fn agent(&self) -> &AgentRef {
        &self.agent
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    pub fn writer(&self) -> &LineWriter<W> {
        &self.writer
    }

    /// A fresh event answering `cmd`.
    ///
    /// The correlation id falls back to the Command's message id when the
    /// coordinator did not set one.
    pub fn new_event(&self, cmd: &Command, name: &str) -> Event {
        let correlation_id = if cmd.correlation_id.is_empty() {
            cmd.message_id.clone()
        } else {
            cmd.correlation_id.clone()
        };
        Event {
            message_id: Uuid::new_v4().to_string(),
            correlation_id,
            task_id: cmd.task_id.clone(),
            from: self.agent.clone(),
            event: name.to_string(),
            status: String::new(),
            payload: Map::new(),
            artifacts: Vec::new(),
            observed_version: Some(cmd.version.clone()),
            occurred_at: Utc::now(),
        }
    }

    pub fn encode_event_capped(&self, event: &Event) -> RelayResult<Vec<u8>> {
        encode_event_capped(event, self.max_message_bytes)
    }

    pub async fn emit(&self, event: &Event) -> RelayResult<()> {
        let line = self.encode_event_capped(event)?;
        debug!(
            event = %event.event,
            status = %event.status,
            task_id = %event.task_id,
            bytes = line.len(),
            "emitting event"
        );
        self.writer.write_line(&line).await
    }

    /// Emit one `artifact.produced` event for `artifact`.
    pub async fn emit_artifact(&self, cmd: &Command, artifact: &Artifact) -> RelayResult<Event> {
        let mut event = self.new_event(cmd, names::ARTIFACT_PRODUCED);
        event.status = status::SUCCESS.to_string();
        event
            .payload
            .insert("path".to_string(), Value::String(artifact.path.clone()));
        event.artifacts.push(artifact.clone());
        self.emit(&event).await?;
        Ok(event)
    }

    /// Emit a failed `error` event with `code` and `message` in its payload.
    pub async fn emit_error(&self, cmd: &Command, code: &str, message: &str) -> RelayResult<Event> {
        let mut event = self.new_event(cmd, names::ERROR);
        event.status = status::FAILED.to_string();
        event
            .payload
            .insert("code".to_string(), Value::String(code.to_string()));
        event
            .payload
            .insert("message".to_string(), Value::String(message.to_string()));
        self.emit(&event).await?;
        Ok(event)
    }

    /// Emit `err` as an error event under its own code.
    pub async fn emit_relay_error(&self, cmd: &Command, err: &RelayError) -> RelayResult<Event> {
        self.emit_error(cmd, err.code(), &err.to_string()).await
    }

    /// Write a redacted log line.
    pub async fn send_log(
        &self,
        level: LogLevel,
        message: &str,
        fields: Map<String, Value>,
    ) -> RelayResult<()> {
        let mut record = LogRecord {
            level,
            message: message.to_string(),
            fields: redact_fields(&fields),
            timestamp: Utc::now(),
        };
        let mut line = encode_line(&Message::Log(record.clone()))?;
        if line.len() > self.max_message_bytes {
            record.fields = preview_payload(&record.fields, self.max_message_bytes)?;
            line = encode_line(&Message::Log(record))?;
        }
        self.writer.write_line(&line).await
    }

    pub async fn send_heartbeat(&self, heartbeat: &Heartbeat) -> RelayResult<()> {
        let line = encode_line(&Message::Heartbeat(heartbeat.clone()))?;
        self.writer.write_line(&line).await
    }
}
