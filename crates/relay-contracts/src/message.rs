//! The NDJSON envelope: one JSON object per line, discriminated by `kind`.
//!
//! A reader can call `peek_kind()` to learn what a line carries before
//! decoding the rest of it. `decode_line()` is strict about the
//! discriminator: an unknown `kind` is a fatal decode error.

use serde::{Deserialize, Serialize};

use crate::{
    command::Command,
    error::{RelayError, RelayResult},
    event::Event,
    heartbeat::Heartbeat,
    log::LogRecord,
};

/// The four wire message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Command,
    Event,
    Heartbeat,
    Log,
}

/// A fully decoded wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Message {
    Command(Command),
    Event(Event),
    Heartbeat(Heartbeat),
    Log(LogRecord),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Command(_) => MessageKind::Command,
            Message::Event(_) => MessageKind::Event,
            Message::Heartbeat(_) => MessageKind::Heartbeat,
            Message::Log(_) => MessageKind::Log,
        }
    }
}

#[derive(Deserialize)]
struct KindProbe {
    kind: MessageKind,
}

/// Read only the `kind` discriminator of a line.
pub fn peek_kind(line: &str) -> RelayResult<MessageKind> {
    let probe: KindProbe = serde_json::from_str(line).map_err(|e| RelayError::Decode {
        reason: format!("cannot read message kind: {}", e),
    })?;
    Ok(probe.kind)
}

/// Decode one line into a `Message`.
pub fn decode_line(line: &str) -> RelayResult<Message> {
    serde_json::from_str(line.trim_end_matches(['\r', '\n'])).map_err(|e| RelayError::Decode {
        reason: e.to_string(),
    })
}

/// Encode a message as one compact JSON object followed by `\n`.
///
/// `serde_json` escapes control characters inside strings, so the encoded
/// object itself never contains a raw newline.
pub fn encode_line(message: &Message) -> RelayResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message).map_err(|e| RelayError::Encode {
        reason: e.to_string(),
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}
