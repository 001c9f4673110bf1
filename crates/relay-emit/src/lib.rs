//! # relay-emit
//!
//! Output side of the relay protocol.
//!
//! - [`LineWriter`] serializes whole lines onto the shared output stream.
//! - [`Emitter`] builds events from Commands and writes events, logs and
//!   heartbeats through it.
//! - [`truncate`] keeps every event under the message cap with
//!   deterministic, detectable truncation.
//! - [`redact`] scrubs secret-looking log fields.

pub mod emitter;
pub mod redact;
pub mod truncate;
pub mod writer;

pub use emitter::Emitter;
pub use redact::{redact_fields, REDACTED};
pub use truncate::{encode_event_capped, DEFAULT_MAX_MESSAGE_BYTES};
pub use writer::LineWriter;

// ── Tests ─────────────────────────────────────────────────────────────────────
