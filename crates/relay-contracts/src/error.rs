//! Runtime error types for the relay agent.
//!
//! All fallible operations return `RelayResult<T>`. Each variant maps to a
//! machine-readable `code()` that is placed in the payload of the `error`
//! event reporting it. Only `is_fatal()` errors terminate the run loop.

use thiserror::Error;

/// The unified error type for the relay runtime.
#[derive(Debug, Error)]
pub enum RelayError {
    /// An input line could not be decoded. The stream is no longer trusted.
    #[error("decode error: {reason}")]
    Decode { reason: String },

    /// A message could not be serialized.
    #[error("encode error: {reason}")]
    Encode { reason: String },

    /// Writing to the output stream failed.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// A decoded Command violates the field contract.
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    /// The Command was issued against a different snapshot than the one
    /// pinned for this session.
    #[error("snapshot '{received}' does not match pinned snapshot '{pinned}'")]
    VersionMismatch { pinned: String, received: String },

    #[error("action {action} not supported for role {role}")]
    UnsupportedAction { action: String, role: String },

    #[error("command deadline {deadline} has passed")]
    DeadlineExceeded { deadline: String },

    #[error("receipt lookup failed: {reason}")]
    ReceiptLookup { reason: String },

    #[error("receipt write failed: {reason}")]
    ReceiptWrite { reason: String },

    #[error("llm call failed: {reason}")]
    LlmCall { reason: String },

    #[error("invalid llm response: {reason}")]
    InvalidResponse { reason: String },

    /// A path resolved outside the workspace root.
    #[error("path '{path}' escapes the workspace")]
    WorkspaceEscape { path: String },

    #[error("artifact size {actual} bytes exceeds maximum {max} bytes")]
    ArtifactTooLarge { actual: u64, max: u64 },

    #[error("artifact write failed for '{path}': {reason}")]
    ArtifactWrite { path: String, reason: String },

    /// An encoded message still exceeds the size cap after truncation.
    #[error("message of {size} bytes exceeds cap of {max} bytes after truncation")]
    MessageTooLarge { size: usize, max: usize },

    /// Role logic failed for a reason without a more specific code.
    #[error("command failed: {reason}")]
    CommandFailed { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl RelayError {
    /// The event `code` for this error.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Decode { .. } => "decode_failed",
            RelayError::Encode { .. } => "encode_failed",
            RelayError::Transport { .. } => "transport_failed",
            RelayError::InvalidCommand { .. } => "invalid_command",
            RelayError::VersionMismatch { .. } => "version_mismatch",
            RelayError::UnsupportedAction { .. } => "unsupported_action",
            RelayError::DeadlineExceeded { .. } => "deadline_exceeded",
            RelayError::ReceiptLookup { .. } => "receipt_lookup_failed",
            RelayError::ReceiptWrite { .. } => "receipt_write_failed",
            RelayError::LlmCall { .. } => "llm_call_failed",
            RelayError::InvalidResponse { .. } => "invalid_llm_response",
            RelayError::WorkspaceEscape { .. }
            | RelayError::ArtifactTooLarge { .. }
            | RelayError::ArtifactWrite { .. } => "artifact_write_failed",
            RelayError::MessageTooLarge { .. } => "message_too_large",
            RelayError::CommandFailed { .. } => "command_failed",
            RelayError::Config { .. } => "config_error",
        }
    }

    /// Fatal errors end the run loop; everything else is reported as an
    /// `error` event and the loop continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Decode { .. } | RelayError::Transport { .. } | RelayError::Config { .. }
        )
    }

    /// True when role logic produced an error with its own event code, so
    /// the dispatcher reports that code instead of `command_failed`.
    pub fn has_specific_code(&self) -> bool {
        matches!(
            self,
            RelayError::ReceiptLookup { .. }
                | RelayError::LlmCall { .. }
                | RelayError::InvalidResponse { .. }
                | RelayError::WorkspaceEscape { .. }
                | RelayError::ArtifactTooLarge { .. }
                | RelayError::ArtifactWrite { .. }
        )
    }
}

/// Convenience alias used throughout the relay crates.
pub type RelayResult<T> = Result<T, RelayError>;
