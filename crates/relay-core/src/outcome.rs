//! What role logic hands back to the dispatcher.

use serde_json::{Map, Value};

use relay_contracts::command::Command;

/// A file the role wants written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDocument {
    /// Workspace-relative destination.
    pub path: String,
    pub content: Vec<u8>,
    /// A required document that fails to write fails the Command; an
    /// optional one only produces a warning.
    pub required: bool,
}

/// The terminal result of one role invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleOutcome {
    /// Terminal event name, e.g. `orchestration.proposed_tasks`.
    pub event: String,
    /// `success` or `needs_input`.
    pub status: String,
    pub payload: Map<String, Value>,
    pub outputs: Vec<OutputDocument>,
}

impl RoleOutcome {
    pub fn new(event: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            status: status.into(),
            payload: Map::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Attach `content` to every expected output of `cmd`, or to
    /// `fallback_path` when the Command names none.
    pub fn with_document_for(
        mut self,
        cmd: &Command,
        content: Vec<u8>,
        fallback_path: Option<String>,
    ) -> Self {
        if cmd.expected_outputs.is_empty() {
            if let Some(path) = fallback_path {
                self.outputs.push(OutputDocument {
                    path,
                    content,
                    required: true,
                });
            }
        } else {
            self.outputs
                .extend(cmd.expected_outputs.iter().map(|expected| OutputDocument {
                    path: expected.path.clone(),
                    content: content.clone(),
                    required: expected.required,
                }));
        }
        self
    }
}
