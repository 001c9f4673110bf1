//! The LLM-backed worker roles: builder, reviewer and spec maintainer.
//!
//! Each action makes one LLM call. The response text is the content of
//! every expected output; without expected outputs it travels inline in
//! the terminal event's payload.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use relay_contracts::{
    command::{Action, Command},
    error::{RelayError, RelayResult},
    event::{names, status},
};
use relay_core::{traits::LlmCaller, traits::RoleHandler, RoleOutcome};

use crate::prompts::worker_prompt;

/// Terminal event name for a worker action.
pub fn completion_event(action: Action) -> RelayResult<&'static str> {
    match action {
        Action::Implement => Ok(names::BUILD_COMPLETED),
        Action::ImplementChanges => Ok(names::BUILD_CHANGES_APPLIED),
        Action::Review => Ok(names::REVIEW_COMPLETED),
        Action::UpdateSpec => Ok(names::SPEC_UPDATED),
        Action::Intake | Action::TaskDiscovery => Err(RelayError::UnsupportedAction {
            role: "worker".to_string(),
            action: action.to_string(),
        }),
    }
}

pub struct WorkerRole {
    llm: Arc<dyn LlmCaller>,
}

impl WorkerRole {
    pub fn new(llm: Arc<dyn LlmCaller>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl RoleHandler for WorkerRole {
    async fn handle(&self, cmd: &Command) -> RelayResult<RoleOutcome> {
        let action = cmd.require_action()?;
        let event = completion_event(action)?;
        let prompt = worker_prompt(cmd, action);
        debug!(task_id = %cmd.task_id, action = %action, prompt_bytes = prompt.len(), "calling llm");

        let response = self.llm.call(&prompt).await?;
        if response.trim().is_empty() {
            return Err(RelayError::InvalidResponse {
                reason: format!("empty response for {}", action),
            });
        }

        let mut payload = Map::new();
        if cmd.expected_outputs.is_empty() {
            payload.insert("response".to_string(), Value::String(response.clone()));
        } else {
            let outputs: Vec<&str> = cmd.expected_outputs.iter().map(|o| o.path.as_str()).collect();
            payload.insert("outputs".to_string(), json!(outputs));
            payload.insert("bytes".to_string(), json!(response.len()));
        }

        info!(task_id = %cmd.task_id, event, bytes = response.len(), "worker action complete");
        Ok(RoleOutcome::new(event, status::SUCCESS)
            .with_payload(payload)
            .with_document_for(cmd, response.into_bytes(), None))
    }
}
