//! The orchestration role: `intake` and `task_discovery`.
//!
//! Flow for one Command:
//!   1. Prompt the LLM for a JSON `Proposal`
//!   2. Parse and normalize it (unnamed tasks get positional ids)
//!   3. Questions without tasks → `orchestration.needs_clarification` (needs_input)
//!   4. A detected plan conflict → `orchestration.plan_conflict` (needs_input)
//!   5. Otherwise → `orchestration.proposed_tasks` (success)
//!
//! The proposal document is written to every expected output, or to
//! `orchestration/<task_id>/<action>.json` when the Command names none.

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

use crate::{
    prompts::orchestration_prompt,
    proposal::{detect_plan_conflict, parse_proposal, Proposal},
};

/// Where the proposal goes when a Command lists no expected outputs.
pub fn default_output_path(task_id: &str, action: Action) -> String {
    format!("orchestration/{}/{}.json", task_id, action.as_str())
}

pub struct OrchestrationRole {
    llm: Arc<dyn LlmCaller>,
}

impl OrchestrationRole {
    pub fn new(llm: Arc<dyn LlmCaller>) -> Self {
        Self { llm }
    }

    fn document(cmd: &Command, action: Action, proposal: &Proposal) -> RelayResult<Vec<u8>> {
        let doc = json!({
            "task_id": cmd.task_id,
            "action": action,
            "snapshot_id": cmd.version.snapshot_id,
            "tasks": proposal.tasks,
            "candidates": proposal.candidates,
            "notes": proposal.notes,
            "questions": proposal.questions,
        });
        let mut bytes = serde_json::to_vec_pretty(&doc).map_err(|e| RelayError::Encode {
            reason: e.to_string(),
        })?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[async_trait]
impl RoleHandler for OrchestrationRole {
    async fn handle(&self, cmd: &Command) -> RelayResult<RoleOutcome> {
        let action = cmd.require_action()?;
        let prompt = orchestration_prompt(cmd, action);
        debug!(task_id = %cmd.task_id, prompt_bytes = prompt.len(), "calling llm for proposal");

        let response = self.llm.call(&prompt).await?;
        let proposal = parse_proposal(&response)?.normalize(&cmd.task_id)?;
        let document = Self::document(cmd, action, &proposal)?;
        let fallback = Some(default_output_path(&cmd.task_id, action));

        if proposal.needs_clarification() {
            info!(
                task_id = %cmd.task_id,
                questions = proposal.questions.len(),
                "proposal needs clarification"
            );
            let mut payload = Map::new();
            payload.insert("questions".to_string(), json!(proposal.questions));
            if !proposal.notes.is_empty() {
                payload.insert("notes".to_string(), Value::String(proposal.notes.clone()));
            }
            return Ok(RoleOutcome::new(names::NEEDS_CLARIFICATION, status::NEEDS_INPUT)
                .with_payload(payload)
                .with_document_for(cmd, document, fallback));
        }

        if let Some(conflict) = detect_plan_conflict(&proposal.candidates) {
            info!(task_id = %cmd.task_id, reason = %conflict.reason, "plan conflict");
            let mut payload = Map::new();
            payload.insert("reason".to_string(), Value::String(conflict.reason));
            payload.insert("candidates".to_string(), json!(conflict.candidates));
            return Ok(RoleOutcome::new(names::PLAN_CONFLICT, status::NEEDS_INPUT)
                .with_payload(payload)
                .with_document_for(cmd, document, fallback));
        }

        info!(
            task_id = %cmd.task_id,
            tasks = proposal.tasks.len(),
            candidates = proposal.candidates.len(),
            "proposed tasks"
        );
        let mut payload = Map::new();
        payload.insert("tasks".to_string(), json!(proposal.tasks));
        payload.insert("candidates".to_string(), json!(proposal.candidates));
        payload.insert("notes".to_string(), Value::String(proposal.notes.clone()));
        if !proposal.questions.is_empty() {
            payload.insert("questions".to_string(), json!(proposal.questions));
        }
        Ok(RoleOutcome::new(names::PROPOSED_TASKS, status::SUCCESS)
            .with_payload(payload)
            .with_document_for(cmd, document, fallback))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use relay_contracts::command::{ExpectedOutput, Version};

    use super::*;

    struct FixedLlm {
        response: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmCaller for FixedLlm {
        async fn call(&self, prompt: &str) -> RelayResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.response.clone())
        }
    }

    fn role(response: &str) -> (OrchestrationRole, Arc<FixedLlm>) {
        let llm = Arc::new(FixedLlm {
            response: response.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        (OrchestrationRole::new(Arc::clone(&llm) as Arc<dyn LlmCaller>), llm)
    }

    fn command(action: Action) -> Command {
        Command {
            message_id: "m".to_string(),
            task_id: "task-1".to_string(),
            idempotency_key: "ik".to_string(),
            action: Some(action),
            version: Version::snapshot("snap-001"),
            ..Command::default()
        }
    }

    #[tokio::test]
    async fn tasks_become_a_proposal() {
        let (role, llm) = role(r#"{"tasks": [{"title": "a"}, {"title": "b"}], "notes": "n"}"#);
        let outcome = role.handle(&command(Action::Intake)).await.unwrap();

        assert_eq!(outcome.event, names::PROPOSED_TASKS);
        assert_eq!(outcome.status, status::SUCCESS);
        assert_eq!(outcome.payload["tasks"][1]["id"], json!("task-1-2"));
        assert_eq!(outcome.payload["notes"], json!("n"));
        assert_eq!(outcome.outputs.len(), 1);
        assert_eq!(outcome.outputs[0].path, "orchestration/task-1/intake.json");
        assert!(outcome.outputs[0].required);
        assert_eq!(llm.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn questions_only_need_clarification() {
        let (role, _llm) = role(r#"{"questions": ["Which target?", "Which license?"]}"#);
        let outcome = role.handle(&command(Action::TaskDiscovery)).await.unwrap();

        assert_eq!(outcome.event, names::NEEDS_CLARIFICATION);
        assert_eq!(outcome.status, status::NEEDS_INPUT);
        assert_eq!(outcome.payload["questions"].as_array().unwrap().len(), 2);
        assert_eq!(outcome.outputs[0].path, "orchestration/task-1/task_discovery.json");
    }

    #[tokio::test]
    async fn document_goes_to_every_expected_output() {
        let (role, _llm) = role(r#"{"tasks": [{"title": "a"}]}"#);
        let mut cmd = command(Action::Intake);
        cmd.expected_outputs = vec![
            ExpectedOutput::required("plan/tasks.json"),
            ExpectedOutput::optional("plan/copy.json"),
        ];
        let outcome = role.handle(&cmd).await.unwrap();

        let paths: Vec<(&str, bool)> = outcome
            .outputs
            .iter()
            .map(|o| (o.path.as_str(), o.required))
            .collect();
        assert_eq!(paths, vec![("plan/tasks.json", true), ("plan/copy.json", false)]);
        assert_eq!(outcome.outputs[0].content, outcome.outputs[1].content);

        let doc: Value = serde_json::from_slice(&outcome.outputs[0].content).unwrap();
        assert_eq!(doc["snapshot_id"], json!("snap-001"));
        assert_eq!(doc["action"], json!("intake"));
    }

    #[tokio::test]
    async fn unparsable_response_is_invalid() {
        let (role, _llm) = role("sorry, no plan today");
        let err = role.handle(&command(Action::Intake)).await.unwrap_err();
        assert_eq!(err.code(), "invalid_llm_response");
    }
}
