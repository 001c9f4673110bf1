//! # relay-roles
//!
//! The role logic behind the dispatch table.
//!
//! - `orchestration` turns a request into proposed tasks (or questions)
//! - `worker` covers builder, reviewer and spec maintainer actions
//!
//! Both go through an `LlmCaller`, so tests and alternative backends can
//! swap the model out without touching the dispatcher.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_roles::dispatch_table;
//!
//! let table = dispatch_table(Role::Orchestration, llm)?;
//! let dispatcher = Dispatcher::new(Role::Orchestration, emitter, table, receipts, artifacts);
//! ```

pub mod orchestration;
pub mod prompts;
pub mod proposal;
pub mod worker;

use std::sync::Arc;

use tracing::debug;

use relay_contracts::{agent::Role, error::RelayResult};
use relay_core::{
    traits::{LlmCaller, RoleHandler},
    DispatchTable,
};

pub use orchestration::OrchestrationRole;
pub use proposal::{CandidatePlan, DerivedTask, PlanConflict, Proposal};
pub use worker::WorkerRole;

/// Register the handler for every action `role` supports.
pub fn register_all(
    role: Role,
    table: &mut DispatchTable,
    llm: Arc<dyn LlmCaller>,
) -> RelayResult<()> {
    let handler: Arc<dyn RoleHandler> = match role {
        Role::Orchestration => Arc::new(OrchestrationRole::new(llm)),
        Role::Builder | Role::Reviewer | Role::SpecMaintainer => Arc::new(WorkerRole::new(llm)),
    };
    for &action in role.actions() {
        table.register(role, action, Arc::clone(&handler))?;
        debug!(role = %role, action = %action, "registered handler");
    }
    Ok(())
}

/// A dispatch table holding exactly the handlers for `role`.
pub fn dispatch_table(role: Role, llm: Arc<dyn LlmCaller>) -> RelayResult<DispatchTable> {
    let mut table = DispatchTable::new();
    register_all(role, &mut table, llm)?;
    Ok(table)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::io::BufReader;
    use tokio_util::sync::CancellationToken;

    use relay_contracts::{
        agent::{AgentRef, AgentStatus},
        command::{Action, Command, ExpectedOutput, Version},
        error::RelayError,
        event::{names, status, Event},
        heartbeat::Heartbeat,
        message::{decode_line, encode_line, Message},
    };
    use relay_core::{
        traits::{ArtifactSink, ReceiptStore},
        Dispatcher, HeartbeatSettings,
    };
    use relay_emit::{Emitter, LineWriter};
    use relay_store::{AtomicArtifactWriter, FsReceiptStore};

    use super::*;

    const TWO_TASKS: &str = r#"{
        "tasks": [
            {"title": "Write the parser", "agent_type": "builder"},
            {"title": "Review the parser", "agent_type": "reviewer"}
        ],
        "notes": "small"
    }"#;

    // ── Mock implementations ──────────────────────────────────────────────────

    /// Answers every prompt with the same text, optionally after a delay,
    /// and counts calls.
    struct ScriptedLlm {
        response: String,
        delay: Duration,
        calls: Mutex<usize>,
    }

    impl ScriptedLlm {
        fn new(response: &str) -> Arc<Self> {
            Self::slow(response, Duration::ZERO)
        }

        fn slow(response: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                response: response.to_string(),
                delay,
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmCaller for ScriptedLlm {
        async fn call(&self, _prompt: &str) -> RelayResult<String> {
            *self.calls.lock().unwrap() += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.response.clone())
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    struct Agent {
        dispatcher: Dispatcher<Vec<u8>>,
        emitter: Emitter<Vec<u8>>,
        llm: Arc<ScriptedLlm>,
        _workspace: tempfile::TempDir,
        root: std::path::PathBuf,
    }

    fn agent(role: Role, response: &str) -> Agent {
        agent_with(role, ScriptedLlm::new(response), Duration::from_secs(3600))
    }

    fn agent_with(role: Role, llm: Arc<ScriptedLlm>, heartbeat_interval: Duration) -> Agent {
        let workspace = tempfile::tempdir().unwrap();
        let writer = AtomicArtifactWriter::new(workspace.path()).unwrap();
        let root = writer.root().to_path_buf();
        let receipts = FsReceiptStore::from_writer(writer.clone());
        let table = dispatch_table(role, Arc::clone(&llm) as Arc<dyn LlmCaller>).unwrap();
        let emitter = Emitter::new(
            LineWriter::new(Vec::new()),
            AgentRef::new(role, format!("{}-test", role)),
        );
        let dispatcher = Dispatcher::new(
            role,
            emitter.clone(),
            table,
            Arc::new(receipts) as Arc<dyn ReceiptStore>,
            Arc::new(writer) as Arc<dyn ArtifactSink>,
        )
        .with_heartbeat(HeartbeatSettings {
            interval: heartbeat_interval,
            include_stats: false,
        });
        Agent {
            dispatcher,
            emitter,
            llm,
            _workspace: workspace,
            root,
        }
    }

    fn intake(snapshot: &str, ik: &str) -> Command {
        Command {
            message_id: format!("msg-{}", ik),
            task_id: "task-1".to_string(),
            idempotency_key: ik.to_string(),
            agent_type: Some(Role::Orchestration),
            action: Some(Action::Intake),
            version: Version::snapshot(snapshot),
            ..Command::default()
        }
    }

    async fn messages(emitter: &Emitter<Vec<u8>>) -> Vec<Message> {
        let shared = emitter.writer().shared();
        let buf = shared.lock().await;
        std::str::from_utf8(&buf)
            .unwrap()
            .lines()
            .map(|line| decode_line(line).unwrap())
            .collect()
    }

    async fn events(emitter: &Emitter<Vec<u8>>) -> Vec<Event> {
        messages(emitter)
            .await
            .into_iter()
            .filter_map(|m| match m {
                Message::Event(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    async fn heartbeats(emitter: &Emitter<Vec<u8>>) -> Vec<Heartbeat> {
        messages(emitter)
            .await
            .into_iter()
            .filter_map(|m| match m {
                Message::Heartbeat(heartbeat) => Some(heartbeat),
                _ => None,
            })
            .collect()
    }

    fn input_stream(commands: &[Command]) -> Vec<u8> {
        let mut input = Vec::new();
        for cmd in commands {
            input.extend(encode_line(&Message::Command(cmd.clone())).unwrap());
        }
        input
    }

    // ── Registration ──────────────────────────────────────────────────────────

    #[test]
    fn tables_cover_each_role_exactly() {
        let llm = ScriptedLlm::new("x");
        for role in [
            Role::Orchestration,
            Role::Builder,
            Role::Reviewer,
            Role::SpecMaintainer,
        ] {
            let table = dispatch_table(role, Arc::clone(&llm) as Arc<dyn LlmCaller>).unwrap();
            assert_eq!(table.len(), role.actions().len());
            for &action in role.actions() {
                assert!(table.lookup(role, action).is_ok());
            }
        }
    }

    #[test]
    fn registering_a_role_twice_fails() {
        let llm = ScriptedLlm::new("x");
        let mut table = dispatch_table(Role::Reviewer, Arc::clone(&llm) as Arc<dyn LlmCaller>)
            .unwrap();
        let err = register_all(Role::Reviewer, &mut table, llm).unwrap_err();
        assert!(matches!(err, RelayError::Config { .. }));
    }

    // ── Scenarios ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn repeated_command_replays_without_calling_the_llm() {
        let mut a = agent(Role::Orchestration, TWO_TASKS);
        let cmd = intake("snap-001", "ik-1");

        a.dispatcher.dispatch(&cmd).await.unwrap();
        a.dispatcher.dispatch(&cmd).await.unwrap();

        assert_eq!(a.llm.calls(), 1);
        let events = events(&a.emitter).await;
        let sequence: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            sequence,
            vec![
                names::ARTIFACT_PRODUCED,
                names::PROPOSED_TASKS,
                names::ARTIFACT_PRODUCED,
                names::PROPOSED_TASKS,
            ]
        );
        assert_eq!(events[0].artifacts, events[2].artifacts);
        assert_eq!(events[1].artifacts[0].sha256, events[3].artifacts[0].sha256);
        assert_eq!(events[3].status, status::SUCCESS);

        let receipt = a.root.join("receipts/task-1/intake-1.json");
        assert!(receipt.is_file());
        assert!(!a.root.join("receipts/task-1/intake-2.json").exists());
    }

    #[tokio::test]
    async fn intake_proposes_two_tasks_and_writes_the_plan() {
        let mut a = agent(Role::Orchestration, TWO_TASKS);
        a.dispatcher.dispatch(&intake("snap-001", "ik-1")).await.unwrap();

        let events = events(&a.emitter).await;
        assert_eq!(events.len(), 2);
        let terminal = &events[1];
        assert_eq!(terminal.event, names::PROPOSED_TASKS);
        assert_eq!(terminal.correlation_id, "msg-ik-1");
        let tasks = terminal.payload["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0]["id"], json!("task-1-1"));
        assert_eq!(tasks[1]["agent_type"], json!("reviewer"));

        let artifact = &terminal.artifacts[0];
        assert_eq!(artifact.path, "orchestration/task-1/intake.json");
        let on_disk = std::fs::read(a.root.join(&artifact.path)).unwrap();
        assert_eq!(artifact.size, on_disk.len() as u64);
        let doc: serde_json::Value = serde_json::from_slice(&on_disk).unwrap();
        assert_eq!(doc["snapshot_id"], json!("snap-001"));
    }

    #[tokio::test]
    async fn second_snapshot_is_refused_before_the_handler_runs() {
        let mut a = agent(Role::Orchestration, TWO_TASKS);
        a.dispatcher.dispatch(&intake("snap-001", "ik-1")).await.unwrap();
        a.dispatcher.dispatch(&intake("snap-002", "ik-2")).await.unwrap();

        assert_eq!(a.llm.calls(), 1);
        let events = events(&a.emitter).await;
        let last = events.last().unwrap();
        assert_eq!(last.event, names::ERROR);
        assert_eq!(last.status, status::FAILED);
        assert_eq!(last.error_code(), Some("version_mismatch"));
    }

    #[tokio::test]
    async fn questions_only_response_asks_for_input() {
        let mut a = agent(Role::Orchestration, r#"{"questions": ["Which platform?"]}"#);
        a.dispatcher.dispatch(&intake("snap-001", "ik-1")).await.unwrap();

        let events = events(&a.emitter).await;
        let terminal = events.last().unwrap();
        assert_eq!(terminal.event, names::NEEDS_CLARIFICATION);
        assert_eq!(terminal.status, status::NEEDS_INPUT);
        assert_eq!(terminal.payload["questions"], json!(["Which platform?"]));
        assert!(a.root.join("receipts/task-1/intake-1.json").is_file());
    }

    #[tokio::test]
    async fn repeated_clarification_replays_without_calling_the_llm() {
        let mut a = agent(Role::Orchestration, r#"{"questions": ["q?"]}"#);
        let cmd = intake("snap-001", "ik-1");
        a.dispatcher.dispatch(&cmd).await.unwrap();
        let plan = a.root.join("orchestration/task-1/intake.json");
        let first_write = std::fs::metadata(&plan).unwrap().modified().unwrap();

        a.dispatcher.dispatch(&cmd).await.unwrap();

        assert_eq!(a.llm.calls(), 1);
        assert_eq!(
            std::fs::metadata(&plan).unwrap().modified().unwrap(),
            first_write
        );
        let events = events(&a.emitter).await;
        let sequence: Vec<(&str, &str)> = events
            .iter()
            .map(|e| (e.event.as_str(), e.status.as_str()))
            .collect();
        assert_eq!(
            sequence,
            vec![
                (names::ARTIFACT_PRODUCED, status::SUCCESS),
                (names::NEEDS_CLARIFICATION, status::NEEDS_INPUT),
                (names::ARTIFACT_PRODUCED, status::SUCCESS),
                (names::NEEDS_CLARIFICATION, status::NEEDS_INPUT),
            ]
        );
        assert_eq!(events[3].payload["questions"], json!(["q?"]));
        assert!(!a.root.join("receipts/task-1/intake-2.json").exists());
    }

    #[tokio::test]
    async fn builder_writes_expected_output() {
        let mut a = agent(Role::Builder, "pub fn parse() {}\n");
        let cmd = Command {
            message_id: "msg-b".to_string(),
            task_id: "task-1-1".to_string(),
            idempotency_key: "ik-b".to_string(),
            action: Some(Action::Implement),
            version: Version::snapshot("snap-001"),
            expected_outputs: vec![ExpectedOutput::required("src/parser.rs")],
            ..Command::default()
        };
        a.dispatcher.dispatch(&cmd).await.unwrap();

        let events = events(&a.emitter).await;
        let terminal = events.last().unwrap();
        assert_eq!(terminal.event, names::BUILD_COMPLETED);
        assert_eq!(terminal.artifacts[0].path, "src/parser.rs");
        assert_eq!(
            std::fs::read_to_string(a.root.join("src/parser.rs")).unwrap(),
            "pub fn parse() {}\n"
        );
    }

    #[tokio::test]
    async fn reviewer_refuses_intake() {
        let mut a = agent(Role::Reviewer, "fine");
        a.dispatcher.dispatch(&intake("snap-001", "ik-1")).await.unwrap();

        assert_eq!(a.llm.calls(), 0);
        let events = events(&a.emitter).await;
        assert_eq!(events[0].error_code(), Some("unsupported_action"));
    }

    #[tokio::test]
    async fn run_numbers_heartbeats_from_one() {
        let a = agent(Role::Orchestration, TWO_TASKS);
        let input = input_stream(&[intake("snap-001", "ik-1"), intake("snap-001", "ik-1")]);

        a.dispatcher
            .run(BufReader::new(input.as_slice()), CancellationToken::new())
            .await
            .unwrap();

        let beats = heartbeats(&a.emitter).await;
        assert!(beats.len() >= 2);
        let seqs: Vec<u64> = beats.iter().map(|b| b.seq).collect();
        let expected: Vec<u64> = (1..=beats.len() as u64).collect();
        assert_eq!(seqs, expected);
        assert_eq!(beats[0].status, AgentStatus::Starting);
        assert_eq!(beats.last().unwrap().status, AgentStatus::Stopping);

        assert_eq!(a.llm.calls(), 1);
        let terminals: Vec<Event> = events(&a.emitter)
            .await
            .into_iter()
            .filter(|e| e.event == names::PROPOSED_TASKS)
            .collect();
        assert_eq!(terminals.len(), 2);
    }

    #[tokio::test]
    async fn heartbeats_continue_while_a_command_is_busy() {
        let llm = ScriptedLlm::slow(TWO_TASKS, Duration::from_millis(300));
        let a = agent_with(Role::Orchestration, llm, Duration::from_millis(50));
        let input = input_stream(&[intake("snap-001", "ik-1")]);

        a.dispatcher
            .run(BufReader::new(input.as_slice()), CancellationToken::new())
            .await
            .unwrap();

        let beats = heartbeats(&a.emitter).await;
        let seqs: Vec<u64> = beats.iter().map(|b| b.seq).collect();
        let expected: Vec<u64> = (1..=beats.len() as u64).collect();
        assert_eq!(seqs, expected);

        let busy: Vec<&Heartbeat> = beats
            .iter()
            .filter(|b| b.status == AgentStatus::Busy)
            .collect();
        assert!(!busy.is_empty(), "no heartbeat while the command ran");
        for beat in busy {
            assert_eq!(beat.task_id.as_deref(), Some("task-1"));
        }
        assert_eq!(a.llm.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_line_stops_the_run_with_a_final_heartbeat() {
        let a = agent(Role::Orchestration, TWO_TASKS);
        let input = b"{not json\n".to_vec();

        let err = a
            .dispatcher
            .run(BufReader::new(input.as_slice()), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal());

        let beats = heartbeats(&a.emitter).await;
        assert_eq!(beats.last().unwrap().status, AgentStatus::Stopping);
        assert_eq!(a.llm.calls(), 0);
    }
}
