//! Prompt construction.
//!
//! Prompts carry the Command's identity, snapshot, inputs and expected
//! outputs so the model sees the same view of the work the agent does.

use std::fmt::Write;

use serde_json::Value;

use relay_contracts::command::{Action, Command};

fn header(out: &mut String, cmd: &Command, action: Action) {
    let _ = writeln!(out, "Task: {}", cmd.task_id);
    let _ = writeln!(out, "Action: {}", action);
    let _ = writeln!(out, "Snapshot: {}", cmd.version.snapshot_id);
    if !cmd.expected_outputs.is_empty() {
        let _ = writeln!(out, "Expected outputs:");
        for output in &cmd.expected_outputs {
            let kind = if output.required { "required" } else { "optional" };
            let _ = writeln!(out, "  - {} ({})", output.path, kind);
        }
    }
    let inputs = serde_json::to_string_pretty(&Value::Object(cmd.inputs.clone()))
        .unwrap_or_else(|_| "{}".to_string());
    let _ = writeln!(out, "Inputs:\n{}", inputs);
}

/// Prompt for `intake` and `task_discovery`.
pub fn orchestration_prompt(cmd: &Command, action: Action) -> String {
    let mut out = String::new();
    let goal = match action {
        Action::TaskDiscovery => {
            "Inspect the current state of the work described below and discover the \
             remaining tasks needed to finish it."
        }
        _ => "Break the request described below into concrete tasks for the build agents.",
    };
    let _ = writeln!(out, "{}\n", goal);
    header(&mut out, cmd, action);
    out.push_str(
        "\nRespond with a single JSON object and nothing else:\n\
         {\n  \
           \"tasks\": [{\"id\": \"...\", \"title\": \"...\", \"description\": \"...\", \
         \"agent_type\": \"builder|reviewer|spec_maintainer\", \"depends_on\": [\"...\"]}],\n  \
           \"candidates\": [{\"id\": \"...\", \"summary\": \"...\", \"confidence\": 0.0}],\n  \
           \"notes\": \"...\",\n  \
           \"questions\": [\"...\"]\n\
         }\n\
         If the request is too ambiguous to plan, return no tasks and list your \
         questions instead.\n",
    );
    out
}

/// Prompt for the LLM-backed worker actions.
pub fn worker_prompt(cmd: &Command, action: Action) -> String {
    let mut out = String::new();
    let goal = match action {
        Action::Implement => "Implement the task described below.",
        Action::ImplementChanges => "Apply the requested changes to the existing implementation.",
        Action::Review => "Review the work described below and report findings.",
        Action::UpdateSpec => "Update the specification to reflect the changes described below.",
        Action::Intake | Action::TaskDiscovery => "Plan the work described below.",
    };
    let _ = writeln!(out, "{}\n", goal);
    header(&mut out, cmd, action);
    if !cmd.expected_outputs.is_empty() {
        out.push_str("\nRespond with the full content of the expected output.\n");
    }
    out
}
