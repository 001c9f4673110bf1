//! The orchestration proposal: what the LLM is asked to return for intake
//! and task discovery, and how its answer is read.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_contracts::{
    agent::Role,
    error::{RelayError, RelayResult},
};

/// A unit of follow-up work derived from the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedTask {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// The role expected to pick the task up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<Role>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// One way of carrying out the request, with the model's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePlan {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    #[serde(default)]
    pub tasks: Vec<DerivedTask>,
    #[serde(default)]
    pub candidates: Vec<CandidatePlan>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub questions: Vec<String>,
}

impl Proposal {
    /// Questions and no tasks: the request cannot be planned yet.
    pub fn needs_clarification(&self) -> bool {
        self.tasks.is_empty() && !self.questions.is_empty()
    }

    /// Give unnamed tasks the ids `<prefix>-<n>` (1-based, by position) and
    /// check that ids are unique and confidences lie in `[0, 1]`.
    pub fn normalize(mut self, id_prefix: &str) -> RelayResult<Self> {
        let mut seen = HashSet::new();
        for (n, task) in self.tasks.iter_mut().enumerate() {
            if task.id.trim().is_empty() {
                task.id = format!("{}-{}", id_prefix, n + 1);
            }
            if task.title.trim().is_empty() {
                return Err(RelayError::InvalidResponse {
                    reason: format!("task '{}' has no title", task.id),
                });
            }
            if !seen.insert(task.id.clone()) {
                return Err(RelayError::InvalidResponse {
                    reason: format!("duplicate task id '{}'", task.id),
                });
            }
        }

        for candidate in &self.candidates {
            if !(0.0..=1.0).contains(&candidate.confidence) {
                return Err(RelayError::InvalidResponse {
                    reason: format!(
                        "candidate '{}' has confidence {} outside [0, 1]",
                        candidate.id, candidate.confidence
                    ),
                });
            }
        }

        self.questions.retain(|q| !q.trim().is_empty());
        if self.tasks.is_empty() && self.questions.is_empty() {
            return Err(RelayError::InvalidResponse {
                reason: "proposal contains neither tasks nor questions".to_string(),
            });
        }
        Ok(self)
    }
}

/// Two or more candidate plans that cannot be reconciled automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConflict {
    pub reason: String,
    pub candidates: Vec<CandidatePlan>,
}

/// Conflict detection between candidate plans.
///
/// Never reports a conflict: no comparison rule between candidates has
/// been settled, so every proposal proceeds on its own terms.
pub fn detect_plan_conflict(_candidates: &[CandidatePlan]) -> Option<PlanConflict> {
    None
}

/// Read a `Proposal` out of a model response.
///
/// Accepts a bare JSON object, one wrapped in a fenced code block, or one
/// embedded in surrounding prose (first `{` to last `}`).
pub fn parse_proposal(response: &str) -> RelayResult<Proposal> {
    let value = extract_json_object(response).ok_or_else(|| RelayError::InvalidResponse {
        reason: "no JSON object in response".to_string(),
    })?;
    serde_json::from_value(value).map_err(|e| RelayError::InvalidResponse {
        reason: format!("proposal does not match the expected shape: {}", e),
    })
}

fn extract_json_object(response: &str) -> Option<Value> {
    let trimmed = response.trim();
    let parse = |s: &str| match serde_json::from_str::<Value>(s) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    };

    if let Some(value) = parse(trimmed) {
        return Some(value);
    }
    if let Some(fenced) = fenced_block(trimmed) {
        if let Some(value) = parse(fenced) {
            return Some(value);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| parse(&trimmed[start..=end])).flatten()
}

/// The body of the first ``` fenced block, language tag dropped.
fn fenced_block(s: &str) -> Option<&str> {
    let open = s.find("```")?;
    let after_open = &s[open + 3..];
    let body_start = after_open.find('\n')? + 1;
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
