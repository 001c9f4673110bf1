//! Size-capped event encoding with deterministic truncation.
//!
//! `encode_event_capped` encodes an event as one NDJSON line. When the line
//! exceeds the cap, the payload is cut down by an event-specific strategy:
//!
//! - task proposals: `notes` verbatim; `candidates` sorted by descending
//!   confidence and `tasks` by ascending id, each kept greedily until a
//!   quarter of the cap is used; `*_truncated` flags record drops.
//! - clarifications: the first three `questions` verbatim, with
//!   `questions_truncated` and `total_questions`.
//! - plan conflicts: `reason` verbatim, `candidates` as for proposals.
//! - everything else: the payload becomes `{"_truncated": "<preview>"}`.
//!
//! Identical input always yields identical output.

use std::cmp::Ordering;

use serde_json::{Map, Value};
use tracing::warn;

use relay_contracts::{
    error::{RelayError, RelayResult},
    event::{names, Event},
    message::{encode_line, Message},
};

/// Default hard ceiling for one encoded message, newline included.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Upper bound on the generic `_truncated` preview.
pub const PREVIEW_MAX_BYTES: usize = 2048;

/// Questions kept verbatim in a truncated clarification event.
pub const CLARIFICATION_QUESTIONS_KEPT: usize = 3;

/// Encode `event` as a line of at most `max_bytes` bytes.
///
/// Returns `MessageTooLarge` only when even the generic preview does not
/// fit, which means the non-payload fields alone exceed the cap.
pub fn encode_event_capped(event: &Event, max_bytes: usize) -> RelayResult<Vec<u8>> {
    let line = encode_event(event)?;
    if line.len() <= max_bytes {
        return Ok(line);
    }
    let original_size = line.len();

    let mut truncated = event.clone();
    truncated.payload = truncate_payload(&event.event, &event.payload, max_bytes)?;
    let line = encode_event(&truncated)?;
    if line.len() <= max_bytes {
        warn!(
            event = %event.event,
            original_size,
            truncated_size = line.len(),
            "event payload truncated"
        );
        return Ok(line);
    }

    // The structured strategy was not enough (e.g. oversized notes); fall
    // back to the preview, which is bounded regardless of payload shape.
    truncated.payload = preview_payload(&event.payload, max_bytes)?;
    let line = encode_event(&truncated)?;
    if line.len() <= max_bytes {
        warn!(
            event = %event.event,
            original_size,
            truncated_size = line.len(),
            "event payload replaced by preview"
        );
        return Ok(line);
    }

    Err(RelayError::MessageTooLarge {
        size: line.len(),
        max: max_bytes,
    })
}

fn encode_event(event: &Event) -> RelayResult<Vec<u8>> {
    encode_line(&Message::Event(event.clone()))
}

/// Apply the event-specific strategy to `payload`.
pub fn truncate_payload(
    event_name: &str,
    payload: &Map<String, Value>,
    max_bytes: usize,
) -> RelayResult<Map<String, Value>> {
    let budget = max_bytes / 4;
    match event_name {
        names::PROPOSED_TASKS => {
            let mut out = payload.clone();
            truncate_list(&mut out, "candidates", budget, by_descending_confidence)?;
            truncate_list(&mut out, "tasks", budget, by_ascending_id)?;
            Ok(out)
        }
        names::PLAN_CONFLICT => {
            let mut out = payload.clone();
            truncate_list(&mut out, "candidates", budget, by_descending_confidence)?;
            Ok(out)
        }
        names::NEEDS_CLARIFICATION => Ok(truncate_questions(payload)),
        _ => preview_payload(payload, max_bytes),
    }
}

/// Replace the payload with a byte-bounded preview of its JSON encoding.
pub fn preview_payload(
    payload: &Map<String, Value>,
    max_bytes: usize,
) -> RelayResult<Map<String, Value>> {
    let encoded = serde_json::to_string(payload).map_err(|e| RelayError::Encode {
        reason: e.to_string(),
    })?;
    let limit = PREVIEW_MAX_BYTES.min(max_bytes / 4);

    let mut out = Map::new();
    out.insert(
        "_truncated".to_string(),
        Value::String(prefix_at_char_boundary(&encoded, limit).to_string()),
    );
    Ok(out)
}

/// The longest prefix of `s` that is at most `limit` bytes and ends on a
/// UTF-8 character boundary.
fn prefix_at_char_boundary(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Sort the array at `field` with `order`, then keep entries in order while
/// their encoded sizes fit in `budget`. Writes `<field>_truncated`.
fn truncate_list(
    payload: &mut Map<String, Value>,
    field: &str,
    budget: usize,
    order: fn(&Value, &Value) -> Ordering,
) -> RelayResult<()> {
    let Some(Value::Array(entries)) = payload.get(field) else {
        return Ok(());
    };

    let mut sorted = entries.clone();
    sorted.sort_by(order);
    let total = sorted.len();

    let mut kept = Vec::with_capacity(total);
    let mut used = 0usize;
    for entry in sorted {
        let size = serde_json::to_vec(&entry)
            .map_err(|e| RelayError::Encode {
                reason: e.to_string(),
            })?
            .len()
            + 1;
        if used + size > budget {
            break;
        }
        used += size;
        kept.push(entry);
    }

    let dropped = kept.len() < total;
    payload.insert(field.to_string(), Value::Array(kept));
    payload.insert(format!("{}_truncated", field), Value::Bool(dropped));
    Ok(())
}

fn truncate_questions(payload: &Map<String, Value>) -> Map<String, Value> {
    let mut out = payload.clone();
    if let Some(Value::Array(questions)) = payload.get("questions") {
        let total = questions.len();
        if total > CLARIFICATION_QUESTIONS_KEPT {
            out.insert(
                "questions".to_string(),
                Value::Array(questions[..CLARIFICATION_QUESTIONS_KEPT].to_vec()),
            );
            out.insert("questions_truncated".to_string(), Value::Bool(true));
            out.insert("total_questions".to_string(), Value::from(total));
        }
    }
    out
}

fn confidence(entry: &Value) -> f64 {
    entry.get("confidence").and_then(Value::as_f64).unwrap_or(0.0)
}

fn id_of(entry: &Value) -> &str {
    entry.get("id").and_then(Value::as_str).unwrap_or("")
}

fn by_descending_confidence(a: &Value, b: &Value) -> Ordering {
    confidence(b)
        .total_cmp(&confidence(a))
        .then_with(|| id_of(a).cmp(id_of(b)))
}

fn by_ascending_id(a: &Value, b: &Value) -> Ordering {
    id_of(a).cmp(id_of(b))
}
