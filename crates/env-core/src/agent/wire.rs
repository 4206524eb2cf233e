//! Parsing model output into validated action lists.
//!
//! Contract: the response is one JSON object with an `actions` array, each
//! element an `op`-tagged action. Providers in JSON mode mostly comply, but
//! models still wrap output in markdown fences often enough that a fenced
//! extraction fallback pays for itself.

use serde_json::Value;

use crate::action::Action;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionParseError {
    #[error("model output is not a json object")]
    InvalidJson,
    #[error("model output has no 'actions' array")]
    MissingActions,
    #[error("invalid action at index {index}: {reason}")]
    InvalidAction { index: usize, reason: String },
}

/// Extracts a JSON object from raw model output: direct parse first, then
/// the first parseable fenced code block.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str::<Value>(trimmed)
        && v.is_object()
    {
        return Some(v);
    }

    if trimmed.contains("```") {
        let parts: Vec<&str> = trimmed.split("```").collect();
        for block in parts.iter().skip(1).step_by(2) {
            let mut body = *block;
            // Strip an optional language tag line (```json, ```python, ...).
            if let Some((first, rest)) = body.split_once('\n') {
                let tag = first.trim().to_ascii_lowercase();
                if tag.is_empty() || tag == "json" || tag == "python" || tag == "py" {
                    body = rest;
                }
            }
            if let Ok(v) = serde_json::from_str::<Value>(body.trim())
                && v.is_object()
            {
                return Some(v);
            }
        }
    }

    None
}

/// Parses a full model response into a validated action list.
pub fn parse_action_list(raw: &str) -> Result<Vec<Action>, ActionParseError> {
    let obj = extract_json_object(raw).ok_or(ActionParseError::InvalidJson)?;
    let actions = obj
        .get("actions")
        .and_then(Value::as_array)
        .ok_or(ActionParseError::MissingActions)?;

    actions
        .iter()
        .enumerate()
        .map(|(index, v)| {
            serde_json::from_value::<Action>(v.clone()).map_err(|e| {
                ActionParseError::InvalidAction {
                    index,
                    reason: e.to_string(),
                }
            })
        })
        .collect()
}
