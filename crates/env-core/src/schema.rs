//! JSON Schema documents for the proxy surface.
//!
//! Served at `GET /schema` for client-side validation, and reused as the
//! `response_format` schema for providers that support structured output.

use serde_json::{Value, json};

/// Schema for one command object (the `cmd` payload of `push_command`).
pub fn command_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "type": {
                "type": "string",
                "enum": [
                    "walk", "stop", "patrol", "attack", "attack-walk",
                    "gather", "returnresource", "construct", "train",
                    "repair", "garrison"
                ]
            },
            "entities": {"type": "array", "items": {"type": "integer", "minimum": 1}},
            "x": {"type": "number"},
            "z": {"type": "number"},
            "target": {"type": "integer", "minimum": 1},
            "template": {"type": "string"},
            "count": {"type": "integer", "minimum": 1},
            "angle": {"type": "number"},
            "queued": {"type": "boolean"},
            "pushFront": {"type": "boolean"},
            "allowCapture": {"type": "boolean"},
            "autocontinue": {"type": "boolean"},
            "targetClasses": {"type": "object"}
        },
        "required": ["type", "entities"]
    })
}

/// Schema for one action: the `op`-tagged union accepted by `POST /step`.
pub fn action_schema() -> Value {
    json!({
        "oneOf": [
            {
                "type": "object",
                "properties": {
                    "op": {"const": "evaluate"},
                    "code": {"type": "string", "minLength": 1}
                },
                "required": ["op", "code"]
            },
            {
                "type": "object",
                "properties": {
                    "op": {"const": "push_command"},
                    "player_id": {"type": "integer", "minimum": 0},
                    "cmd": command_schema()
                },
                "required": ["op", "player_id", "cmd"]
            }
        ]
    })
}

pub fn observation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "ok": {"type": "boolean"},
            "result": {},
            "error": {"type": ["string", "null"]},
            "detail": {"type": ["string", "null"]},
            "episode_id": {"type": ["string", "null"]},
            "step_count": {"type": "integer", "minimum": 0},
            "stepper_detected": {"type": ["boolean", "null"]},
            "sim_time": {"type": ["number", "null"]}
        },
        "required": ["ok", "step_count"]
    })
}

pub fn session_state_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "episode_id": {"type": ["string", "null"]},
            "step_count": {"type": "integer", "minimum": 0},
            "rl_url": {"type": "string"},
            "last_sim_time": {"type": ["number", "null"]},
            "stepper_detected": {"type": ["boolean", "null"]}
        },
        "required": ["step_count", "rl_url"]
    })
}

/// Schema for the `{"actions": [...]}` envelope agents must emit.
pub fn actions_list_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "actions": {"type": "array", "items": action_schema()}
        },
        "required": ["actions"]
    })
}
