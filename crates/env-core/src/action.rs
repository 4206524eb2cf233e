//! OpenEnv-facing wire types: actions, observations, and session state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::EngineCommand;

/// One agent-issued instruction sent through the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Action {
    /// Evaluate JS in the simulation script interface.
    Evaluate { code: String },
    /// Inject a simulation command on behalf of a player.
    PushCommand { player_id: u32, cmd: EngineCommand },
}

/// Local rejection of an action before the engine is contacted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown entity ids: {missing:?}")]
    InvalidEntityIds { missing: Vec<u64> },
    #[error("entities owned by another player: {entities:?}")]
    WrongOwner { entities: Vec<(u64, i64)> },
    #[error("{reason}")]
    InvalidCommand { reason: String },
}

impl ValidationError {
    /// Stable machine tag carried in `Observation.error`.
    pub fn tag(&self) -> &'static str {
        match self {
            ValidationError::InvalidEntityIds { .. } => "invalid_entity_ids",
            ValidationError::WrongOwner { .. } => "wrong_owner",
            ValidationError::InvalidCommand { .. } => "invalid_command",
        }
    }

    pub fn invalid_command(reason: impl Into<String>) -> Self {
        ValidationError::InvalidCommand {
            reason: reason.into(),
        }
    }
}

/// The proxy's response to one action. `error` is a stable machine tag
/// (`invalid_entity_ids`, `wrong_owner`, `invalid_command`,
/// `transport_error`, `rl_interface_unreachable`); `detail` is
/// human-oriented.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Observation {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
    #[serde(default)]
    pub step_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stepper_detected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sim_time: Option<f64>,
}

/// Proxy-side bookkeeping for the current episode, served at `GET /state`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SessionState {
    pub episode_id: Option<String>,
    pub step_count: u64,
    pub rl_url: String,
    pub last_sim_time: Option<f64>,
    pub stepper_detected: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ResetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StepRequest {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<f64>,
}

/// Envelope shared by `/reset` and `/step` responses. `reward` and `done`
/// exist for contract compatibility; this proxy has no reward model and
/// episodes only end by external teardown.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EnvResponse {
    pub observation: Observation,
    pub reward: Option<f64>,
    pub done: bool,
}

impl EnvResponse {
    pub fn from_observation(observation: Observation) -> Self {
        Self {
            observation,
            reward: None,
            done: false,
        }
    }
}
