//! Shared primitives for driving a running 0 A.D. match through the engine's
//! RL HTTP interface.
//!
//! This crate is the common library under the three binaries in this
//! workspace (stepper, OpenEnv proxy, match runner): transport client,
//! action/command/observation types, snapshot model, prompt building, and
//! LLM provider adapters.

pub mod action;
pub mod agent;
pub mod command;
pub mod config;
pub mod schema;
pub mod snapshot;
pub mod summary;
pub mod transport;

pub use action::{Action, EnvResponse, Observation, ResetRequest, SessionState, StepRequest, ValidationError};
pub use command::EngineCommand;
pub use snapshot::{EngineState, Entity, EntityIndex, Snapshot};
pub use transport::{EngineApi, RlClient, TransportError};
