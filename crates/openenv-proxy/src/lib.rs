//! OpenEnv-format HTTP proxy in front of the 0 A.D. RL interface.
//!
//! Translates the generic `reset`/`step`/`state`/`health`/`schema` contract
//! into engine-native `evaluate`/`push_command` calls, validating actions
//! before anything reaches the simulation. It never advances the simulation
//! clock; that is the stepper's job.

pub mod server;
pub mod session;
