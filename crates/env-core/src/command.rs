//! Typed simulation commands.
//!
//! The engine accepts commands as JSON objects discriminated by `type`, with
//! camelCase field names (`pushFront`, `allowCapture`, ...). Modeling the
//! closed set here means malformed model output fails at decode time instead
//! of inside the simulation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::ValidationError;

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineCommand {
    Walk {
        entities: Vec<u64>,
        x: f64,
        z: f64,
        #[serde(default)]
        queued: bool,
        #[serde(rename = "pushFront", default, skip_serializing_if = "Option::is_none")]
        push_front: Option<bool>,
    },
    Stop {
        entities: Vec<u64>,
        #[serde(default)]
        queued: bool,
    },
    Patrol {
        entities: Vec<u64>,
        x: f64,
        z: f64,
        #[serde(default)]
        queued: bool,
    },
    Attack {
        entities: Vec<u64>,
        target: u64,
        #[serde(default)]
        queued: bool,
        #[serde(
            rename = "allowCapture",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        allow_capture: Option<bool>,
    },
    #[serde(rename = "attack-walk")]
    AttackWalk {
        entities: Vec<u64>,
        x: f64,
        z: f64,
        #[serde(default)]
        queued: bool,
        #[serde(
            rename = "targetClasses",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        target_classes: Option<Value>,
    },
    Gather {
        entities: Vec<u64>,
        target: u64,
        #[serde(default)]
        queued: bool,
    },
    ReturnResource {
        entities: Vec<u64>,
        target: u64,
        #[serde(default)]
        queued: bool,
    },
    Construct {
        entities: Vec<u64>,
        template: String,
        x: f64,
        z: f64,
        #[serde(default)]
        angle: f64,
        #[serde(default)]
        queued: bool,
    },
    Train {
        entities: Vec<u64>,
        template: String,
        #[serde(default = "default_count")]
        count: u32,
    },
    Repair {
        entities: Vec<u64>,
        target: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        autocontinue: Option<bool>,
        #[serde(default)]
        queued: bool,
    },
    Garrison {
        entities: Vec<u64>,
        target: u64,
        #[serde(default)]
        queued: bool,
    },
}

impl EngineCommand {
    /// Wire discriminator, as the engine spells it.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineCommand::Walk { .. } => "walk",
            EngineCommand::Stop { .. } => "stop",
            EngineCommand::Patrol { .. } => "patrol",
            EngineCommand::Attack { .. } => "attack",
            EngineCommand::AttackWalk { .. } => "attack-walk",
            EngineCommand::Gather { .. } => "gather",
            EngineCommand::ReturnResource { .. } => "returnresource",
            EngineCommand::Construct { .. } => "construct",
            EngineCommand::Train { .. } => "train",
            EngineCommand::Repair { .. } => "repair",
            EngineCommand::Garrison { .. } => "garrison",
        }
    }

    /// Entity ids that must be owned by the issuing player.
    pub fn owned_entities(&self) -> Vec<u64> {
        let mut out = match self {
            EngineCommand::Walk { entities, .. }
            | EngineCommand::Stop { entities, .. }
            | EngineCommand::Patrol { entities, .. }
            | EngineCommand::Attack { entities, .. }
            | EngineCommand::AttackWalk { entities, .. }
            | EngineCommand::Gather { entities, .. }
            | EngineCommand::ReturnResource { entities, .. }
            | EngineCommand::Construct { entities, .. }
            | EngineCommand::Train { entities, .. }
            | EngineCommand::Repair { entities, .. }
            | EngineCommand::Garrison { entities, .. } => entities.clone(),
        };
        // Garrison holders must belong to the player too.
        if let EngineCommand::Garrison { target, .. } = self {
            out.push(*target);
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Entity ids that must exist but may belong to anyone (attack targets,
    /// resources, foundations).
    pub fn referenced_targets(&self) -> Vec<u64> {
        match self {
            EngineCommand::Attack { target, .. }
            | EngineCommand::Gather { target, .. }
            | EngineCommand::ReturnResource { target, .. }
            | EngineCommand::Repair { target, .. } => vec![*target],
            _ => vec![],
        }
    }

    /// Local structural checks that need no game state.
    pub fn check_shape(&self) -> Result<(), ValidationError> {
        let entities = match self {
            EngineCommand::Walk { entities, .. }
            | EngineCommand::Stop { entities, .. }
            | EngineCommand::Patrol { entities, .. }
            | EngineCommand::Attack { entities, .. }
            | EngineCommand::AttackWalk { entities, .. }
            | EngineCommand::Gather { entities, .. }
            | EngineCommand::ReturnResource { entities, .. }
            | EngineCommand::Construct { entities, .. }
            | EngineCommand::Train { entities, .. }
            | EngineCommand::Repair { entities, .. }
            | EngineCommand::Garrison { entities, .. } => entities,
        };
        if entities.is_empty() {
            return Err(ValidationError::invalid_command(format!(
                "{} requires non-empty 'entities'",
                self.kind()
            )));
        }
        if entities.contains(&0) {
            return Err(ValidationError::invalid_command(format!(
                "{} entity ids must be >= 1",
                self.kind()
            )));
        }

        match self {
            EngineCommand::Walk { x, z, .. }
            | EngineCommand::Patrol { x, z, .. }
            | EngineCommand::AttackWalk { x, z, .. } => {
                if !x.is_finite() || !z.is_finite() {
                    return Err(ValidationError::invalid_command(format!(
                        "{} requires finite 'x' and 'z'",
                        self.kind()
                    )));
                }
            }
            EngineCommand::Construct { template, x, z, .. } => {
                if template.trim().is_empty() {
                    return Err(ValidationError::invalid_command(
                        "construct requires a 'template'",
                    ));
                }
                if !x.is_finite() || !z.is_finite() {
                    return Err(ValidationError::invalid_command(
                        "construct requires finite 'x' and 'z'",
                    ));
                }
            }
            EngineCommand::Train {
                template, count, ..
            } => {
                if template.trim().is_empty() {
                    return Err(ValidationError::invalid_command(
                        "train requires a 'template'",
                    ));
                }
                if *count == 0 {
                    return Err(ValidationError::invalid_command("train requires count >= 1"));
                }
            }
            _ => {}
        }

        Ok(())
    }
}
