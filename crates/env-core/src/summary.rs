//! Bounded, prompt-sized summary of one snapshot.
//!
//! Full engine states run to thousands of entities; prompts cannot. The
//! summary keeps a hard cap per player and flags the truncation so agents
//! know the list is partial.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy)]
pub struct SummaryConfig {
    pub max_entities_per_player: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_entities_per_player: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StateSummary {
    pub step: u64,
    pub time: f64,
    /// Entities per requested player id, capped.
    pub players: BTreeMap<String, PlayerSummary>,
    /// Per-player resource/population/civ block straight from the engine's
    /// players array (index 0 is Gaia).
    pub global_players: BTreeMap<String, PlayerStats>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PlayerSummary {
    pub entities: Vec<EntitySummary>,
    pub entity_count: usize,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EntitySummary {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<Vec<f64>>,
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hitpoints: Option<f64>,
    #[serde(rename = "maxHitpoints", skip_serializing_if = "Option::is_none")]
    pub max_hitpoints: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PlayerStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pop: Option<Value>,
    #[serde(rename = "popLimit", skip_serializing_if = "Option::is_none")]
    pub pop_limit: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub civ: Option<Value>,
}

pub fn summarize(snapshot: &Snapshot, player_ids: &[u32], cfg: &SummaryConfig) -> StateSummary {
    let mut players = BTreeMap::new();

    for &pid in player_ids {
        let mut entities: Vec<EntitySummary> = snapshot
            .state
            .entities
            .iter()
            .filter_map(|(id, ent)| {
                let id = id.parse::<u64>().ok()?;
                (ent.owner == i64::from(pid)).then(|| EntitySummary {
                    id,
                    pos: ent.position.clone(),
                    template: ent.template.clone(),
                    hitpoints: ent.hitpoints,
                    max_hitpoints: ent.max_hitpoints,
                })
            })
            .collect();
        entities.sort_by_key(|e| e.id);

        let total = entities.len();
        entities.truncate(cfg.max_entities_per_player);
        players.insert(
            pid.to_string(),
            PlayerSummary {
                entity_count: entities.len(),
                truncated: total > entities.len(),
                entities,
            },
        );
    }

    let global_players = snapshot
        .state
        .players
        .iter()
        .enumerate()
        .filter_map(|(idx, p)| {
            let p = p.as_object()?;
            Some((
                idx.to_string(),
                PlayerStats {
                    resources: p.get("resourceCounts").cloned(),
                    pop: p.get("popCount").cloned(),
                    pop_limit: p.get("popLimit").cloned(),
                    civ: p.get("civ").cloned(),
                },
            ))
        })
        .collect();

    StateSummary {
        step: snapshot.step,
        time: snapshot.time,
        players,
        global_players,
    }
}
