//! Periodic engine-state snapshot shared between the stepper and readers.
//!
//! The stepper is the only writer; the match runner, diagnostics, and the
//! proxy's validator are readers. Writes go through a sibling `.tmp` file and
//! a rename, so readers either see the previous complete snapshot or the new
//! one, never a torn file. Readers must tolerate a missing or unparseable
//! file (the stepper may not have produced one yet).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::ValidationError;
use crate::command::EngineCommand;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Snapshot {
    /// Stepper loop counter at write time.
    pub step: u64,
    /// Wall-clock seconds (unix epoch) at write time; readers use this for
    /// staleness checks.
    pub time: f64,
    pub state: EngineState,
}

/// The engine state object returned by `/step`, with unknown fields carried
/// through so the snapshot stays a faithful export.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EngineState {
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
    #[serde(default)]
    pub players: Vec<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Entity {
    #[serde(default)]
    pub owner: i64,
    #[serde(default)]
    pub template: String,
    /// `[x, z]` world position; absent for garrisoned or destroyed entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hitpoints: Option<f64>,
    #[serde(
        rename = "maxHitpoints",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_hitpoints: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Entity {
    pub fn pos_xz(&self) -> Option<(f64, f64)> {
        match self.position.as_deref() {
            Some([x, z, ..]) => Some((*x, *z)),
            _ => None,
        }
    }

    pub fn is_unit(&self) -> bool {
        self.template.contains("units/")
    }
}

impl Snapshot {
    pub fn now_timestamp() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Wraps a raw `/step` response into a snapshot stamped with the current
    /// wall clock. Fails only if the state is not an object of the expected
    /// overall shape.
    pub fn from_engine_state(step: u64, state: Value) -> anyhow::Result<Self> {
        let state: EngineState =
            serde_json::from_value(state).context("engine state has unexpected shape")?;
        Ok(Self {
            step,
            time: Self::now_timestamp(),
            state,
        })
    }

    /// Best-effort load: `None` for a missing, unreadable, or unparseable
    /// file. Callers skip the iteration and retry later.
    pub fn load(path: &Path) -> Option<Self> {
        let text = fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Atomic write: serialize to `<path>.tmp`, then rename over `path`.
    pub fn write_atomic(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create snapshot dir {}", parent.display()))?;
        }
        let tmp = tmp_path(path);
        let payload = serde_json::to_string(self).context("serialize snapshot")?;
        fs::write(&tmp, payload).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }

    pub fn age_secs(&self, now: f64) -> f64 {
        (now - self.time).max(0.0)
    }

    pub fn entity_index(&self) -> EntityIndex {
        EntityIndex::from_state(&self.state)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Id -> owner lookup over one snapshot, used to validate commands before
/// they are forwarded to the engine.
#[derive(Debug, Default)]
pub struct EntityIndex {
    owners: BTreeMap<u64, i64>,
}

impl EntityIndex {
    pub fn from_state(state: &EngineState) -> Self {
        let owners = state
            .entities
            .iter()
            .filter_map(|(id, ent)| id.parse::<u64>().ok().map(|id| (id, ent.owner)))
            .collect();
        Self { owners }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, id: u64) -> Option<i64> {
        self.owners.get(&id).copied()
    }

    /// Checks that every entity the command drives is known and owned by
    /// `player_id`, and that referenced targets exist. Missing ids take
    /// precedence over ownership mismatches.
    pub fn validate_ownership(
        &self,
        player_id: u32,
        cmd: &EngineCommand,
    ) -> Result<(), ValidationError> {
        let mut missing: Vec<u64> = Vec::new();
        let mut wrong: Vec<(u64, i64)> = Vec::new();

        for id in cmd.owned_entities() {
            match self.owner(id) {
                None => missing.push(id),
                Some(owner) if owner != i64::from(player_id) => wrong.push((id, owner)),
                Some(_) => {}
            }
        }
        for id in cmd.referenced_targets() {
            if self.owner(id).is_none() {
                missing.push(id);
            }
        }

        missing.sort_unstable();
        missing.dedup();
        if !missing.is_empty() {
            return Err(ValidationError::InvalidEntityIds { missing });
        }
        if !wrong.is_empty() {
            return Err(ValidationError::WrongOwner { entities: wrong });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_state() -> EngineState {
        serde_json::from_value(json!({
            "entities": {
                "10": {"owner": 1, "template": "units/athen/support_female_citizen", "position": [480.0, 360.0], "hitpoints": 50.0, "maxHitpoints": 50.0},
                "11": {"owner": 2, "template": "units/spart/infantry_spearman_b", "position": [100.0, 90.0]},
                "12": {"owner": 0, "template": "gaia/tree/oak", "position": [200.0, 210.0]}
            },
            "players": [{"civ": "gaia"}, {"civ": "athen"}, {"civ": "spart"}]
        }))
        .unwrap()
    }

    #[test]
    fn state_decode_tolerates_missing_fields_and_keeps_extras() {
        let state: EngineState = serde_json::from_value(json!({
            "entities": {"5": {"owner": 1}},
            "timeElapsed": 1234
        }))
        .unwrap();
        assert_eq!(state.entities["5"].owner, 1);
        assert!(state.entities["5"].position.is_none());
        assert_eq!(state.extra.get("timeElapsed"), Some(&json!(1234)));
    }

    #[test]
    fn write_atomic_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("latest_state.json");

        let snap = Snapshot {
            step: 40,
            time: 1000.0,
            state: sample_state(),
        };
        snap.write_atomic(&path).unwrap();

        let loaded = Snapshot::load(&path).unwrap();
        assert_eq!(loaded, snap);
        // The sibling tmp file must not linger after the rename.
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn load_tolerates_missing_and_truncated_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest_state.json");
        assert!(Snapshot::load(&path).is_none());

        fs::write(&path, "{\"step\": 10, \"time\":").unwrap();
        assert!(Snapshot::load(&path).is_none());
    }

    #[test]
    fn age_is_clamped_to_zero() {
        let snap = Snapshot {
            step: 1,
            time: 100.0,
            state: EngineState::default(),
        };
        assert_eq!(snap.age_secs(103.5), 3.5);
        assert_eq!(snap.age_secs(90.0), 0.0);
    }

    #[test]
    fn ownership_validation_reports_missing_ids() {
        let index = EntityIndex::from_state(&sample_state());
        let cmd = EngineCommand::Walk {
            entities: vec![999_999],
            x: 1.0,
            z: 2.0,
            queued: false,
            push_front: None,
        };
        let err = index.validate_ownership(1, &cmd).unwrap_err();
        assert_eq!(err.tag(), "invalid_entity_ids");
        assert_eq!(
            err,
            ValidationError::InvalidEntityIds {
                missing: vec![999_999]
            }
        );
    }

    #[test]
    fn ownership_validation_reports_wrong_owner() {
        let index = EntityIndex::from_state(&sample_state());
        let cmd = EngineCommand::Walk {
            entities: vec![11],
            x: 1.0,
            z: 2.0,
            queued: false,
            push_front: None,
        };
        let err = index.validate_ownership(1, &cmd).unwrap_err();
        assert_eq!(err.tag(), "wrong_owner");
        assert_eq!(
            err,
            ValidationError::WrongOwner {
                entities: vec![(11, 2)]
            }
        );
    }

    #[test]
    fn ownership_validation_accepts_gaia_targets() {
        let index = EntityIndex::from_state(&sample_state());
        let cmd = EngineCommand::Gather {
            entities: vec![10],
            target: 12,
            queued: false,
        };
        assert!(index.validate_ownership(1, &cmd).is_ok());
    }

    #[test]
    fn ownership_validation_checks_target_existence() {
        let index = EntityIndex::from_state(&sample_state());
        let cmd = EngineCommand::Gather {
            entities: vec![10],
            target: 424_242,
            queued: false,
        };
        let err = index.validate_ownership(1, &cmd).unwrap_err();
        assert_eq!(err.tag(), "invalid_entity_ids");
    }

    #[test]
    fn entity_pos_helper_reads_first_two_coordinates() {
        let ent = Entity {
            position: Some(vec![480.0, 360.0, 12.0]),
            ..Entity::default()
        };
        assert_eq!(ent.pos_xz(), Some((480.0, 360.0)));
        assert_eq!(Entity::default().pos_xz(), None);
    }
}
