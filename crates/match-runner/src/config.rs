//! Match configuration file.
//!
//! One TOML file per match: a `[match]` table with loop settings and a
//! `[players.<key>]` table per participant. Players without an enabled agent
//! entry stay under the engine's built-in AI.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use zeroad_env_core::agent::AgentConfig;

#[derive(Debug, Deserialize)]
pub struct MatchFile {
    #[serde(default, rename = "match")]
    pub settings: MatchSettings,
    #[serde(default)]
    pub players: BTreeMap<String, AgentConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchSettings {
    #[serde(default = "default_openenv_base")]
    pub openenv_base: String,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_decision_interval")]
    pub decision_interval_s: f64,
    #[serde(default = "default_max_actions")]
    pub max_actions_per_decision: usize,
    #[serde(default = "default_max_entities")]
    pub max_entities_in_summary: usize,
    /// Snapshots older than this are treated as missing.
    #[serde(default = "default_stale_after")]
    pub stale_after_s: f64,
    /// JSONL decision log; disabled when unset.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            openenv_base: default_openenv_base(),
            state_file: default_state_file(),
            decision_interval_s: default_decision_interval(),
            max_actions_per_decision: default_max_actions(),
            max_entities_in_summary: default_max_entities(),
            stale_after_s: default_stale_after(),
            log_file: None,
        }
    }
}

fn default_openenv_base() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_state_file() -> PathBuf {
    PathBuf::from("run/latest_state.json")
}

fn default_decision_interval() -> f64 {
    1.0
}

fn default_max_actions() -> usize {
    3
}

fn default_max_entities() -> usize {
    50
}

fn default_stale_after() -> f64 {
    10.0
}

impl MatchFile {
    /// Enabled agents ordered by player id. The second list is the player ids
    /// configured but left to the engine's own AI.
    pub fn enabled_agents(&self) -> (Vec<(String, AgentConfig)>, Vec<u32>) {
        let mut agents: Vec<(String, AgentConfig)> = Vec::new();
        let mut ai_controlled: Vec<u32> = Vec::new();

        for (key, cfg) in &self.players {
            if cfg.enabled {
                agents.push((key.clone(), cfg.clone()));
            } else {
                ai_controlled.push(cfg.player_id);
            }
        }
        agents.sort_by_key(|(_, cfg)| cfg.player_id);
        ai_controlled.sort_unstable();
        (agents, ai_controlled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroad_env_core::agent::ProviderKind;

    const SAMPLE: &str = r#"
[match]
openenv_base = "http://127.0.0.1:8001"
state_file = "run/latest_state.json"
decision_interval_s = 2.0
max_actions_per_decision = 4
log_file = "run/decisions.jsonl"

[players.alpha]
player_id = 1
name = "Alpha"
provider = "openai"
model = "gpt-4o-mini"
strategy_hint = "Boom economy first."

[players.beta]
player_id = 2
name = "Beta"
provider = "grok"
model = "grok-2"

[players.built_in]
player_id = 3
provider = "local"
model = "unused"
enabled = false
"#;

    #[test]
    fn sample_config_parses_with_defaults() {
        let file: MatchFile = toml::from_str(SAMPLE).unwrap();
        assert_eq!(file.settings.decision_interval_s, 2.0);
        assert_eq!(file.settings.max_actions_per_decision, 4);
        // Unset fields fall back.
        assert_eq!(file.settings.max_entities_in_summary, 50);
        assert_eq!(file.settings.stale_after_s, 10.0);
        assert_eq!(
            file.settings.log_file.as_deref(),
            Some(std::path::Path::new("run/decisions.jsonl"))
        );
    }

    #[test]
    fn enabled_agents_are_ordered_and_disabled_reported() {
        let file: MatchFile = toml::from_str(SAMPLE).unwrap();
        let (agents, ai) = file.enabled_agents();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].1.player_id, 1);
        assert_eq!(agents[0].1.provider, ProviderKind::OpenAi);
        assert_eq!(agents[1].1.player_id, 2);
        assert_eq!(ai, vec![3]);
    }

    #[test]
    fn empty_config_uses_all_defaults() {
        let file: MatchFile = toml::from_str("").unwrap();
        assert_eq!(file.settings.openenv_base, "http://127.0.0.1:8001");
        assert!(file.players.is_empty());
    }
}
