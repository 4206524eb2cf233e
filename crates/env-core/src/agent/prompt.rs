//! Decision prompt construction for arena agents.

use serde_json::json;

use super::provider::{AgentConfig, ChatMessage};
use crate::summary::StateSummary;

#[derive(Debug, Clone)]
pub struct PromptConfig {
    /// The strict output contract, stated up front.
    pub contract: String,
    /// Catalogue of command types the agent may emit.
    pub command_catalog: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            contract: "## Output Format (STRICTLY ENFORCED)\n\
Your response MUST be a single valid JSON object:\n\
- Top level: object with an 'actions' array (use {\"actions\": []} for no action)\n\
- Each action: {\"op\": \"push_command\", \"player_id\": N, \"cmd\": {...}} or {\"op\": \"evaluate\", \"code\": \"...\"}\n\
DO NOT include any text before or after the JSON.\n\
DO NOT wrap the JSON in markdown code blocks."
                .to_string(),
            command_catalog: "## Available Commands\n\
Use these command types in 'cmd':\n\
\n\
Movement:\n\
- walk: {\"type\":\"walk\", \"entities\":[...], \"x\":NUM, \"z\":NUM, \"queued\":BOOL, \"pushFront\":BOOL}\n\
- stop: {\"type\":\"stop\", \"entities\":[...], \"queued\":BOOL}\n\
- patrol: {\"type\":\"patrol\", \"entities\":[...], \"x\":NUM, \"z\":NUM, \"queued\":BOOL}\n\
\n\
Combat:\n\
- attack: {\"type\":\"attack\", \"entities\":[...], \"target\":ENTITY_ID, \"queued\":BOOL}\n\
- attack-walk: {\"type\":\"attack-walk\", \"entities\":[...], \"x\":NUM, \"z\":NUM, \"queued\":BOOL}\n\
\n\
Economy:\n\
- gather: {\"type\":\"gather\", \"entities\":[...], \"target\":RESOURCE_ID, \"queued\":BOOL}\n\
- returnresource: {\"type\":\"returnresource\", \"entities\":[...], \"target\":DROPSITE_ID, \"queued\":BOOL}\n\
\n\
Building:\n\
- construct: {\"type\":\"construct\", \"entities\":[...], \"template\":STR, \"x\":NUM, \"z\":NUM, \"angle\":NUM, \"queued\":BOOL}\n\
  (x, z and angle are required for placement)\n\
- repair: {\"type\":\"repair\", \"entities\":[...], \"target\":FOUNDATION_ID, \"autocontinue\":BOOL, \"queued\":BOOL}\n\
\n\
Production:\n\
- train: {\"type\":\"train\", \"entities\":[BUILDING_ID], \"template\":STR, \"count\":NUM}\n\
\n\
Always include every required field for the command type."
                .to_string(),
        }
    }
}

/// Builds the system + user message pair for one agent decision.
pub fn build_decision_messages(
    agent: &AgentConfig,
    summary: &StateSummary,
    max_actions: usize,
    cfg: &PromptConfig,
) -> Vec<ChatMessage> {
    let mut system = format!(
        "You are an autonomous RTS agent controlling player {pid} in 0 A.D.\n\
\n\
## Your Task\n\
Analyze the current game state and output 0-{max_actions} actions as JSON.\n\
\n\
{contract}\n\
\n\
## Rules\n\
1. You are player_id={pid}\n\
2. Maximum {max_actions} actions per decision\n\
3. Use only entity ids that exist for your player in the observation\n\
4. If no good action is available, return: {{\"actions\": []}}\n\
\n\
{catalog}\n",
        pid = agent.player_id,
        max_actions = max_actions,
        contract = cfg.contract,
        catalog = cfg.command_catalog,
    );

    if let Some(hint) = agent.strategy_hint.as_deref() {
        system.push_str("\n## Your Strategy\n");
        system.push_str(hint.trim());
        system.push('\n');
    }

    let user = json!({
        "you_are": {
            "name": agent.display_name(),
            "player_id": agent.player_id,
        },
        "observation": summary,
        "instruction": format!(
            "Analyze the game state and decide on 0-{max_actions} actions. \
Check 'global_players' for your current resources and population before \
training or constructing; if resources are low, prioritize gather actions. \
Output only the JSON object with the 'actions' array."
        ),
    });
    let user = serde_json::to_string_pretty(&user).unwrap_or_else(|_| "{}".to_string());

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::provider::ProviderKind;
    use crate::snapshot::{EngineState, Snapshot};
    use crate::summary::{SummaryConfig, summarize};

    fn agent_with_hint(hint: Option<&str>) -> AgentConfig {
        AgentConfig {
            player_id: 2,
            name: Some("blue".to_string()),
            provider: ProviderKind::OpenAi,
            model: "test".to_string(),
            temperature: 0.2,
            max_output_tokens: 800,
            base_url: None,
            api_key: Some("k".to_string()),
            api_key_env: None,
            strategy_hint: hint.map(String::from),
            enabled: true,
        }
    }

    fn empty_summary() -> StateSummary {
        let snap = Snapshot {
            step: 1,
            time: 0.0,
            state: EngineState::default(),
        };
        summarize(&snap, &[2], &SummaryConfig::default())
    }

    #[test]
    fn prompt_states_player_identity_and_cap() {
        let msgs = build_decision_messages(
            &agent_with_hint(None),
            &empty_summary(),
            3,
            &PromptConfig::default(),
        );
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "system");
        assert!(msgs[0].content.contains("player_id=2"));
        assert!(msgs[0].content.contains("0-3 actions"));
        assert!(!msgs[0].content.contains("## Your Strategy"));
    }

    #[test]
    fn strategy_hint_lands_in_system_prompt() {
        let msgs = build_decision_messages(
            &agent_with_hint(Some("Rush cavalry early.")),
            &empty_summary(),
            3,
            &PromptConfig::default(),
        );
        assert!(msgs[0].content.contains("## Your Strategy"));
        assert!(msgs[0].content.contains("Rush cavalry early."));
    }

    #[test]
    fn user_message_is_json_with_observation() {
        let msgs = build_decision_messages(
            &agent_with_hint(None),
            &empty_summary(),
            3,
            &PromptConfig::default(),
        );
        let v: serde_json::Value = serde_json::from_str(&msgs[1].content).unwrap();
        assert_eq!(v["you_are"]["player_id"], 2);
        assert!(v["observation"]["players"].is_object());
    }
}
