//! The decision loop: poll the snapshot, ask each agent's model for actions,
//! validate, forward to the proxy, log.
//!
//! One bad model response must never take the loop down: a schema error
//! skips that agent's turn and nothing else. Provider calls happen per agent
//! in player order and action submissions stay strictly sequential, so
//! command ordering per decision is deterministic.

use std::fs::OpenOptions;
use std::future::Future;
use std::io::Write as _;
use std::pin::Pin;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, warn};

use zeroad_env_core::action::{Action, EnvResponse, StepRequest};
use zeroad_env_core::agent::{ChatModel, PromptConfig, build_decision_messages, parse_action_list};
use zeroad_env_core::agent::AgentConfig;
use zeroad_env_core::snapshot::Snapshot;
use zeroad_env_core::summary::{StateSummary, SummaryConfig, summarize};

use crate::config::MatchSettings;

/// Poll cadence while waiting for the snapshot to appear or advance.
const SNAPSHOT_POLL: Duration = Duration::from_millis(250);

/// Boundary to the OpenEnv proxy. [`ProxyClient`] is the live
/// implementation; tests record submitted actions instead.
pub trait EnvClient: Send + Sync {
    fn reset<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<EnvResponse>> + Send + 'a>>;

    fn step<'a>(
        &'a self,
        action: Action,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<EnvResponse>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct ProxyClient {
    base_url: String,
    http: reqwest::Client,
}

impl ProxyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn post_json(
        &self,
        route: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<EnvResponse> {
        use anyhow::Context;
        let url = format!("{}/{route}", self.base_url);
        self.http
            .post(&url)
            .json(&payload)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned non-2xx"))?
            .json()
            .await
            .with_context(|| format!("{url} response decode failed"))
    }
}

impl EnvClient for ProxyClient {
    fn reset<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<EnvResponse>> + Send + 'a>> {
        Box::pin(async move { self.post_json("reset", json!({})).await })
    }

    fn step<'a>(
        &'a self,
        action: Action,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<EnvResponse>> + Send + 'a>> {
        Box::pin(async move {
            let payload = serde_json::to_value(StepRequest {
                action,
                timeout_s: None,
            })?;
            self.post_json("step", payload).await
        })
    }
}

pub struct ArenaAgent {
    pub key: String,
    pub cfg: AgentConfig,
    pub model: Box<dyn ChatModel>,
}

/// Gate for one decision: only act on a snapshot that exists, is fresh, and
/// has advanced past the last decision's step.
pub fn snapshot_gate(
    snap: Option<Snapshot>,
    last_step: Option<u64>,
    now: f64,
    stale_after_s: f64,
) -> Option<Snapshot> {
    let snap = snap?;
    if snap.age_secs(now) > stale_after_s {
        return None;
    }
    if Some(snap.step) == last_step {
        return None;
    }
    Some(snap)
}

#[derive(Debug, Default)]
struct TurnReport {
    actions_planned: usize,
    sent: usize,
    rejected: usize,
    error: Option<String>,
    elapsed_s: f64,
}

async fn run_agent_turn(
    env: &dyn EnvClient,
    agent: &ArenaAgent,
    summary: &StateSummary,
    settings: &MatchSettings,
    prompt: &PromptConfig,
    dry_run: bool,
) -> TurnReport {
    let name = agent.cfg.display_name();
    let messages = build_decision_messages(
        &agent.cfg,
        summary,
        settings.max_actions_per_decision,
        prompt,
    );

    if dry_run {
        println!("[{name}] DRY RUN - system prompt preview:");
        println!("{}", excerpt(&messages[0].content, 500));
        println!("[{name}] DRY RUN - user prompt preview:");
        println!("{}", excerpt(&messages[1].content, 500));
        return TurnReport::default();
    }

    let started = Instant::now();
    let raw = match agent.model.complete(messages).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(agent = %name, error = format!("{err:#}"), "match.llm_failed");
            return TurnReport {
                error: Some(format!("llm_error: {err:#}")),
                elapsed_s: started.elapsed().as_secs_f64(),
                ..TurnReport::default()
            };
        }
    };

    let actions = match parse_action_list(&raw) {
        Ok(actions) => actions,
        Err(err) => {
            warn!(
                agent = %name,
                error = %err,
                output = excerpt(&raw, 500),
                "match.schema_error"
            );
            return TurnReport {
                error: Some(format!("schema_error: {err}")),
                elapsed_s: started.elapsed().as_secs_f64(),
                ..TurnReport::default()
            };
        }
    };

    let planned = actions.len();
    let mut sent = 0;
    let mut rejected = 0;
    for mut action in actions
        .into_iter()
        .take(settings.max_actions_per_decision)
    {
        // Agents only ever act as themselves, whatever the model claimed.
        if let Action::PushCommand { player_id, .. } = &mut action {
            *player_id = agent.cfg.player_id;
        }

        match env.step(action).await {
            Ok(resp) if resp.observation.ok => sent += 1,
            Ok(resp) => {
                rejected += 1;
                warn!(
                    agent = %name,
                    error = resp.observation.error.as_deref().unwrap_or("unknown"),
                    detail = resp.observation.detail.as_deref(),
                    "match.action_rejected"
                );
            }
            Err(err) => {
                rejected += 1;
                warn!(agent = %name, error = format!("{err:#}"), "match.action_send_failed");
            }
        }
    }

    TurnReport {
        actions_planned: planned,
        sent,
        rejected,
        error: None,
        elapsed_s: started.elapsed().as_secs_f64(),
    }
}

pub struct MatchDriver {
    settings: MatchSettings,
    prompt: PromptConfig,
    agents: Vec<ArenaAgent>,
    env: Box<dyn EnvClient>,
    dry_run: bool,
    last_step: Option<u64>,
    decision_count: u64,
}

impl MatchDriver {
    pub fn new(
        settings: MatchSettings,
        agents: Vec<ArenaAgent>,
        env: Box<dyn EnvClient>,
        dry_run: bool,
    ) -> Self {
        Self {
            settings,
            prompt: PromptConfig::default(),
            agents,
            env,
            dry_run,
            last_step: None,
            decision_count: 0,
        }
    }

    pub fn decision_count(&self) -> u64 {
        self.decision_count
    }

    /// Runs until ctrl-c. Snapshots and logs are the only writes, so there
    /// is nothing to flush on the way out.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!(
            state_file = %self.settings.state_file.display(),
            interval_s = self.settings.decision_interval_s,
            agents = self.agents.len(),
            "match.start"
        );
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!(decisions = self.decision_count, "match.stopped");
                    return Ok(());
                }
                res = self.poll_once() => res?,
            }
        }
    }

    async fn poll_once(&mut self) -> anyhow::Result<()> {
        let now = Snapshot::now_timestamp();
        let snap = Snapshot::load(&self.settings.state_file);
        let missing = snap.is_none();
        match snapshot_gate(snap, self.last_step, now, self.settings.stale_after_s) {
            Some(snap) => {
                self.run_decision(snap).await;
                tokio::time::sleep(Duration::from_secs_f64(self.settings.decision_interval_s))
                    .await;
            }
            None => {
                if missing {
                    tracing::debug!(
                        state_file = %self.settings.state_file.display(),
                        "match.waiting_for_snapshot"
                    );
                }
                tokio::time::sleep(SNAPSHOT_POLL).await;
            }
        }
        Ok(())
    }

    pub async fn run_decision(&mut self, snap: Snapshot) {
        self.last_step = Some(snap.step);
        self.decision_count += 1;

        let player_ids: Vec<u32> = self.agents.iter().map(|a| a.cfg.player_id).collect();
        let summary = summarize(
            &snap,
            &player_ids,
            &SummaryConfig {
                max_entities_per_player: self.settings.max_entities_in_summary,
            },
        );

        info!(
            decision = self.decision_count,
            step = snap.step,
            "match.decision"
        );

        for agent in &self.agents {
            let report = run_agent_turn(
                self.env.as_ref(),
                agent,
                &summary,
                &self.settings,
                &self.prompt,
                self.dry_run,
            )
            .await;

            info!(
                agent = %agent.cfg.display_name(),
                planned = report.actions_planned,
                sent = report.sent,
                rejected = report.rejected,
                elapsed_s = report.elapsed_s,
                "match.turn"
            );
            self.log_decision(snap.step, agent, &report);
        }
    }

    fn log_decision(&self, step: u64, agent: &ArenaAgent, report: &TurnReport) {
        let Some(path) = self.settings.log_file.as_deref() else {
            return;
        };
        let record = json!({
            "timestamp": Snapshot::now_timestamp(),
            "step": step,
            "key": agent.key,
            "agent": agent.cfg.display_name(),
            "provider": agent.cfg.provider,
            "model": agent.cfg.model,
            "actions_planned": report.actions_planned,
            "actions_sent": report.sent,
            "actions_rejected": report.rejected,
            "error": report.error,
            "elapsed_s": report.elapsed_s,
        });

        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            let mut f = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(f, "{record}")
        })();
        if let Err(err) = result {
            warn!(error = %err, "match.log_write_failed");
        }
    }
}

fn excerpt(s: &str, max: usize) -> String {
    let t = s.trim();
    if t.len() <= max {
        return t.to_string();
    }
    let mut end = max;
    while !t.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &t[..end])
}
