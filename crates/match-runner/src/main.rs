mod config;
mod driver;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;

use zeroad_env_core::agent::ChatClient;
use zeroad_env_core::config::ConfigLoader;

use crate::config::MatchFile;
use crate::driver::{ArenaAgent, EnvClient, MatchDriver, ProxyClient};

#[derive(Debug, Parser)]
#[command(
    name = "match-runner",
    about = "Multi-provider LLM arena for a running 0 A.D. match"
)]
struct Cli {
    /// Match config (TOML), resolved via ZEROAD_CONFIG_DIR / cwd / configs/.
    #[arg(long, default_value = "multi_provider_match.toml")]
    config: String,

    /// Build and print prompt previews without calling any provider.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let file: MatchFile = ConfigLoader::parse_from_file(&cli.config)
        .with_context(|| format!("load match config {}", cli.config))?;

    let (agent_cfgs, ai_controlled) = file.enabled_agents();
    if agent_cfgs.is_empty() {
        anyhow::bail!("no enabled agents in config; enable at least one [players.*] entry");
    }

    let mut agents = Vec::with_capacity(agent_cfgs.len());
    for (key, cfg) in agent_cfgs {
        let client = ChatClient::from_agent(&cfg)?;
        info!(
            key = %key,
            player_id = cfg.player_id,
            name = %cfg.display_name(),
            provider = ?cfg.provider,
            model = %cfg.model,
            "match.agent"
        );
        agents.push(ArenaAgent {
            key,
            cfg,
            model: Box::new(client),
        });
    }
    if !ai_controlled.is_empty() {
        info!(players = ?ai_controlled, "match.engine_ai_players");
    }

    let env = ProxyClient::new(file.settings.openenv_base.clone());
    if !cli.dry_run {
        let resp = env
            .reset()
            .await
            .with_context(|| {
                format!(
                    "proxy unreachable at reset ({}); is openenv-proxy running?",
                    file.settings.openenv_base
                )
            })?;
        if !resp.observation.ok {
            anyhow::bail!(
                "proxy reset failed: {} ({})",
                resp.observation.error.as_deref().unwrap_or("unknown"),
                resp.observation.detail.as_deref().unwrap_or("")
            );
        }
        info!(
            episode_id = resp.observation.episode_id.as_deref(),
            stepper_detected = resp.observation.stepper_detected,
            "match.reset_ok"
        );
    }

    let mut driver = MatchDriver::new(file.settings, agents, Box::new(env), cli.dry_run);
    driver.run().await
}
