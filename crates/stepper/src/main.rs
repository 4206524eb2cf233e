//! Simulation stepper.
//!
//! When the engine runs with `--rl-interface`, its normal game loop is
//! paused: the simulation only advances through `/step` calls. Exactly one
//! stepper per engine instance keeps the clock moving; everything else in
//! this workspace observes snapshots or issues non-stepping commands.
//! Running two steppers against one engine is a misuse this tool does not
//! try to detect.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use zeroad_env_core::config::{env_or, env_parse_or};
use zeroad_env_core::snapshot::{EngineState, Entity, Snapshot};
use zeroad_env_core::transport::{DEFAULT_TIMEOUT, RlClient, SIM_TIME_QUERY, parse_sim_time};

#[derive(Debug, Parser)]
#[command(
    name = "stepper",
    about = "Keeps the 0 A.D. simulation advancing via the RL interface"
)]
struct Cli {
    /// RL interface base URL (falls back to ZEROAD_RL_URL).
    #[arg(long)]
    rl_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Step continuously; the game becomes playable and AI runs.
    Run {
        /// Snapshot output path (falls back to ZEROAD_STATE_OUT; no snapshot
        /// export if unset).
        #[arg(long)]
        state_out: Option<PathBuf>,
        /// Write the snapshot every N steps (falls back to
        /// ZEROAD_STATE_EVERY_N, default 10; 0 disables).
        #[arg(long)]
        every_n: Option<u64>,
        /// Sleep between steps in seconds (falls back to ZEROAD_STEP_SLEEP,
        /// default 0.005).
        #[arg(long)]
        sleep: Option<f64>,
    },
    /// One connectivity round-trip: evaluate, sim time, a single step.
    Diag,
    /// List a player's current entities (ids are only valid within one
    /// match, so this is how you discover them).
    List {
        #[arg(long, default_value_t = 1)]
        player: i64,
    },
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
    let rl_url = cli
        .rl_url
        .unwrap_or_else(|| env_or("ZEROAD_RL_URL", "http://127.0.0.1:6000"));
    let client = RlClient::new(rl_url);

    match cli.command {
        Command::Run {
            state_out,
            every_n,
            sleep,
        } => {
            let state_out = state_out.or_else(|| {
                std::env::var("ZEROAD_STATE_OUT")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from)
            });
            let every_n = every_n.unwrap_or_else(|| env_parse_or("ZEROAD_STATE_EVERY_N", 10));
            let sleep = sleep.unwrap_or_else(|| env_parse_or("ZEROAD_STEP_SLEEP", 0.005));
            run(&client, state_out, every_n, Duration::from_secs_f64(sleep)).await
        }
        Command::Diag => diag(&client).await,
        Command::List { player } => list(&client, player).await,
    }
}

async fn run(
    client: &RlClient,
    state_out: Option<PathBuf>,
    every_n: u64,
    sleep: Duration,
) -> anyhow::Result<()> {
    info!(
        rl_url = client.base_url(),
        snapshot = ?state_out,
        every_n,
        sleep_ms = sleep.as_millis() as u64,
        "stepper.start"
    );

    let mut step_count: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(steps = step_count, "stepper.stopped");
                return Ok(());
            }
            result = client.step(&[], DEFAULT_TIMEOUT) => {
                match result {
                    Ok(state) => {
                        step_count += 1;
                        if step_count % 100 == 0 {
                            info!(steps = step_count, "stepper.progress");
                        }
                        if let Some(path) = &state_out
                            && should_write(step_count, every_n)
                        {
                            write_snapshot(path, step_count, state);
                        }
                        tokio::time::sleep(sleep).await;
                    }
                    Err(err) => {
                        // The engine may still be starting up, or a too-short
                        // sleep pushed it behind; retry on the same cadence.
                        warn!(error = %err, "stepper.step_error");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        }
    }
}

fn should_write(step: u64, every_n: u64) -> bool {
    every_n > 0 && step % every_n == 0
}

fn write_snapshot(path: &std::path::Path, step: u64, state: Value) {
    match Snapshot::from_engine_state(step, state) {
        Ok(snapshot) => {
            if let Err(err) = snapshot.write_atomic(path) {
                warn!(error = %err, "stepper.snapshot.write_failed");
            }
        }
        Err(err) => warn!(error = %err, "stepper.snapshot.decode_failed"),
    }
}

async fn diag(client: &RlClient) -> anyhow::Result<()> {
    println!("--- diagnostics ({}) ---", client.base_url());

    let ping = client
        .evaluate("1+1", DEFAULT_TIMEOUT)
        .await
        .context("/evaluate failed (is the engine running with --rl-interface?)")?;
    println!("  /evaluate 1+1 = {ping}");

    match client.evaluate(SIM_TIME_QUERY, DEFAULT_TIMEOUT).await {
        Ok(v) => println!("  sim time: {:?}", parse_sim_time(&v)),
        Err(err) => println!("  sim time query failed: {err}"),
    }

    println!("  calling /step with empty commands...");
    let state = client
        .step(&[], DEFAULT_TIMEOUT)
        .await
        .context("/step failed")?;
    match serde_json::from_value::<EngineState>(state) {
        Ok(state) => {
            println!("  /step returned {} entities", state.entities.len());
            for (id, ent) in state.entities.iter().take(5) {
                println!("    {}", entity_line(id, ent));
            }
            if state.entities.len() > 5 {
                println!("    ... and {} more", state.entities.len() - 5);
            }
        }
        Err(err) => println!("  /step state decode failed: {err}"),
    }

    match client.evaluate(SIM_TIME_QUERY, DEFAULT_TIMEOUT).await {
        Ok(v) => println!("  sim time after /step: {:?}", parse_sim_time(&v)),
        Err(err) => println!("  sim time query failed: {err}"),
    }

    println!("--- end diagnostics ---");
    Ok(())
}

async fn list(client: &RlClient, player: i64) -> anyhow::Result<()> {
    let state = client
        .step(&[], DEFAULT_TIMEOUT)
        .await
        .context("fetch state via /step")?;
    let state: EngineState =
        serde_json::from_value(state).context("engine state has unexpected shape")?;

    let (units, structures) = partition_player_entities(&state, player);

    if !structures.is_empty() {
        println!("Structures ({}):", structures.len());
        for line in &structures {
            println!("{line}");
        }
    }
    if !units.is_empty() {
        println!("Units ({}):", units.len());
        for line in &units {
            println!("{line}");
        }
    }
    if units.is_empty() && structures.is_empty() {
        println!("No entities found for player {player}.");
    }
    println!("Total: {} units, {} structures", units.len(), structures.len());
    Ok(())
}

/// Formats one `id  owner  (x, z)  template` listing row.
fn entity_line(id: &str, ent: &Entity) -> String {
    let pos = match ent.pos_xz() {
        Some((x, z)) => format!("({x:.0}, {z:.0})"),
        None => "(no pos)".to_string(),
    };
    format!(
        "  {id:>6}  owner={owner}  {pos:>16}  {template}",
        owner = ent.owner,
        template = ent.template
    )
}

/// Splits a player's entities into (units, structures) listing rows, ordered
/// by numeric id.
fn partition_player_entities(state: &EngineState, player: i64) -> (Vec<String>, Vec<String>) {
    let mut owned: Vec<(u64, &String, &Entity)> = state
        .entities
        .iter()
        .filter(|(_, ent)| player == -1 || ent.owner == player)
        .filter_map(|(id, ent)| id.parse::<u64>().ok().map(|n| (n, id, ent)))
        .collect();
    owned.sort_by_key(|(n, _, _)| *n);

    let mut units = Vec::new();
    let mut structures = Vec::new();
    for (_, id, ent) in owned {
        let line = entity_line(id, ent);
        if ent.is_unit() {
            units.push(line);
        } else {
            structures.push(line);
        }
    }
    (units, structures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_state() -> EngineState {
        serde_json::from_value(json!({
            "entities": {
                "186": {"owner": 1, "template": "units/athen/support_female_citizen", "position": [480.0, 360.0]},
                "30": {"owner": 1, "template": "structures/athen/civil_centre", "position": [500.0, 340.0]},
                "40": {"owner": 2, "template": "units/spart/infantry_spearman_b", "position": [100.0, 90.0]},
                "12": {"owner": 0, "template": "gaia/tree/oak", "position": [200.0, 210.0]}
            },
            "players": []
        }))
        .unwrap()
    }

    #[test]
    fn snapshot_cadence_hits_exact_multiples() {
        assert!(!should_write(1, 10));
        assert!(!should_write(9, 10));
        assert!(should_write(10, 10));
        assert!(should_write(20, 10));
        assert!(!should_write(21, 10));
        assert!(!should_write(10, 0));
    }

    #[test]
    fn listing_partitions_units_and_structures_for_one_player() {
        let state = sample_state();
        let (units, structures) = partition_player_entities(&state, 1);
        assert_eq!(units.len(), 1);
        assert_eq!(structures.len(), 1);
        assert!(units[0].contains("186"));
        assert!(units[0].contains("units/athen/support_female_citizen"));
        assert!(structures[0].contains("civil_centre"));
    }

    #[test]
    fn listing_with_player_wildcard_includes_everything() {
        let state = sample_state();
        let (units, structures) = partition_player_entities(&state, -1);
        assert_eq!(units.len() + structures.len(), 4);
    }

    #[test]
    fn entity_line_reports_missing_position() {
        let ent = Entity {
            owner: 1,
            template: "units/athen/cavalry_javelineer_b".to_string(),
            ..Entity::default()
        };
        let line = entity_line("9", &ent);
        assert!(line.contains("(no pos)"));
        assert!(line.contains("owner=1"));
    }

    #[test]
    fn snapshot_writes_are_monotonic_in_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest_state.json");

        for step in [10u64, 20, 30] {
            write_snapshot(
                &path,
                step,
                json!({"entities": {}, "players": []}),
            );
            let snap = Snapshot::load(&path).unwrap();
            assert_eq!(snap.step, step);
        }
    }
}
